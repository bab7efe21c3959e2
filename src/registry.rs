use std::collections::{BTreeMap, HashMap, HashSet};

use handlebars::Handlebars;
use once_cell::sync::Lazy;

use crate::error::RegistryError;
use crate::route::RouteDef;
use crate::routes;
use crate::selector::Resource;

static REGISTRY: Lazy<Registry> =
    Lazy::new(|| routes::default_registry().expect("built-in route table is consistent"));

/// The process-wide route table, built on first use.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Maps (resource, operation) to exactly one route definition.
///
/// Path templates of every route are compiled into one Handlebars registry
/// at build time, so resolution only renders.
#[derive(Debug)]
pub struct Registry {
    routes: HashMap<(Resource, String), RouteDef>,
    aliases: HashMap<(Resource, String), String>,
    templates: Handlebars<'static>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns the canonical operation name and its definition.
    /// Aliases resolve to their canonical route.
    pub fn lookup(&self, resource: Resource, operation: &str) -> Option<(&str, &RouteDef)> {
        let key = (resource, operation.to_string());
        let canonical = match self.aliases.get(&key) {
            Some(canonical) => (resource, canonical.clone()),
            None => key,
        };
        self.routes
            .get_key_value(&canonical)
            .map(|((_, name), def)| (name.as_str(), def))
    }

    /// Canonical operation names per resource, sorted.
    pub fn operations(&self) -> BTreeMap<Resource, Vec<&str>> {
        let mut out: BTreeMap<Resource, Vec<&str>> = BTreeMap::new();
        for (resource, operation) in self.routes.keys() {
            out.entry(*resource).or_default().push(operation.as_str());
        }
        for ops in out.values_mut() {
            ops.sort_unstable();
        }
        out
    }

    pub fn aliases_of(&self, resource: Resource, operation: &str) -> Vec<&str> {
        let mut found: Vec<&str> = self
            .aliases
            .iter()
            .filter(|((r, _), canonical)| *r == resource && canonical.as_str() == operation)
            .map(|((_, alias), _)| alias.as_str())
            .collect();
        found.sort_unstable();
        found
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub(crate) fn templates(&self) -> &Handlebars<'static> {
        &self.templates
    }
}

struct Entry {
    resource: Resource,
    operation: &'static str,
    aliases: &'static [&'static str],
    def: RouteDef,
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    pub fn route(self, resource: Resource, operation: &'static str, def: impl Into<RouteDef>) -> Self {
        self.route_with_aliases(resource, operation, &[], def)
    }

    pub fn route_with_aliases(
        mut self,
        resource: Resource,
        operation: &'static str,
        aliases: &'static [&'static str],
        def: impl Into<RouteDef>,
    ) -> Self {
        self.entries.push(Entry {
            resource,
            operation,
            aliases,
            def: def.into(),
        });
        self
    }

    /// Fails on any selector used twice, within a resource or inside one
    /// fan-out, and on path templates Handlebars rejects.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut templates = Handlebars::new();
        templates.register_escape_fn(handlebars::no_escape);

        let mut routes = HashMap::new();
        let mut aliases = HashMap::new();
        let mut taken: HashSet<(Resource, &str)> = HashSet::new();

        for entry in self.entries {
            for name in std::iter::once(&entry.operation).chain(entry.aliases.iter()) {
                if !taken.insert((entry.resource, *name)) {
                    return Err(RegistryError::DuplicateRoute {
                        resource: entry.resource.to_string(),
                        operation: name.to_string(),
                    });
                }
            }
            check_branches(entry.resource, entry.operation, &entry.def)?;
            for spec in entry.def.requests() {
                spec.path()
                    .register(&mut templates)
                    .map_err(|e| RegistryError::Template {
                        name: spec.path().source().to_string(),
                        reason: e.to_string(),
                    })?;
            }
            for alias in entry.aliases {
                aliases.insert((entry.resource, alias.to_string()), entry.operation.to_string());
            }
            routes.insert((entry.resource, entry.operation.to_string()), entry.def);
        }

        Ok(Registry {
            routes,
            aliases,
            templates,
        })
    }
}

fn check_branches(resource: Resource, operation: &str, def: &RouteDef) -> Result<(), RegistryError> {
    match def {
        RouteDef::Request(_) => Ok(()),
        RouteDef::IfTruthy { then, otherwise, .. } => {
            check_branches(resource, operation, then)?;
            check_branches(resource, operation, otherwise)
        }
        RouteDef::Fanout(fanout) => {
            let mut seen = HashSet::new();
            for (sub, branch) in fanout.branches() {
                if !seen.insert(*sub) {
                    return Err(RegistryError::DuplicateRoute {
                        resource: resource.to_string(),
                        operation: format!("{operation}/{sub}"),
                    });
                }
                check_branches(resource, operation, branch)?;
            }
            Ok(())
        }
    }
}
