use serde_json::{Map, Value};

use crate::error::DispatchError;
use crate::params::{ParameterBag, scalar_text};

/// Where a body field takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Absent or null is a `MissingParameter`.
    Required(&'static str),
    /// Used as-is when present, the default otherwise.
    OrDefault(&'static str, Value),
    /// Used when truthy, the default otherwise.
    OrFalsy(&'static str, Value),
    Literal(Value),
    /// Truthy values rendered as a string, the default otherwise.
    Stringified(&'static str, Value),
    /// List of records projected onto one field of each record.
    Pluck { list: &'static str, field: &'static str },
    /// List of records projected onto renamed records, `(out, in)` pairs.
    Records {
        list: &'static str,
        fields: Vec<(&'static str, &'static str)>,
    },
    Object(BodyShape),
    Array(Vec<Source>),
}

impl Source {
    fn evaluate(&self, bag: &ParameterBag) -> Result<Value, DispatchError> {
        match self {
            Source::Required(p) => bag.require(p).cloned(),
            Source::OrDefault(p, default) => Ok(bag.get(p).cloned().unwrap_or_else(|| default.clone())),
            Source::OrFalsy(p, default) => Ok(bag.truthy(p).cloned().unwrap_or_else(|| default.clone())),
            Source::Literal(v) => Ok(v.clone()),
            Source::Stringified(p, default) => Ok(bag
                .truthy(p)
                .map(|v| Value::String(scalar_text(v).unwrap_or_else(|| v.to_string())))
                .unwrap_or_else(|| default.clone())),
            Source::Pluck { list, field } => Ok(Value::Array(
                records(bag, list)
                    .map(|record| record.get(*field).cloned().unwrap_or(Value::Null))
                    .collect(),
            )),
            Source::Records { list, fields } => Ok(Value::Array(
                records(bag, list)
                    .map(|record| {
                        let mut out = Map::new();
                        for (to, from) in fields {
                            out.insert(to.to_string(), record.get(*from).cloned().unwrap_or(Value::Null));
                        }
                        Value::Object(out)
                    })
                    .collect(),
            )),
            Source::Object(shape) => shape.build(bag),
            Source::Array(items) => items
                .iter()
                .map(|s| s.evaluate(bag))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

fn records<'a>(bag: &'a ParameterBag, list: &str) -> impl Iterator<Item = &'a Map<String, Value>> {
    bag.get(list)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// When a field is emitted at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    Truthy(&'static str),
    Equals(&'static str, &'static str),
    NonEmptyList(&'static str),
}

impl Condition {
    fn holds(&self, bag: &ParameterBag) -> bool {
        match self {
            Condition::Always => true,
            Condition::Truthy(p) => bag.truthy(p).is_some(),
            Condition::Equals(p, expected) => bag.get(p).and_then(Value::as_str) == Some(*expected),
            Condition::NonEmptyList(p) => bag
                .get(p)
                .and_then(Value::as_array)
                .is_some_and(|l| !l.is_empty()),
        }
    }
}

/// How a non-empty option group lands in the body.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// The group's shape is built and its keys merged into the body.
    Flatten,
    /// The group's shape is built and stored under the given key.
    Nest(&'static str),
    /// The group object is copied into the body verbatim.
    Spread,
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    key: &'static str,
    source: Source,
    condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
struct Group {
    param: &'static str,
    placement: Placement,
    shape: BodyShape,
}

/// Declarative description of a JSON request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyShape {
    fields: Vec<Field>,
    groups: Vec<Group>,
}

impl BodyShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(self, key: &'static str, source: Source) -> Self {
        self.field_if(key, source, Condition::Always)
    }

    pub fn field_if(mut self, key: &'static str, source: Source, condition: Condition) -> Self {
        self.fields.push(Field { key, source, condition });
        self
    }

    pub fn required(self, key: &'static str, param: &'static str) -> Self {
        self.field(key, Source::Required(param))
    }

    pub fn or_default(self, key: &'static str, param: &'static str, default: Value) -> Self {
        self.field(key, Source::OrDefault(param, default))
    }

    pub fn or_falsy(self, key: &'static str, param: &'static str, default: Value) -> Self {
        self.field(key, Source::OrFalsy(param, default))
    }

    pub fn literal(self, key: &'static str, value: Value) -> Self {
        self.field(key, Source::Literal(value))
    }

    /// Emits `param` under `key` only when it is truthy.
    pub fn when_truthy(self, key: &'static str, param: &'static str) -> Self {
        self.field_if(key, Source::Required(param), Condition::Truthy(param))
    }

    pub fn group(mut self, param: &'static str, placement: Placement, shape: BodyShape) -> Self {
        self.groups.push(Group { param, placement, shape });
        self
    }

    /// Appends every field and group of `other`.
    pub fn extend(mut self, other: BodyShape) -> Self {
        self.fields.extend(other.fields);
        self.groups.extend(other.groups);
        self
    }

    pub fn build(&self, bag: &ParameterBag) -> Result<Value, DispatchError> {
        let mut body = Map::new();
        for field in &self.fields {
            if field.condition.holds(bag) {
                body.insert(field.key.to_string(), field.source.evaluate(bag)?);
            }
        }
        for group in &self.groups {
            let Some(members) = bag.group(group.param) else { continue };
            match &group.placement {
                Placement::Spread => {
                    body.extend(members.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Placement::Flatten => {
                    let scoped = ParameterBag::from(members.clone());
                    if let Value::Object(built) = group.shape.build(&scoped)? {
                        body.extend(built);
                    }
                }
                Placement::Nest(key) => {
                    let scoped = ParameterBag::from(members.clone());
                    body.insert(key.to_string(), group.shape.build(&scoped)?);
                }
            }
        }
        Ok(Value::Object(body))
    }
}
