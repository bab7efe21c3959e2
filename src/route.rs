use handlebars::Handlebars;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::{Map, Value};
use tracing::error;
use url::form_urlencoded;

use crate::credentials::Credentials;
use crate::descriptor::{HttpMethod, RequestDescriptor};
use crate::error::DispatchError;
use crate::params::{ParameterBag, scalar_text};
use crate::shape::BodyShape;

/// Characters escaped in a placeholder value so it stays one path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A URL path below the server URL, with `{{param}}` placeholders.
///
/// The source string doubles as the template name in the registry, so two
/// routes with the same path share one compiled template.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    source: &'static str,
    vars: Vec<String>,
}

impl PathTemplate {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            vars: placeholders(source),
        }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub(crate) fn register(&self, templates: &mut Handlebars<'static>) -> Result<(), handlebars::TemplateError> {
        if templates.has_template(self.source) {
            return Ok(());
        }
        templates.register_template_string(self.source, format!("{{{{server}}}}{}", self.source))
    }

    fn render(&self, templates: &Handlebars<'static>, server: &str, params: &ParameterBag) -> Result<String, DispatchError> {
        let mut data = Map::new();
        data.insert("server".into(), Value::String(server.to_string()));
        for var in &self.vars {
            let text = params
                .get(var)
                .and_then(scalar_text)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| DispatchError::MissingParameter(var.clone()))?;
            if text == "." || text == ".." {
                return Err(DispatchError::InvalidParameter {
                    name: var.clone(),
                    value: text,
                });
            }
            data.insert(var.clone(), Value::String(utf8_percent_encode(&text, PATH_SEGMENT).to_string()));
        }
        templates.render(self.source, &Value::Object(data)).map_err(|e| {
            error!(template = self.source, "path template failed to render: {}", e);
            DispatchError::MissingParameter(self.vars.join(","))
        })
    }
}

fn placeholders(source: &str) -> Vec<String> {
    let mut vars = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        let name = after[..end].trim();
        if !name.is_empty() && !vars.iter().any(|v| v == name) {
            vars.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    vars
}

/// One concrete HTTP request rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    method: HttpMethod,
    path: PathTemplate,
    query: Option<&'static str>,
    body: Option<BodyShape>,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: &'static str) -> Self {
        Self {
            method,
            path: PathTemplate::new(path),
            query: None,
            body: None,
        }
    }

    pub fn get(path: &'static str) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: &'static str) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: &'static str) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: &'static str) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Appends `?param=value` when `param` is truthy.
    pub fn filter(mut self, param: &'static str) -> Self {
        self.query = Some(param);
        self
    }

    pub fn body(mut self, shape: BodyShape) -> Self {
        self.body = Some(shape);
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    fn resolve(&self, cx: &Resolution<'_>) -> Result<RequestDescriptor, DispatchError> {
        let mut url = self.path.render(cx.templates, cx.credentials.server_url(), cx.params)?;
        let body = match &self.body {
            Some(shape) => Some(shape.build(cx.params)?),
            None => None,
        };
        if let Some(param) = self.query {
            if let Some(value) = cx.params.truthy(param).and_then(scalar_text) {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair(param, &value)
                    .finish();
                url.push('?');
                url.push_str(&query);
            }
        }
        Ok(RequestDescriptor::new(self.method, url, cx.credentials.api_key(), body))
    }
}

/// Secondary dispatch on a selector parameter such as `resourceForWebhook`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fanout {
    selector: &'static str,
    branches: Vec<(&'static str, RouteDef)>,
}

impl Fanout {
    pub fn on(selector: &'static str) -> Self {
        Self {
            selector,
            branches: Vec::new(),
        }
    }

    pub fn branch(mut self, sub_operation: &'static str, def: impl Into<RouteDef>) -> Self {
        self.branches.push((sub_operation, def.into()));
        self
    }

    pub fn selector(&self) -> &'static str {
        self.selector
    }

    pub fn sub_operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.branches.iter().map(|(name, _)| *name)
    }

    pub(crate) fn branches(&self) -> &[(&'static str, RouteDef)] {
        &self.branches
    }
}

/// How one (resource, operation) pair becomes a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDef {
    Request(RequestSpec),
    Fanout(Fanout),
    /// `then` when `param` is truthy, `otherwise` when it is not.
    IfTruthy {
        param: &'static str,
        then: Box<RouteDef>,
        otherwise: Box<RouteDef>,
    },
}

impl From<RequestSpec> for RouteDef {
    fn from(spec: RequestSpec) -> Self {
        RouteDef::Request(spec)
    }
}

impl From<Fanout> for RouteDef {
    fn from(fanout: Fanout) -> Self {
        RouteDef::Fanout(fanout)
    }
}

impl RouteDef {
    pub fn if_truthy(param: &'static str, then: impl Into<RouteDef>, otherwise: impl Into<RouteDef>) -> Self {
        RouteDef::IfTruthy {
            param,
            then: Box::new(then.into()),
            otherwise: Box::new(otherwise.into()),
        }
    }

    pub fn is_fanout(&self) -> bool {
        matches!(self, RouteDef::Fanout(_))
    }

    /// Every request rule reachable from this definition.
    pub fn requests(&self) -> Vec<&RequestSpec> {
        match self {
            RouteDef::Request(spec) => vec![spec],
            RouteDef::Fanout(fanout) => fanout.branches.iter().flat_map(|(_, d)| d.requests()).collect(),
            RouteDef::IfTruthy { then, otherwise, .. } => {
                let mut all = then.requests();
                all.extend(otherwise.requests());
                all
            }
        }
    }

    pub(crate) fn resolve(&self, cx: &Resolution<'_>) -> Result<RequestDescriptor, DispatchError> {
        match self {
            RouteDef::Request(spec) => spec.resolve(cx),
            RouteDef::IfTruthy { param, then, otherwise } => {
                if cx.params.truthy(param).is_some() {
                    then.resolve(cx)
                } else {
                    otherwise.resolve(cx)
                }
            }
            RouteDef::Fanout(fanout) => {
                let got = match cx.sub_operation {
                    Some(sub) => sub.to_string(),
                    None => cx
                        .params
                        .get(fanout.selector)
                        .map(|v| scalar_text(v).unwrap_or_else(|| v.to_string()))
                        .ok_or_else(|| DispatchError::MissingParameter(fanout.selector.to_string()))?,
                };
                match fanout.branches.iter().find(|(name, _)| *name == got) {
                    Some((_, def)) => def.resolve(&Resolution { sub_operation: None, ..*cx }),
                    None => Err(DispatchError::UnknownSubOperation {
                        operation: cx.operation.to_string(),
                        got,
                    }),
                }
            }
        }
    }
}

/// Inputs shared by every step of one resolution.
#[derive(Clone, Copy)]
pub(crate) struct Resolution<'a> {
    pub templates: &'a Handlebars<'static>,
    pub params: &'a ParameterBag,
    pub credentials: &'a Credentials,
    pub operation: &'a str,
    pub sub_operation: Option<&'a str>,
}
