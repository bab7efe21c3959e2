use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::DispatchError;

/// Named parameter values supplied by the host for one invocation.
///
/// Names may be dotted paths such as `options_Create_instance.proxy.proxySettings`.
/// A lookup first tries the name as a literal key, then walks nested objects
/// one segment at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag(Map<String, Value>);

impl ParameterBag {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON object. Any other JSON value yields an empty bag.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Overlays `other` on top of this bag; keys in `other` win.
    pub fn merged(&self, other: &ParameterBag) -> ParameterBag {
        let mut map = self.0.clone();
        for (k, v) in &other.0 {
            map.insert(k.clone(), v.clone());
        }
        ParameterBag(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Present and not null.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let found = match self.0.get(name) {
            Some(v) => Some(v),
            None => lookup_path(&self.0, name),
        };
        found.filter(|v| !v.is_null())
    }

    pub fn require(&self, name: &str) -> Result<&Value, DispatchError> {
        self.get(name)
            .ok_or_else(|| DispatchError::MissingParameter(name.to_string()))
    }

    /// The value when truthy, `None` otherwise.
    pub fn truthy(&self, name: &str) -> Option<&Value> {
        self.get(name).filter(|v| is_truthy(v))
    }

    /// Non-empty object stored under `name`, if any.
    pub fn group(&self, name: &str) -> Option<&Map<String, Value>> {
        self.get(name)
            .and_then(Value::as_object)
            .filter(|m| !m.is_empty())
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for ParameterBag {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Falsy values: null, `false`, `0`, `""`. Lists and objects are always truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Renders a scalar the way it appears inside a URL path or query.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_text(n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integral floats drop their fraction: `3128.0` renders as `3128`.
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}
