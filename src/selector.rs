use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level resource menu of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    #[serde(alias = "instances-api")]
    Instance,
    #[serde(alias = "messages-api")]
    Message,
    #[serde(alias = "events-api")]
    Event,
    #[serde(alias = "integrations-api")]
    Integration,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Instance,
        Resource::Message,
        Resource::Event,
        Resource::Integration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Instance => "instance",
            Resource::Message => "message",
            Resource::Event => "event",
            Resource::Integration => "integration",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resource `{0}`")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" | "instances-api" => Ok(Resource::Instance),
            "message" | "messages-api" => Ok(Resource::Message),
            "event" | "events-api" => Ok(Resource::Event),
            "integration" | "integrations-api" => Ok(Resource::Integration),
            other => Err(UnknownResource(other.to_string())),
        }
    }
}

/// Identifies one route: resource, operation and, for fan-out routes, the
/// secondary selector value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub resource: Resource,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_operation: Option<String>,
}

impl RouteKey {
    pub fn new(resource: Resource, operation: impl Into<String>) -> Self {
        Self {
            resource,
            operation: operation.into(),
            sub_operation: None,
        }
    }

    pub fn with_sub(mut self, sub_operation: impl Into<String>) -> Self {
        self.sub_operation = Some(sub_operation.into());
        self
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_operation {
            Some(sub) => write!(f, "{}/{}/{}", self.resource, self.operation, sub),
            None => write!(f, "{}/{}", self.resource, self.operation),
        }
    }
}
