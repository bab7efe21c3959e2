use std::collections::HashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unit of work flowing into and out of a node.
#[derive(Debug, Clone, PartialEq, JsonSchema, Serialize, Deserialize)]
pub struct Message {
    id: String,
    session_id: Option<String>,
    payload: Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(id: &str, payload: Value, session_id: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            session_id,
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Same id, session and metadata with a new payload.
    pub fn reply(&self, payload: Value) -> Self {
        Self {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            payload,
            metadata: self.metadata.clone(),
        }
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    pub fn payload(&self) -> Value {
        self.payload.clone()
    }
}
