use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::config::NodeSettings;
use crate::credentials::SecretsCredentialStore;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, TransportError};
use crate::message::Message;
use crate::params::ParameterBag;
use crate::secret::SecretsManager;
use crate::selector::{Resource, RouteKey};
use crate::transport::{ReqwestTransport, Transport};

#[async_trait]
#[typetag::serde]
pub trait NodeType: Send + Sync + Debug {
    fn type_name(&self) -> String;
    async fn process(&self, msg: Message, ctx: &mut NodeContext) -> Result<Message, NodeError>;
    fn clone_box(&self) -> Box<dyn NodeType>;
    /// Return this concrete type’s schema.
    fn schema(&self) -> schemars::Schema;
}

#[derive(Serialize, Deserialize)]
pub struct Node(pub Box<dyn NodeType>);

impl std::ops::Deref for Node {
    type Target = dyn NodeType;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Node(self.0.clone_box())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Node").field(&self.0).finish()
    }
}

/// What a node may touch while processing one message.
#[derive(Clone)]
pub struct NodeContext {
    secrets: SecretsManager,
    transport: Arc<dyn Transport>,
    settings: NodeSettings,
}

impl NodeContext {
    pub fn new(secrets: SecretsManager, transport: Arc<dyn Transport>, settings: NodeSettings) -> Self {
        Self { secrets, transport, settings }
    }

    /// Context with an HTTP transport built from `settings`.
    pub fn with_http(secrets: SecretsManager, settings: NodeSettings) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(settings.timeout(), &settings.user_agent)?;
        Ok(Self::new(secrets, Arc::new(transport), settings))
    }

    pub fn secrets(&self) -> &SecretsManager {
        &self.secrets
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("secrets", &self.secrets)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum NodeError {
    InvalidInput(String),
    ExecutionFailed(String),
    ConnectionFailed(String),
    Internal(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            NodeError::ExecutionFailed(msg) => write!(f, "Processing error: {}", msg),
            NodeError::ConnectionFailed(msg) => write!(f, "Failed to connect to node: {}", msg),
            NodeError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<DispatchError> for NodeError {
    fn from(err: DispatchError) -> Self {
        let msg = err.to_string();
        match err {
            DispatchError::UnknownOperation { .. }
            | DispatchError::UnknownSubOperation { .. }
            | DispatchError::MissingParameter(_)
            | DispatchError::InvalidParameter { .. } => NodeError::InvalidInput(msg),
            DispatchError::CredentialUnavailable(_)
            | DispatchError::TransportFailure(TransportError::Request(_)) => NodeError::ConnectionFailed(msg),
            DispatchError::TransportFailure(_) => NodeError::ExecutionFailed(msg),
        }
    }
}

/// Calls one Evolution API endpoint per message.
///
/// The incoming payload, when it is an object, is laid over `parameters`;
/// the outgoing payload is the array of response records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvolutionApiNode {
    pub resource: Resource,
    pub operation: String,
    /// Overrides the `resourceFor*` selector parameter of fan-out routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_operation: Option<String>,
    #[serde(default)]
    #[schemars(with = "std::collections::HashMap<String, Value>")]
    pub parameters: ParameterBag,
    /// Credential reference; the configured default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl EvolutionApiNode {
    pub fn new(resource: Resource, operation: impl Into<String>) -> Self {
        Self {
            resource,
            operation: operation.into(),
            sub_operation: None,
            parameters: ParameterBag::new(),
            credential: None,
        }
    }

    pub fn with_sub_operation(mut self, sub: impl Into<String>) -> Self {
        self.sub_operation = Some(sub.into());
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterBag) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn route_key(&self) -> RouteKey {
        let key = RouteKey::new(self.resource, self.operation.clone());
        match &self.sub_operation {
            Some(sub) => key.with_sub(sub.clone()),
            None => key,
        }
    }
}

#[async_trait]
#[typetag::serde(name = "evolution_api")]
impl NodeType for EvolutionApiNode {
    fn type_name(&self) -> String {
        "evolution_api".to_string()
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(EvolutionApiNode)
    }

    #[tracing::instrument(name = "evolution_node_process", skip(self, context), fields(route = %self.route_key()))]
    async fn process(&self, input: Message, context: &mut NodeContext) -> Result<Message, NodeError> {
        let params = self.parameters.merged(&ParameterBag::from_value(input.payload()));
        let credential = self
            .credential
            .as_deref()
            .unwrap_or(context.settings().credential.as_str());
        let store = SecretsCredentialStore::new(context.secrets().clone());

        let records = Dispatcher::new()
            .execute(&self.route_key(), &params, &store, credential, context.transport())
            .await
            .map_err(|e| {
                error!("Evolution API node failed: {}", e);
                NodeError::from(e)
            })?;

        Ok(input.reply(Value::Array(records)))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
