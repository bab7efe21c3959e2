use thiserror::Error;

/// Failures produced while turning a selector and a parameter bag into a
/// request, or while handing that request to the transport.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown operation `{operation}` for resource `{resource}`")]
    UnknownOperation { resource: String, operation: String },

    /// The secondary selector did not match any branch. `got` is the value
    /// exactly as the caller supplied it.
    #[error("unrecognized {operation} operation: {got}")]
    UnknownSubOperation { operation: String, got: String },

    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    /// A path placeholder value that would leave its segment.
    #[error("parameter `{name}` cannot be used as a path segment: {value:?}")]
    InvalidParameter { name: String, value: String },

    #[error("credentials `{0}` are unavailable")]
    CredentialUnavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(#[from] TransportError),
}

impl DispatchError {
    /// True for errors detected before any network call.
    pub fn is_local(&self) -> bool {
        !matches!(self, DispatchError::TransportFailure(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON response: {0}")]
    Decode(String),
}

/// Problems found while building the route registry.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("route `{resource}/{operation}` is registered twice")]
    DuplicateRoute { resource: String, operation: String },

    #[error("invalid path template `{name}`: {reason}")]
    Template { name: String, reason: String },
}
