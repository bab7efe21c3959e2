//! Evolution API workflow node.
//!
//! A fixed menu of (resource, operation) selections is mapped onto REST
//! calls against an Evolution API server. [`dispatcher::Dispatcher`] resolves
//! a selection and a parameter bag into a [`descriptor::RequestDescriptor`];
//! a [`transport::Transport`] sends it.

pub mod bots;
pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod logger;
pub mod message;
pub mod node;
pub mod params;
pub mod registry;
pub mod route;
pub mod routes;
pub mod secret;
pub mod selector;
pub mod shape;
pub mod transport;

pub use credentials::{CredentialStore, Credentials};
pub use descriptor::{HttpMethod, RequestDescriptor};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, RegistryError, TransportError};
pub use params::ParameterBag;
pub use selector::{Resource, RouteKey};
pub use transport::{ReqwestTransport, Transport};
