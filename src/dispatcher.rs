use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, Credentials};
use crate::descriptor::RequestDescriptor;
use crate::error::DispatchError;
use crate::params::ParameterBag;
use crate::registry::{Registry, registry};
use crate::route::Resolution;
use crate::selector::{Resource, RouteKey};
use crate::transport::{Transport, into_records};

/// Turns (resource, operation, parameters, credentials) into requests.
///
/// Holds no mutable state; one dispatcher can serve any number of
/// concurrent invocations.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    registry: &'static Registry,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Dispatcher over the built-in route table.
    pub fn new() -> Self {
        Self { registry: registry() }
    }

    pub fn registry(&self) -> &'static Registry {
        self.registry
    }

    pub fn resolve(
        &self,
        resource: Resource,
        operation: &str,
        params: &ParameterBag,
        credentials: &Credentials,
    ) -> Result<RequestDescriptor, DispatchError> {
        self.resolve_key(&RouteKey::new(resource, operation), params, credentials)
    }

    /// Like [`Dispatcher::resolve`], but a sub-operation carried by the key
    /// takes precedence over the selector parameter.
    #[tracing::instrument(name = "evolution_resolve", skip(self, params, credentials), fields(route = %key))]
    pub fn resolve_key(
        &self,
        key: &RouteKey,
        params: &ParameterBag,
        credentials: &Credentials,
    ) -> Result<RequestDescriptor, DispatchError> {
        let (operation, def) = self
            .registry
            .lookup(key.resource, &key.operation)
            .ok_or_else(|| DispatchError::UnknownOperation {
                resource: key.resource.to_string(),
                operation: key.operation.clone(),
            })?;

        if let Some(sub) = &key.sub_operation {
            if !def.is_fanout() {
                return Err(DispatchError::UnknownSubOperation {
                    operation: operation.to_string(),
                    got: sub.clone(),
                });
            }
        }

        let descriptor = def.resolve(&Resolution {
            templates: self.registry.templates(),
            params,
            credentials,
            operation,
            sub_operation: key.sub_operation.as_deref(),
        })?;
        debug!(method = %descriptor.method, url = %descriptor.url, "request resolved");
        Ok(descriptor)
    }

    /// Resolves and sends. Nothing reaches the transport when resolution fails.
    pub async fn invoke(
        &self,
        key: &RouteKey,
        params: &ParameterBag,
        credentials: &Credentials,
        transport: &dyn Transport,
    ) -> Result<Vec<Value>, DispatchError> {
        let descriptor = match self.resolve_key(key, params, credentials) {
            Ok(d) => d,
            Err(e) => {
                warn!(route = %key, "request not sent: {}", e);
                return Err(e);
            }
        };
        let response = transport.execute(&descriptor).await?;
        let records = into_records(response);
        info!(route = %key, records = records.len(), "Evolution API call completed");
        Ok(records)
    }

    /// Looks up credentials by reference, then [`Dispatcher::invoke`].
    pub async fn execute(
        &self,
        key: &RouteKey,
        params: &ParameterBag,
        store: &dyn CredentialStore,
        credential_ref: &str,
        transport: &dyn Transport,
    ) -> Result<Vec<Value>, DispatchError> {
        let credentials = store.credentials(credential_ref).await?;
        self.invoke(key, params, &credentials, transport).await
    }
}
