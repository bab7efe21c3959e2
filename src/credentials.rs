use std::fmt;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::error::DispatchError;
use crate::secret::SecretsManager;

/// Server URL and API key of one Evolution API deployment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    server_url: String,
    api_key: String,
}

impl Credentials {
    /// Trailing slashes are dropped from the server URL.
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let server_url = server_url.into();
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url)
            .field("api_key", &"*******")
            .finish()
    }
}

/// Looks up credentials by reference name.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, reference: &str) -> Result<Credentials, DispatchError>;
}

/// Reads `<REF>_SERVER_URL` and `<REF>_APIKEY` from a secrets manager.
#[derive(Debug, Clone)]
pub struct SecretsCredentialStore {
    secrets: SecretsManager,
}

impl SecretsCredentialStore {
    pub fn new(secrets: SecretsManager) -> Self {
        Self { secrets }
    }

    pub fn secret_keys(reference: &str) -> (String, String) {
        let prefix = reference.to_uppercase().replace('-', "_");
        (format!("{prefix}_SERVER_URL"), format!("{prefix}_APIKEY"))
    }

    async fn non_empty(&self, reference: &str, key: &str) -> Result<String, DispatchError> {
        match self.secrets.get_secret(key).await {
            Ok(Some(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            Ok(_) => {
                warn!(credential = reference, "secret {} is missing or empty", key);
                Err(DispatchError::CredentialUnavailable(reference.to_string()))
            }
            Err(e) => {
                warn!(credential = reference, "secret {} could not be revealed: {}", key, e);
                Err(DispatchError::CredentialUnavailable(reference.to_string()))
            }
        }
    }
}

#[async_trait]
impl CredentialStore for SecretsCredentialStore {
    async fn credentials(&self, reference: &str) -> Result<Credentials, DispatchError> {
        let (url_key, api_key_key) = Self::secret_keys(reference);
        let server_url = self.non_empty(reference, &url_key).await?;
        let api_key = self.non_empty(reference, &api_key_key).await?;

        if let Err(e) = Url::parse(&server_url) {
            warn!(credential = reference, "server URL {} is invalid: {}", server_url, e);
            return Err(DispatchError::CredentialUnavailable(reference.to_string()));
        }

        Ok(Credentials::new(server_url, api_key))
    }
}
