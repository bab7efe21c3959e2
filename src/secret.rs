use dashmap::DashMap;
use dotenvy::Error as DotenvError;
use rand::{RngCore, rng};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{error, info};

/// Handle-based secret storage. A key is first exchanged for an opaque
/// handle, and only `reveal` hands out the secret itself.
#[async_trait::async_trait]
pub trait SecretsManagerType: Send + Sync {
    fn get(&self, key: &str) -> Option<u32>;
    fn keys(&self) -> Vec<String>;
    async fn reveal(&self, handle: u32) -> Result<Option<String>, SecretsError>;
    fn name(&self) -> &'static str;
    fn clone_box(&self) -> Arc<dyn SecretsManagerType>;
}

pub struct SecretsManager(pub Arc<dyn SecretsManagerType + Send + Sync>);

impl SecretsManager {
    pub async fn get_secret(&self, key: &str) -> Result<Option<String>, SecretsError> {
        match self.0.get(key) {
            Some(handle) => self.0.reveal(handle).await,
            None => Ok(None),
        }
    }
}

impl Clone for SecretsManager {
    fn clone(&self) -> Self {
        SecretsManager(self.0.clone_box())
    }
}

impl Debug for SecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretsManager {{ name: {}, keys: {:?} }}", self.0.name(), self.0.keys())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SecretsError {
    #[error("secrets I/O error: {0}")]
    Io(String),
}

/// Secrets read once from `<dir>/.env`.
#[derive(Clone)]
pub struct EnvSecretsManager {
    keys: Arc<RwLock<HashMap<String, u32>>>,
    secrets: Arc<RwLock<HashMap<u32, String>>>,
}

impl EnvSecretsManager {
    pub fn new(dotenv_dir: Option<PathBuf>) -> Arc<Self> {
        let mgr = Arc::new(Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            secrets: Arc::new(RwLock::new(HashMap::new())),
        });

        match dotenv_dir {
            Some(dir) => mgr.load_dotenv(&dir.join(".env")),
            None => info!("no .env directory given, secrets start empty"),
        }

        mgr
    }

    fn insert(&self, key: &str, secret: &str) {
        let (Ok(mut keys), Ok(mut secrets)) = (self.keys.write(), self.secrets.write()) else {
            error!("secrets lock poisoned, dropping {}", key);
            return;
        };
        let handle = *keys.entry(key.to_string()).or_insert_with(|| rng().next_u32());
        secrets.insert(handle, secret.to_string());
    }

    fn load_dotenv(&self, path: &Path) {
        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                for item in iter {
                    match item {
                        Ok((k, v)) => self.insert(&k, &v),
                        Err(e) => error!("Malformed line in {}: {}", path.display(), e),
                    }
                }
                info!("secrets loaded from {}", path.display());
            }
            Err(DotenvError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
                info!(".env file {} not found, skipping", path.display());
            }
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
            }
        }
    }
}

impl Debug for EnvSecretsManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnvSecretsManager {{ keys: {:?} }}", self.keys())
    }
}

#[async_trait::async_trait]
impl SecretsManagerType for EnvSecretsManager {
    fn get(&self, key: &str) -> Option<u32> {
        self.keys.read().ok()?.get(key).copied()
    }

    fn keys(&self) -> Vec<String> {
        self.keys
            .read()
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn reveal(&self, handle: u32) -> Result<Option<String>, SecretsError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|e| SecretsError::Io(e.to_string()))?;
        Ok(secrets.get(&handle).cloned())
    }

    fn name(&self) -> &'static str {
        "EnvSecrets"
    }

    fn clone_box(&self) -> Arc<dyn SecretsManagerType> {
        Arc::new(self.clone())
    }
}

/// In-memory secrets, for embedding hosts and tests.
pub struct MemorySecretsManager {
    handles: DashMap<String, u32>,
    secrets: DashMap<u32, String>,
    next_handle: AtomicU32,
}

impl MemorySecretsManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: DashMap::new(),
            secrets: DashMap::new(),
            next_handle: AtomicU32::new(1),
        })
    }

    pub fn with_secrets<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Arc<Self> {
        let mgr = Self::new();
        for (key, secret) in pairs {
            mgr.insert(key, secret);
        }
        mgr
    }

    fn insert(&self, key: &str, secret: &str) {
        let handle = *self
            .handles
            .entry(key.to_string())
            .or_insert_with(|| self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.secrets.insert(handle, secret.to_string());
    }
}

impl Clone for MemorySecretsManager {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
            secrets: self.secrets.clone(),
            next_handle: AtomicU32::new(self.next_handle.load(Ordering::Relaxed)),
        }
    }
}

#[async_trait::async_trait]
impl SecretsManagerType for MemorySecretsManager {
    fn get(&self, key: &str) -> Option<u32> {
        self.handles.get(key).map(|v| *v)
    }

    fn keys(&self) -> Vec<String> {
        self.handles.iter().map(|kv| kv.key().clone()).collect()
    }

    async fn reveal(&self, handle: u32) -> Result<Option<String>, SecretsError> {
        Ok(self.secrets.get(&handle).map(|v| v.clone()))
    }

    fn name(&self) -> &'static str {
        "MemorySecrets"
    }

    fn clone_box(&self) -> Arc<dyn SecretsManagerType> {
        Arc::new(self.clone())
    }
}
