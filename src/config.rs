use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, path::PathBuf};
use tracing::{info, warn};

pub const TIMEOUT_KEY: &str = "EVOLUTION_TIMEOUT_SECS";
pub const USER_AGENT_KEY: &str = "EVOLUTION_USER_AGENT";
pub const CREDENTIAL_KEY: &str = "EVOLUTION_CREDENTIAL";

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CREDENTIAL: &str = "evolution";

#[async_trait::async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Process environment, seeded once from an optional `.env` file. Read-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: Option<PathBuf>,
}

impl EnvConfigManager {
    pub fn new(env_file: Option<PathBuf>) -> Box<Self> {
        match &env_file {
            Some(path) if path.exists() => match dotenvy::from_path(path) {
                Ok(()) => info!("Loaded .env from {}", path.display()),
                Err(e) => warn!("could not load .env from {}: {}", path.display(), e),
            },
            Some(path) => info!("no .env at {}, using process environment", path.display()),
            None => {}
        }
        Box::new(Self { env_file })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        match &self.env_file {
            Some(path) => format!("EnvConfigManager({})", path.display()),
            None => "EnvConfigManager".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MapConfigManager {
    #[schemars(with = "std::collections::HashMap<String, String>")]
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let mgr = Self::new();
        for (k, v) in entries {
            mgr.map.insert(k.to_string(), v.to_string());
        }
        mgr
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Transport and credential settings of the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub credential: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: default_user_agent(),
            credential: DEFAULT_CREDENTIAL.to_string(),
        }
    }
}

pub fn default_user_agent() -> String {
    format!("evolution-node/{}", env!("CARGO_PKG_VERSION"))
}

impl NodeSettings {
    /// Unset or unparsable values fall back to the defaults.
    pub async fn load(config: &ConfigManager) -> Self {
        let mut settings = Self::default();

        if let Some(raw) = config.0.get(TIMEOUT_KEY).await {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => settings.timeout_secs = secs,
                _ => warn!("ignoring invalid {}={:?}", TIMEOUT_KEY, raw),
            }
        }
        if let Some(agent) = config.0.get(USER_AGENT_KEY).await.filter(|s| !s.trim().is_empty()) {
            settings.user_agent = agent;
        }
        if let Some(credential) = config.0.get(CREDENTIAL_KEY).await.filter(|s| !s.trim().is_empty()) {
            settings.credential = credential;
        }

        settings
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
