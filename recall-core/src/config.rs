use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A credential or endpoint needed before any network call is missing.
    #[error("Missing configuration: {0}")]
    MissingCredential(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const ENV_PROVIDER_API_KEY: &str = "ZHIPU_API_KEY";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_KEY";

/// Partition used when a caller does not name a project.
pub const GLOBAL_PROJECT: &str = "global";

/// Configuration for the retrieval engine, its provider, store and caches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Embedding and chat provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Bearer token. Falls back to `ZHIPU_API_KEY` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub embedding_model: String,
    /// Target dimensionality requested from the embedding model.
    pub dimensions: usize,
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Upper bound on a single provider HTTP call.
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// Request timeout; `0` means the default.
    pub fn timeout(&self) -> Duration {
        timeout_or_default(self.timeout_secs)
    }

    /// Returns the API key or fails before anything touches the network.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingCredential(ENV_PROVIDER_API_KEY))
    }
}

/// Document store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StorageMode {
    /// Supabase/PostgREST with a server-side similarity function
    Supabase {
        #[serde(default)]
        url: String,
        #[serde(default)]
        key: String,
    },
    /// In-process store; searches always take the full-scan path
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Supabase {
            url: String::new(),
            key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageMode,
    /// Table holding `{id, content, embedding, metadata, project_id}` rows
    pub table: String,
    /// Remote procedure implementing the server-side similarity search
    pub match_function: String,
    pub timeout_secs: u64,
}

impl StorageConfig {
    /// Request timeout; `0` means the default.
    pub fn timeout(&self) -> Duration {
        timeout_or_default(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Exclusive lower bound on similarity
    pub threshold: f32,
    pub top_k: usize,
    pub default_project: String,
}

/// Limits for one cache pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub memory_limit_bytes: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheLimits {
    pub const fn new(max_entries: usize, memory_limit_bytes: usize) -> Self {
        Self {
            max_entries,
            memory_limit_bytes,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

const MIB: usize = 1024 * 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// General-purpose pool
    pub general: CacheLimits,
    /// Normalized query/document embeddings
    pub embeddings: CacheLimits,
    /// Ranked search results
    pub search: CacheLimits,
    /// Per-user data
    pub user: CacheLimits,
    pub sweep_interval_secs: u64,
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn timeout_or_default(secs: u64) -> Duration {
    match secs {
        0 => Duration::from_secs(default_timeout_secs()),
        secs => Duration::from_secs(secs),
    }
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_table() -> String {
    "knowledge_vectors".to_string()
}

fn default_match_function() -> String {
    "match_knowledge".to_string()
}

fn default_project() -> String {
    GLOBAL_PROJECT.to_string()
}

fn default_general_limits() -> CacheLimits {
    CacheLimits::new(1000, 50 * MIB)
}

fn default_embedding_limits() -> CacheLimits {
    CacheLimits::new(500, 25 * MIB)
}

fn default_search_limits() -> CacheLimits {
    CacheLimits::new(800, 30 * MIB)
}

fn default_user_limits() -> CacheLimits {
    CacheLimits::new(300, 15 * MIB)
}

fn default_sweep_interval_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            api_key: None,
            embedding_model: "embedding-3".to_string(),
            dimensions: 1024,
            chat_model: "glm-4.7".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageMode::default(),
            table: default_table(),
            match_function: default_match_function(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            top_k: 10,
            default_project: default_project(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            general: default_general_limits(),
            embeddings: default_embedding_limits(),
            search: default_search_limits(),
            user: default_user_limits(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("config.yaml").unwrap_or_default()
    }

    /// Overlays credentials from the process environment.
    ///
    /// Values already present in the file win over the environment.
    pub fn apply_env(mut self) -> Self {
        self.apply_env_from(|name| std::env::var(name).ok());
        self
    }

    fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup(ENV_PROVIDER_API_KEY);
        }

        if let StorageMode::Supabase { url, key } = &mut self.storage.backend {
            if url.is_empty() {
                if let Some(value) = lookup(ENV_SUPABASE_URL) {
                    *url = value;
                }
            }
            if key.is_empty() {
                if let Some(value) = lookup(ENV_SUPABASE_KEY) {
                    *key = value;
                }
            }
        }
    }
}
