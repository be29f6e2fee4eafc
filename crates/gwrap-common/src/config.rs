use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Final, merged runtime configuration.
///
/// Merge order: defaults < YAML file < environment. Every field has a
/// default, so the proxy starts with no config file at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub costs: CostsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Versioned API root, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_uri")]
    pub uri: String,
    #[serde(default = "default_redis_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SeaORM DSN for the audit store (sqlite/postgres/mysql).
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_csv_path")]
    pub csv_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Requests with effective temperature above this cutoff bypass the cache.
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostsConfig {
    /// Policy ceiling in USD; zero or negative disables the gate.
    #[serde(default)]
    pub max_cost: f64,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// Unit prices are USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub input: f64,
    pub output: f64,
}

impl Config {
    /// Load from a YAML file, then apply environment overrides. A missing
    /// file is not an error; the defaults stand in for it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&data)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_override("PORT", &mut self.server.port);
        env_override("UPSTREAM_BASE_URL", &mut self.upstream.base_url);
        env_override("UPSTREAM_TIMEOUT", &mut self.upstream.timeout_secs);
        env_override("REDIS_URI", &mut self.redis.uri);
        env_override("REDIS_TTL", &mut self.redis.ttl_secs);
        env_override("DATABASE_DSN", &mut self.storage.dsn);
        env_override("KEYS_CSV", &mut self.keys.csv_path);
    }

    pub fn model_names(&self) -> Vec<String> {
        self.costs
            .models
            .iter()
            .map(|model| model.name.clone())
            .collect()
    }
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(value) = std::env::var(key)
        && !value.is_empty()
        && let Ok(parsed) = value.parse::<T>()
    {
        *slot = parsed;
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            uri: default_redis_uri(),
            ttl_secs: default_redis_ttl(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_temp: default_max_temp(),
        }
    }
}

fn default_port() -> u16 {
    8089
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_upstream_timeout() -> u64 {
    120
}

fn default_redis_uri() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_ttl() -> u64 {
    3600
}

fn default_dsn() -> String {
    "sqlite://data/gwrap.db?mode=rwc".to_string()
}

fn default_csv_path() -> String {
    "data/keys.csv".to_string()
}

fn default_max_temp() -> f64 {
    0.3
}
