mod config;

pub use config::{
    CacheConfig, Config, ConfigError, CostsConfig, KeysConfig, ModelConfig, RedisConfig,
    ServerConfig, StorageConfig, UpstreamConfig,
};
