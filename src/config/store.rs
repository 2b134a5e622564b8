use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Counter store configuration.
///
/// The store holds the usage hashes written by the relay path. This crate
/// only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum StoreConfig {
    /// No store. Usage queries cannot run.
    #[default]
    None,

    /// In-memory store. Only sees counters written by the same process,
    /// so it is meant for local mode and tests.
    Memory(MemoryStoreConfig),

    /// Redis store. What the relay writes to in every real deployment.
    Redis(RedisStoreConfig),
}

impl StoreConfig {
    pub fn is_none(&self) -> bool {
        matches!(self, StoreConfig::None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StoreConfig::None => Ok(()),
            StoreConfig::Memory(c) => c.validate(),
            StoreConfig::Redis(c) => c.validate(),
        }
    }
}

/// In-memory store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryStoreConfig {
    /// Maximum number of keys held.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl MemoryStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Memory store max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_entries() -> usize {
    100_000
}

/// Redis store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStoreConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    /// For clusters: comma-separated node URLs plus a `[store.cluster]` table.
    pub url: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_redis_timeout")]
    pub connect_timeout_secs: u64,

    /// Prefix prepended to every key. Must match the prefix the relay
    /// writes with (empty by default).
    #[serde(default)]
    pub key_prefix: String,

    /// Cluster mode configuration.
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_secs: default_redis_timeout(),
            key_prefix: String::new(),
            cluster: None,
        }
    }
}

impl RedisStoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

/// Redis cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    /// Read from replicas for read operations.
    #[serde(default)]
    pub read_from_replicas: bool,

    /// Number of retries for cluster operations.
    #[serde(default = "default_cluster_retries")]
    pub retries: u32,

    /// Connection timeout for cluster nodes in seconds.
    #[serde(default = "default_cluster_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Response timeout for cluster operations in seconds.
    #[serde(default = "default_cluster_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_redis_timeout() -> u64 {
    5
}

fn default_cluster_retries() -> u32 {
    3
}

fn default_cluster_connection_timeout() -> u64 {
    5
}

fn default_cluster_response_timeout() -> u64 {
    1
}
