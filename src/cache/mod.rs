mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

// Public API exports
pub use error::{CacheError, CacheResult};
pub use keys::{ModelBucketKey, UsageKeys};
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{CounterStore, ReadOp, ReadResult};

use crate::config::StoreConfig;

/// Build the counter store described by `[store]`.
pub async fn connect(config: &StoreConfig) -> CacheResult<Arc<dyn CounterStore>> {
    match config {
        StoreConfig::None => Err(CacheError::NotConfigured),
        StoreConfig::Memory(memory) => {
            tracing::info!(max_entries = memory.max_entries, "Using in-memory counter store");
            Ok(Arc::new(MemoryCache::new(memory)))
        }
        #[cfg(feature = "redis")]
        StoreConfig::Redis(redis) => {
            tracing::info!(
                cluster = redis.cluster.is_some(),
                "Connecting to Redis counter store"
            );
            Ok(Arc::new(RedisCache::from_config(redis).await?))
        }
        #[cfg(not(feature = "redis"))]
        StoreConfig::Redis(_) => Err(CacheError::Internal(
            "Redis store requires the 'redis' feature".to_string(),
        )),
    }
}
