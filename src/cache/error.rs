use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Counter store not configured")]
    NotConfigured,

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
