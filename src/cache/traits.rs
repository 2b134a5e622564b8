use std::collections::HashMap;

use async_trait::async_trait;

use super::error::CacheResult;

/// A single point read carried inside a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOp {
    /// Plain string value (`GET`)
    Get(String),
    /// All fields of a hash (`HGETALL`)
    HashGetAll(String),
}

impl ReadOp {
    pub fn key(&self) -> &str {
        match self {
            ReadOp::Get(key) | ReadOp::HashGetAll(key) => key,
        }
    }
}

/// Result of one [`ReadOp`], in the same position as the op in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Key does not exist (or the hash is empty)
    Absent,
    /// Raw bytes for a `Get`
    Bytes(Vec<u8>),
    /// Field map for a `HashGetAll`
    Hash(HashMap<String, String>),
    /// The store rejected this single op (e.g. the key holds another type).
    /// The rest of the pipeline is unaffected.
    Failed(String),
}

impl ReadResult {
    /// Hash fields, treating an absent key as an empty record.
    ///
    /// Returns `Err` with the store message when the op failed or produced a
    /// non-hash value.
    pub fn into_hash(self) -> Result<HashMap<String, String>, String> {
        match self {
            ReadResult::Absent => Ok(HashMap::new()),
            ReadResult::Hash(fields) => Ok(fields),
            ReadResult::Bytes(_) => Err("expected hash, got string value".to_string()),
            ReadResult::Failed(msg) => Err(msg),
        }
    }
}

/// Read side of the counter store.
///
/// Counters are written by the relay path; this crate only ever reads them.
/// Every method is one round trip to the store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Get a raw string value.
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Get all fields of a hash. Returns `None` if the key does not exist.
    async fn hash_get_all(&self, key: &str) -> CacheResult<Option<HashMap<String, String>>>;

    /// Execute many point reads in a single round trip.
    ///
    /// Results are returned in the same order as `ops`. A failure of the
    /// transport fails the whole call; a failure of one op is reported as
    /// [`ReadResult::Failed`] in its slot.
    async fn pipeline(&self, ops: &[ReadOp]) -> CacheResult<Vec<ReadResult>>;

    /// Enumerate keys matching a glob pattern (`*` and `?` wildcards).
    ///
    /// Best effort: may be slow on large keyspaces, so callers invoke it at
    /// most once per resolved window.
    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Backend name for logs and metrics.
    fn backend(&self) -> &'static str;
}
