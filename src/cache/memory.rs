use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;

use super::{
    error::{CacheError, CacheResult},
    traits::{CounterStore, ReadOp, ReadResult},
};
use crate::config::MemoryStoreConfig;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

enum Entry {
    String(Vec<u8>),
    Hash(HashMap<String, String>),
}

/// In-memory counter store backed by a `DashMap`.
///
/// Mirrors the subset of Redis semantics the engine relies on: missing keys
/// read as absent, reading a hash from a string key fails that single op with
/// `WRONGTYPE`, and pipelines preserve op order.
///
/// # Multi-Node Deployments
///
/// Each process holds its own copy of the data, so this store only sees
/// counters written by the same process. Use Redis for anything shared.
pub struct MemoryCache {
    data: DashMap<String, Entry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryStoreConfig) -> Self {
        Self {
            data: DashMap::new(),
            max_entries: config.max_entries,
        }
    }

    fn ensure_capacity(&self, key: &str) -> CacheResult<()> {
        if self.data.len() >= self.max_entries && !self.data.contains_key(key) {
            return Err(CacheError::Internal(format!(
                "memory store is full ({} entries)",
                self.max_entries
            )));
        }
        Ok(())
    }

    /// Store a plain string value.
    pub fn set_bytes(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        self.ensure_capacity(key)?;
        self.data
            .insert(key.to_string(), Entry::String(value.to_vec()));
        Ok(())
    }

    /// Set hash fields, creating the hash if needed.
    pub fn hash_set<K, V>(&self, key: &str, fields: impl IntoIterator<Item = (K, V)>) -> CacheResult<()>
    where
        K: Into<String>,
        V: ToString,
    {
        self.ensure_capacity(key)?;
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry.value_mut() {
            Entry::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field.into(), value.to_string());
                }
                Ok(())
            }
            Entry::String(_) => Err(CacheError::Internal(WRONGTYPE.to_string())),
        }
    }

    /// Increment an integer hash field, the way the relay path writes counters.
    pub fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        self.ensure_capacity(key)?;
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry.value_mut() {
            Entry::Hash(map) => {
                let current = map
                    .get(field)
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                let updated = current.saturating_add(delta);
                map.insert(field.to_string(), updated.to_string());
                Ok(updated)
            }
            Entry::String(_) => Err(CacheError::Internal(WRONGTYPE.to_string())),
        }
    }

    pub fn delete(&self, key: &str) {
        self.data.remove(key);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn read(&self, op: &ReadOp) -> ReadResult {
        let Some(entry) = self.data.get(op.key()) else {
            return ReadResult::Absent;
        };
        match (op, entry.value()) {
            (ReadOp::Get(_), Entry::String(bytes)) => ReadResult::Bytes(bytes.clone()),
            (ReadOp::HashGetAll(_), Entry::Hash(map)) if map.is_empty() => ReadResult::Absent,
            (ReadOp::HashGetAll(_), Entry::Hash(map)) => ReadResult::Hash(map.clone()),
            _ => ReadResult::Failed(WRONGTYPE.to_string()),
        }
    }
}

/// Translate a Redis-style glob (`*`, `?`, `\` escapes) into an anchored regex.
fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| CacheError::Internal(format!("invalid key pattern: {e}")))
}

#[async_trait]
impl CounterStore for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        match self.read(&ReadOp::Get(key.to_string())) {
            ReadResult::Bytes(bytes) => Ok(Some(bytes)),
            ReadResult::Absent => Ok(None),
            ReadResult::Failed(msg) => Err(CacheError::Internal(msg)),
            ReadResult::Hash(_) => Err(CacheError::Internal(WRONGTYPE.to_string())),
        }
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<Option<HashMap<String, String>>> {
        match self.read(&ReadOp::HashGetAll(key.to_string())) {
            ReadResult::Hash(fields) => Ok(Some(fields)),
            ReadResult::Absent => Ok(None),
            ReadResult::Failed(msg) => Err(CacheError::Internal(msg)),
            ReadResult::Bytes(_) => Err(CacheError::Internal(WRONGTYPE.to_string())),
        }
    }

    async fn pipeline(&self, ops: &[ReadOp]) -> CacheResult<Vec<ReadResult>> {
        Ok(ops.iter().map(|op| self.read(op)).collect())
    }

    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let re = glob_to_regex(pattern)?;
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|entry| re.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
