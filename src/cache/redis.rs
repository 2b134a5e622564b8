use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use redis::{
    ConnectionInfo, IntoConnectionInfo, RedisError, RedisResult, Value,
    aio::MultiplexedConnection, cluster::ClusterClient, cluster_async::ClusterConnection,
};

use super::{
    error::{CacheError, CacheResult},
    keys::escape_glob,
    traits::{CounterStore, ReadOp, ReadResult},
};
use crate::config::RedisStoreConfig;

/// A wrapper enum for either a standalone or cluster Redis connection.
/// Both connection types implement the `AsyncCommands` trait, so we can use
/// the same command syntax for both.
#[derive(Clone)]
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Execute a Redis command on either connection type.
macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

/// Internal enum to hold either a standalone or cluster Redis client.
enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

/// Counter store reading the relay's usage hashes from Redis.
pub struct RedisCache {
    connection: RedisConnection,
    key_prefix: String,
    connect_timeout: Duration,
}

impl RedisCache {
    pub async fn from_config(config: &RedisStoreConfig) -> CacheResult<Self> {
        let connection = if let Some(cluster_config) = &config.cluster {
            // Cluster mode: parse nodes from URL (comma-separated)
            // e.g., "redis://host1:6379,host2:6379,host3:6379"
            let nodes: Vec<ConnectionInfo> = config
                .url
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    let node_url = if s.starts_with("redis://") || s.starts_with("rediss://") {
                        s.to_string()
                    } else {
                        format!("redis://{}", s)
                    };
                    node_url.into_connection_info()
                })
                .collect::<Result<Vec<_>, _>>()?;

            if nodes.is_empty() {
                return Err(CacheError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "No cluster nodes specified in URL",
                ))));
            }

            let mut builder = redis::cluster::ClusterClientBuilder::new(nodes);
            if cluster_config.read_from_replicas {
                builder = builder.read_from_replicas();
            }
            builder = builder.retries(cluster_config.retries);
            builder = builder
                .connection_timeout(Duration::from_secs(cluster_config.connection_timeout_secs));
            builder =
                builder.response_timeout(Duration::from_secs(cluster_config.response_timeout_secs));

            RedisConnection::Cluster(builder.build()?)
        } else {
            RedisConnection::Standalone(redis::Client::open(config.url.as_str())?)
        };

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn strip_prefix(&self, key: String) -> Option<String> {
        if self.key_prefix.is_empty() {
            return Some(key);
        }
        key.strip_prefix(self.key_prefix.as_str()).map(str::to_string)
    }

    /// Get a Redis connection, either standalone or cluster.
    async fn get_connection(&self) -> CacheResult<RedisConn> {
        match &self.connection {
            RedisConnection::Standalone(client) => {
                let conn = tokio::time::timeout(
                    self.connect_timeout,
                    client.get_multiplexed_async_connection(),
                )
                .await
                .map_err(|_| {
                    CacheError::Redis(redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "Timed out connecting to Redis",
                    )))
                })??;
                Ok(RedisConn::Standalone(conn))
            }
            RedisConnection::Cluster(client) => {
                let conn = client.get_async_connection().await?;
                Ok(RedisConn::Cluster(conn))
            }
        }
    }
}

/// Decode an `HGETALL` reply (RESP2 flat array or RESP3 map).
fn parse_hash(value: Value) -> ReadResult {
    let mut fields = HashMap::new();
    match value {
        Value::Nil => return ReadResult::Absent,
        Value::Array(items) => {
            let mut iter = items.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                if let (Some(k), Some(v)) = (value_to_string(k), value_to_string(v)) {
                    fields.insert(k, v);
                }
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                if let (Some(k), Some(v)) = (value_to_string(k), value_to_string(v)) {
                    fields.insert(k, v);
                }
            }
        }
        Value::ServerError(err) => return ReadResult::Failed(format!("{err:?}")),
        other => return ReadResult::Failed(format!("unexpected HGETALL reply: {other:?}")),
    }

    if fields.is_empty() {
        ReadResult::Absent
    } else {
        ReadResult::Hash(fields)
    }
}

/// Decode a `GET` reply.
fn parse_bytes(value: Value) -> ReadResult {
    match value {
        Value::Nil => ReadResult::Absent,
        Value::BulkString(bytes) => ReadResult::Bytes(bytes),
        Value::SimpleString(s) => ReadResult::Bytes(s.into_bytes()),
        Value::Int(n) => ReadResult::Bytes(n.to_string().into_bytes()),
        Value::ServerError(err) => ReadResult::Failed(format!("{err:?}")),
        other => ReadResult::Failed(format!("unexpected GET reply: {other:?}")),
    }
}

/// Decode one command's reply into its pipeline slot.
///
/// A WRONGTYPE rejection of the key itself becomes [`ReadResult::Failed`];
/// connection, auth and protocol errors fail the whole read.
fn slot_result(op: &ReadOp, reply: RedisResult<Value>) -> CacheResult<ReadResult> {
    match reply {
        Ok(value) => Ok(match op {
            ReadOp::Get(_) => parse_bytes(value),
            ReadOp::HashGetAll(_) => parse_hash(value),
        }),
        Err(e) if is_key_rejection(&e) => Ok(ReadResult::Failed(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

fn is_key_rejection(error: &RedisError) -> bool {
    error.code() == Some("WRONGTYPE")
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(s) => Some(s),
        Value::Int(n) => Some(n.to_string()),
        Value::Double(f) => Some(f.to_string()),
        _ => None,
    }
}

#[async_trait]
impl CounterStore for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let data: Option<Vec<u8>> = redis_cmd!(conn, redis::cmd("GET").arg(&full_key))?;

        Ok(data)
    }

    async fn hash_get_all(&self, key: &str) -> CacheResult<Option<HashMap<String, String>>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let fields: HashMap<String, String> =
            redis_cmd!(conn, redis::cmd("HGETALL").arg(&full_key))?;

        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    async fn pipeline(&self, ops: &[ReadOp]) -> CacheResult<Vec<ReadResult>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_connection().await?;

        // All commands are in flight at once on the multiplexed connection,
        // so the batch costs one round trip. Replies are decoded one by one:
        // a WRONGTYPE on one key stays in that key's slot.
        let replies = join_all(ops.iter().map(|op| {
            let mut conn = conn.clone();
            let (name, key) = match op {
                ReadOp::Get(key) => ("GET", key),
                ReadOp::HashGetAll(key) => ("HGETALL", key),
            };
            let full_key = self.prefixed_key(key);
            async move {
                let reply: RedisResult<Value> = redis_cmd!(conn, redis::cmd(name).arg(&full_key));
                reply
            }
        }))
        .await;

        ops.iter()
            .zip(replies)
            .map(|(op, reply)| slot_result(op, reply))
            .collect()
    }

    async fn keys_matching(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let full_pattern = format!("{}{}", escape_glob(&self.key_prefix), pattern);

        let keys: Vec<String> = redis_cmd!(conn, redis::cmd("KEYS").arg(&full_pattern))?;

        let mut keys: Vec<String> = keys
            .into_iter()
            .filter_map(|k| self.strip_prefix(k))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_hash_resp2_array() {
        let reply = Value::Array(vec![bulk("requests"), bulk("3"), bulk("inputTokens"), bulk("10")]);
        match parse_hash(reply) {
            ReadResult::Hash(fields) => {
                assert_eq!(fields["requests"], "3");
                assert_eq!(fields["inputTokens"], "10");
            }
            other => panic!("expected hash, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_hash_resp3_map() {
        let reply = Value::Map(vec![(bulk("requests"), Value::Int(7))]);
        match parse_hash(reply) {
            ReadResult::Hash(fields) => assert_eq!(fields["requests"], "7"),
            other => panic!("expected hash, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_hash_empty_is_absent() {
        assert_eq!(parse_hash(Value::Array(vec![])), ReadResult::Absent);
        assert_eq!(parse_hash(Value::Nil), ReadResult::Absent);
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes(Value::Nil), ReadResult::Absent);
        assert_eq!(parse_bytes(bulk("12")), ReadResult::Bytes(b"12".to_vec()));
        assert!(matches!(
            parse_bytes(Value::Array(vec![])),
            ReadResult::Failed(_)
        ));
    }

    #[test]
    fn test_wrongtype_reply_stays_in_its_slot() {
        let reply = redis::parse_redis_value(
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
        )
        .and_then(Value::extract_error);
        assert!(reply.is_err());

        let slot = slot_result(&ReadOp::HashGetAll("usage:daily:k1:2026-10-17".into()), reply)
            .unwrap();
        assert!(matches!(slot, ReadResult::Failed(_)));
    }

    #[test]
    fn test_hash_reply_decodes_into_slot() {
        let reply = redis::parse_redis_value(b"*2\r\n$8\r\nrequests\r\n$1\r\n5\r\n");
        let slot = slot_result(&ReadOp::HashGetAll("usage:k1".into()), reply).unwrap();
        assert!(matches!(&slot, ReadResult::Hash(m) if m["requests"] == "5"));
    }

    #[test]
    fn test_transport_and_auth_errors_fail_the_read() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            slot_result(&ReadOp::Get("k".into()), Err(RedisError::from(io))),
            Err(CacheError::Redis(_))
        ));

        let noauth =
            redis::make_extension_error("NOAUTH".into(), Some("Authentication required.".into()));
        assert!(slot_result(&ReadOp::HashGetAll("k".into()), Err(noauth)).is_err());
    }

    mod integration {
        use super::*;
        use crate::cache::tests::redis::create_redis_container;

        async fn connect(url: &str, prefix: &str) -> RedisCache {
            RedisCache::from_config(&RedisStoreConfig {
                url: url.to_string(),
                key_prefix: prefix.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
        }

        async fn raw_conn(url: &str) -> MultiplexedConnection {
            redis::Client::open(url)
                .unwrap()
                .get_multiplexed_async_connection()
                .await
                .unwrap()
        }

        // Run with: cargo test -- --ignored

        #[tokio::test]
        #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
        async fn test_redis_pipeline_reads_hashes_in_order() {
            let (url, _container) = create_redis_container().await;
            let mut raw = raw_conn(&url).await;
            let _: () = redis::cmd("HSET")
                .arg("t:usage:daily:k1:2026-10-17")
                .arg("requests")
                .arg(4)
                .arg("inputTokens")
                .arg(100)
                .query_async(&mut raw)
                .await
                .unwrap();
            let _: () = redis::cmd("SET")
                .arg("t:usage:daily:k2:2026-10-17")
                .arg("oops")
                .query_async(&mut raw)
                .await
                .unwrap();

            let store = connect(&url, "t:").await;
            let results = store
                .pipeline(&[
                    ReadOp::HashGetAll("usage:daily:k2:2026-10-17".into()),
                    ReadOp::HashGetAll("usage:daily:k1:2026-10-17".into()),
                    ReadOp::HashGetAll("usage:daily:k3:2026-10-17".into()),
                ])
                .await
                .unwrap();

            assert!(matches!(results[0], ReadResult::Failed(_)));
            assert!(matches!(&results[1], ReadResult::Hash(m) if m["requests"] == "4"));
            assert_eq!(results[2], ReadResult::Absent);
        }

        #[tokio::test]
        #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
        async fn test_redis_keys_matching_strips_prefix() {
            let (url, _container) = create_redis_container().await;
            let mut raw = raw_conn(&url).await;
            let _: () = redis::cmd("HSET")
                .arg("t:usage:k1:model:daily:gpt-4o:2026-10-17")
                .arg("inputTokens")
                .arg(1)
                .query_async(&mut raw)
                .await
                .unwrap();

            let store = connect(&url, "t:").await;
            let keys = store
                .keys_matching("usage:k1:model:daily:*")
                .await
                .unwrap();
            assert_eq!(keys, vec!["usage:k1:model:daily:gpt-4o:2026-10-17".to_string()]);
        }
    }
}
