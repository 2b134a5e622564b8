//! Store access for the aggregator: every read is a single pipelined round
//! trip, plus at most one discovery call for model buckets.

use std::collections::{HashMap, HashSet};

use super::{ResolvedRange, UsageError, normalize::normalize};
use crate::{
    cache::{CounterStore, ModelBucketKey, ReadOp, ReadResult, UsageKeys},
    models::{Dimension, Granularity, UsageTotals},
    observability::metrics,
};

/// Raw bucket keys for one entity, in period order.
pub fn bucket_keys(dimension: Dimension, entity_id: &str, range: &ResolvedRange) -> Vec<String> {
    match range {
        ResolvedRange::Buckets {
            granularity,
            periods,
            ..
        } => periods
            .iter()
            .map(|period| UsageKeys::bucket(dimension, entity_id, *granularity, period))
            .collect(),
        ResolvedRange::Lifetime => vec![UsageKeys::lifetime(dimension, entity_id)],
    }
}

/// `HGETALL` every key in one pipeline. Results line up with `keys`.
///
/// No keys means no round trip.
pub async fn read_hashes(
    store: &dyn CounterStore,
    keys: &[String],
) -> Result<Vec<ReadResult>, UsageError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let ops: Vec<ReadOp> = keys.iter().cloned().map(ReadOp::HashGetAll).collect();
    metrics::record_store_round_trip("pipeline");
    let results = store.pipeline(&ops).await?;

    if results.len() != ops.len() {
        return Err(UsageError::StoreUnavailable(format!(
            "pipeline returned {} results for {} reads",
            results.len(),
            ops.len()
        )));
    }
    tracing::debug!(
        backend = store.backend(),
        reads = ops.len(),
        "Pipelined usage read"
    );
    Ok(results)
}

/// Find the model bucket keys of one entity inside `range`.
///
/// Uses a single discovery call. A single-period window uses a
/// period-specific pattern; longer windows use a wildcard and keep only keys
/// whose period belongs to the window. The lifetime window reads every
/// monthly model bucket.
pub async fn discover_model_keys(
    store: &dyn CounterStore,
    dimension: Dimension,
    entity_id: &str,
    range: &ResolvedRange,
) -> Result<Vec<(String, ModelBucketKey)>, UsageError> {
    let (granularity, wanted): (Granularity, Option<HashSet<&str>>) = match range {
        ResolvedRange::Buckets {
            granularity,
            periods,
            ..
        } => {
            if periods.is_empty() {
                return Ok(Vec::new());
            }
            (*granularity, Some(periods.iter().map(String::as_str).collect()))
        }
        ResolvedRange::Lifetime => (Granularity::Monthly, None),
    };

    let single_period = match &wanted {
        Some(set) if set.len() == 1 => set.iter().next().copied(),
        _ => None,
    };
    let pattern = UsageKeys::model_pattern(dimension, entity_id, granularity, single_period);

    metrics::record_store_round_trip("discovery");
    let keys = store.keys_matching(&pattern).await?;
    let discovered = keys.len();

    let mut matched: Vec<(String, ModelBucketKey)> = keys
        .into_iter()
        .filter_map(|key| {
            let parsed = UsageKeys::parse_model_key(&key)?;
            let in_window = parsed.dimension == dimension
                && parsed.entity_id == entity_id
                && parsed.granularity == granularity
                && wanted
                    .as_ref()
                    .is_none_or(|set| set.contains(parsed.period.as_str()));
            in_window.then_some((key, parsed))
        })
        .collect();
    matched.sort_by(|a, b| a.0.cmp(&b.0));

    tracing::debug!(
        pattern = %pattern,
        discovered,
        matched = matched.len(),
        "Discovered model buckets"
    );
    Ok(matched)
}

/// Read and normalize model buckets found by [`discover_model_keys`].
///
/// Buckets whose read failed are skipped and reported in the returned count.
pub async fn read_model_buckets(
    store: &dyn CounterStore,
    discovered: Vec<(String, ModelBucketKey)>,
) -> Result<(Vec<(String, UsageTotals)>, u64), UsageError> {
    let keys: Vec<String> = discovered.iter().map(|(key, _)| key.clone()).collect();
    let results = read_hashes(store, &keys).await?;

    let mut failed = 0u64;
    let mut buckets = Vec::with_capacity(results.len());
    for ((key, parsed), result) in discovered.into_iter().zip(results) {
        match result.into_hash() {
            Ok(fields) => buckets.push((parsed.model, normalize(&fields))),
            Err(error) => {
                failed += 1;
                tracing::warn!(key = %key, error = %error, "Skipping unreadable model bucket");
            }
        }
    }
    Ok((buckets, failed))
}

/// Group a flat result list back into per-entity slices.
pub fn split_per_entity<'a>(
    ids: &'a [String],
    results: Vec<ReadResult>,
    per_entity: usize,
) -> HashMap<&'a str, Vec<ReadResult>> {
    let mut grouped = HashMap::with_capacity(ids.len());
    let mut results = results.into_iter();
    for id in ids {
        let chunk: Vec<ReadResult> = results.by_ref().take(per_entity).collect();
        grouped.insert(id.as_str(), chunk);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        config::MemoryStoreConfig,
        models::DisplayGranularity,
    };

    fn daily(periods: &[&str]) -> ResolvedRange {
        ResolvedRange::Buckets {
            granularity: Granularity::Daily,
            periods: periods.iter().map(|p| p.to_string()).collect(),
            display: DisplayGranularity::Day,
        }
    }

    #[test]
    fn test_bucket_keys() {
        assert_eq!(
            bucket_keys(Dimension::ApiKey, "k1", &daily(&["2026-10-16", "2026-10-17"])),
            vec!["usage:daily:k1:2026-10-16", "usage:daily:k1:2026-10-17"]
        );
        assert_eq!(
            bucket_keys(Dimension::Account, "a1", &ResolvedRange::Lifetime),
            vec!["account_usage:a1"]
        );
    }

    #[tokio::test]
    async fn test_read_hashes_no_keys_no_round_trip() {
        let store = MemoryCache::new(&MemoryStoreConfig::default());
        assert!(read_hashes(&store, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_filters_to_window() {
        let store = MemoryCache::new(&MemoryStoreConfig::default());
        for key in [
            "usage:k1:model:daily:gpt-4o:2026-10-15",
            "usage:k1:model:daily:gpt-4o:2026-10-16",
            "usage:k1:model:daily:anthropic.claude-3-haiku-v1:0:2026-10-17",
            "usage:k1:model:daily:gpt-4o:2026-10-18",
            "usage:k10:model:daily:gpt-4o:2026-10-16",
            "usage:k1:model:monthly:gpt-4o:2026-10",
        ] {
            store.hash_set(key, [("requests", 1)]).unwrap();
        }

        let found = discover_model_keys(
            &store,
            Dimension::ApiKey,
            "k1",
            &daily(&["2026-10-16", "2026-10-17"]),
        )
        .await
        .unwrap();
        let models: Vec<&str> = found.iter().map(|(_, k)| k.model.as_str()).collect();
        assert_eq!(models, vec!["anthropic.claude-3-haiku-v1:0", "gpt-4o"]);
        assert!(found.iter().all(|(_, k)| k.entity_id == "k1"));
    }

    #[tokio::test]
    async fn test_discovery_single_period_and_lifetime() {
        let store = MemoryCache::new(&MemoryStoreConfig::default());
        for key in [
            "account_usage:model:daily:a1:gpt-4o:2026-10-17",
            "account_usage:model:monthly:a1:gpt-4o:2026-09",
            "account_usage:model:monthly:a1:gpt-4o:2026-10",
        ] {
            store.hash_set(key, [("requests", 1)]).unwrap();
        }

        let single = discover_model_keys(&store, Dimension::Account, "a1", &daily(&["2026-10-17"]))
            .await
            .unwrap();
        assert_eq!(single.len(), 1);

        let lifetime =
            discover_model_keys(&store, Dimension::Account, "a1", &ResolvedRange::Lifetime)
                .await
                .unwrap();
        let periods: Vec<&str> = lifetime.iter().map(|(_, k)| k.period.as_str()).collect();
        assert_eq!(periods, vec!["2026-09", "2026-10"]);
    }

    #[tokio::test]
    async fn test_read_model_buckets_skips_failures() {
        let store = MemoryCache::new(&MemoryStoreConfig::default());
        store
            .hash_set("usage:k1:model:daily:gpt-4o:2026-10-17", [("inputTokens", 10)])
            .unwrap();
        store
            .set_bytes("usage:k1:model:daily:broken:2026-10-17", b"oops")
            .unwrap();

        let discovered =
            discover_model_keys(&store, Dimension::ApiKey, "k1", &daily(&["2026-10-17"]))
                .await
                .unwrap();
        assert_eq!(discovered.len(), 2);

        let (buckets, failed) = read_model_buckets(&store, discovered).await.unwrap();
        assert_eq!(failed, 1);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0, "gpt-4o");
        assert_eq!(buckets[0].1.input_tokens, 10);
    }

    #[test]
    fn test_split_per_entity() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let results = vec![
            ReadResult::Absent,
            ReadResult::Failed("x".into()),
            ReadResult::Absent,
            ReadResult::Absent,
        ];
        let grouped = split_per_entity(&ids, results, 2);
        assert_eq!(grouped["a"].len(), 2);
        assert!(matches!(grouped["a"][1], ReadResult::Failed(_)));
        assert_eq!(grouped["b"], vec![ReadResult::Absent, ReadResult::Absent]);
    }
}
