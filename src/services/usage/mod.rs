//! Usage & cost aggregation over the relay's counter buckets.
//!
//! A query flows through the range resolver (which periods), the reader (one
//! pipelined round trip, plus discovery for per-model buckets), the
//! normalizer (legacy field names) and the cost rollup.

mod cost;
mod error;
mod normalize;
mod range;
mod reader;

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, FixedOffset, Offset, Utc};
pub use cost::{RolledUpCost, rollup};
pub use error::UsageError;
pub use normalize::normalize;
pub use range::{MAX_CUSTOM_RANGE_DAYS, RangeResolver, ResolvedRange};
use serde::Serialize;

use super::entities::EntityDirectory;
use crate::{
    cache::{CounterStore, ReadResult},
    config::{ConfigError, UsageConfig},
    models::{
        CostSource, Dimension, RangeMode, TimeRangeSpec, UsagePoint, UsageReport, UsageTotals,
    },
    observability::metrics,
    pricing::PricingCalculator,
};

/// Source of the current instant.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Settings for [`UsageAggregator`].
#[derive(Debug, Clone)]
pub struct UsageAggregatorConfig {
    /// Offset that day, hour and month boundaries are computed in.
    pub offset: FixedOffset,
    /// Model priced when a window has tokens but no per-model buckets.
    pub fallback_model: String,
    /// Upper bound on a whole call.
    pub query_timeout: Option<Duration>,
}

impl UsageAggregatorConfig {
    pub fn from_config(config: &UsageConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            offset: config.offset()?,
            fallback_model: config.fallback_model.clone(),
            query_timeout: config.query_timeout(),
        })
    }
}

impl Default for UsageAggregatorConfig {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            fallback_model: "claude-3-5-sonnet-20241022".to_string(),
            query_timeout: None,
        }
    }
}

/// One page of entity usage.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsagePage {
    /// Ids on this page, in directory order
    pub ids: Vec<String>,
    pub usage: HashMap<String, UsageTotals>,
    pub next_cursor: Option<String>,
}

/// Read-only usage and cost queries over a counter store.
///
/// Cheap to clone; every call is independent and performs at most three
/// store round trips.
#[derive(Clone)]
pub struct UsageAggregator {
    store: Arc<dyn CounterStore>,
    pricing: Arc<dyn PricingCalculator>,
    resolver: RangeResolver,
    fallback_model: Arc<str>,
    query_timeout: Option<Duration>,
    clock: Clock,
}

impl UsageAggregator {
    pub fn new(
        store: Arc<dyn CounterStore>,
        pricing: Arc<dyn PricingCalculator>,
        config: UsageAggregatorConfig,
    ) -> Self {
        Self {
            store,
            pricing,
            resolver: RangeResolver::new(config.offset),
            fallback_model: config.fallback_model.into(),
            query_timeout: config.query_timeout,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock, mostly for tests and replays.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Usage, cost and per-model breakdown of one entity over `range`.
    ///
    /// Raw buckets that cannot be read count as zero; the rest of the window
    /// is still reported.
    #[tracing::instrument(
        skip(self, dimension, range),
        fields(dimension = %dimension, range = %range)
    )]
    pub async fn get_usage(
        &self,
        entity_id: &str,
        dimension: Dimension,
        range: &TimeRangeSpec,
    ) -> Result<UsageReport, UsageError> {
        let started = Instant::now();
        let result = self
            .bounded(self.usage_report(entity_id, dimension, range))
            .await;
        record_query("get_usage", dimension, started, &result);
        result
    }

    /// Usage totals (no cost) for many entities in one round trip.
    ///
    /// Duplicate ids are read once. An entity with any unreadable bucket
    /// reports all-zero; the batch itself still succeeds.
    #[tracing::instrument(
        skip(self, entity_ids, dimension, range),
        fields(entities = entity_ids.len(), dimension = %dimension, range = %range)
    )]
    pub async fn get_usage_batch(
        &self,
        entity_ids: &[String],
        dimension: Dimension,
        range: &TimeRangeSpec,
    ) -> Result<HashMap<String, UsageTotals>, UsageError> {
        let started = Instant::now();
        let result = self
            .bounded(self.batch_totals(entity_ids, dimension, range))
            .await;
        record_query("get_usage_batch", dimension, started, &result);
        result
    }

    /// Per-period usage of one entity for trend charts.
    ///
    /// Every period of the window is present; periods without data are zero.
    /// The lifetime range yields a single point labelled `all`.
    #[tracing::instrument(
        skip(self, dimension, range),
        fields(dimension = %dimension, range = %range)
    )]
    pub async fn get_usage_series(
        &self,
        entity_id: &str,
        dimension: Dimension,
        range: &TimeRangeSpec,
    ) -> Result<Vec<UsagePoint>, UsageError> {
        let started = Instant::now();
        let result = self
            .bounded(self.series(entity_id, dimension, range))
            .await;
        record_query("get_usage_series", dimension, started, &result);
        result
    }

    /// Fetch one page of ids from `directory` and aggregate it.
    ///
    /// Only the requested page is listed; callers walk `next_cursor`.
    #[tracing::instrument(
        skip(self, directory, dimension, range),
        fields(dimension = %dimension, range = %range)
    )]
    pub async fn get_usage_page(
        &self,
        directory: &dyn EntityDirectory,
        dimension: Dimension,
        range: &TimeRangeSpec,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<UsagePage, UsageError> {
        // Reject bad ranges before calling out to the directory
        self.resolver
            .resolve(range, RangeMode::Total, (self.clock)())?;

        let page = directory
            .list(cursor, limit)
            .await
            .map_err(|e| UsageError::DirectoryUnavailable(e.to_string()))?;
        let usage = self.get_usage_batch(&page.ids, dimension, range).await?;

        Ok(UsagePage {
            ids: page.ids,
            usage,
            next_cursor: page.next_cursor,
        })
    }

    async fn usage_report(
        &self,
        entity_id: &str,
        dimension: Dimension,
        range: &TimeRangeSpec,
    ) -> Result<UsageReport, UsageError> {
        let resolved = self
            .resolver
            .resolve(range, RangeMode::Total, (self.clock)())?;
        let store = self.store.as_ref();

        let keys = reader::bucket_keys(dimension, entity_id, &resolved);
        let results = reader::read_hashes(store, &keys).await?;
        let (mut usage, degraded) = sum_lenient(&keys, results);
        metrics::record_degraded("bucket", degraded);

        let discovered = reader::discover_model_keys(store, dimension, entity_id, &resolved).await?;
        let (model_buckets, failed) = reader::read_model_buckets(store, discovered).await?;
        metrics::record_degraded("model_bucket", failed);

        let rolled = cost::rollup(
            self.pricing.as_ref(),
            &self.fallback_model,
            model_buckets,
            &usage,
        );
        match rolled.source {
            CostSource::PerModel => usage.all_tokens = usage.component_tokens(),
            CostSource::Fallback => {
                tracing::warn!(
                    entity_id,
                    fallback_model = %self.fallback_model,
                    all_tokens = usage.all_tokens,
                    "No per-model usage found, estimating cost with fallback model"
                );
                metrics::record_fallback_cost(dimension.as_str());
            }
            CostSource::None => {}
        }

        Ok(UsageReport {
            entity_id: entity_id.to_string(),
            dimension,
            range: *range,
            usage,
            cost: rolled.cost,
            cost_source: rolled.source,
            models: rolled.models,
        })
    }

    async fn batch_totals(
        &self,
        entity_ids: &[String],
        dimension: Dimension,
        range: &TimeRangeSpec,
    ) -> Result<HashMap<String, UsageTotals>, UsageError> {
        let resolved = self
            .resolver
            .resolve(range, RangeMode::Total, (self.clock)())?;

        let ids = dedupe(entity_ids);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .flat_map(|id| reader::bucket_keys(dimension, id, &resolved))
            .collect();
        let results = reader::read_hashes(self.store.as_ref(), &keys).await?;

        let mut degraded = 0u64;
        let mut totals = HashMap::with_capacity(ids.len());
        for (id, results) in reader::split_per_entity(&ids, results, resolved.period_count()) {
            let usage = match sum_strict(results) {
                Ok(usage) => usage,
                Err(error) => {
                    degraded += 1;
                    tracing::warn!(
                        entity_id = id,
                        error = %error,
                        "Unreadable usage bucket, reporting entity as zero"
                    );
                    UsageTotals::ZERO
                }
            };
            totals.insert(id.to_string(), usage);
        }
        metrics::record_degraded("entity", degraded);

        Ok(totals)
    }

    async fn series(
        &self,
        entity_id: &str,
        dimension: Dimension,
        range: &TimeRangeSpec,
    ) -> Result<Vec<UsagePoint>, UsageError> {
        let resolved = self
            .resolver
            .resolve(range, RangeMode::Series, (self.clock)())?;

        let keys = reader::bucket_keys(dimension, entity_id, &resolved);
        let results = reader::read_hashes(self.store.as_ref(), &keys).await?;

        let labels: Vec<String> = match &resolved {
            ResolvedRange::Buckets { periods, .. } => periods.clone(),
            ResolvedRange::Lifetime => vec!["all".to_string()],
        };

        let mut degraded = 0u64;
        let points = labels
            .into_iter()
            .zip(keys.iter().zip(results))
            .map(|(period, (key, result))| {
                let usage = match result.into_hash() {
                    Ok(fields) => normalize(&fields),
                    Err(error) => {
                        degraded += 1;
                        tracing::warn!(key = %key, error = %error, "Unreadable usage bucket, reporting zero");
                        UsageTotals::ZERO
                    }
                };
                UsagePoint { period, usage }
            })
            .collect();
        metrics::record_degraded("bucket", degraded);

        Ok(points)
    }

    /// Apply the configured whole-call timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, UsageError>
    where
        F: Future<Output = Result<T, UsageError>>,
    {
        match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                UsageError::StoreUnavailable(format!(
                    "usage query timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => fut.await,
        }
    }
}

/// Sum buckets, counting unreadable ones as zero. Returns the number skipped.
fn sum_lenient(keys: &[String], results: Vec<ReadResult>) -> (UsageTotals, u64) {
    let mut degraded = 0u64;
    let total: UsageTotals = keys
        .iter()
        .zip(results)
        .map(|(key, result)| match result.into_hash() {
            Ok(fields) => normalize(&fields),
            Err(error) => {
                degraded += 1;
                tracing::warn!(key = %key, error = %error, "Unreadable usage bucket, counting as zero");
                UsageTotals::ZERO
            }
        })
        .sum();
    (total, degraded)
}

/// Sum buckets, failing on the first unreadable one.
fn sum_strict(results: Vec<ReadResult>) -> Result<UsageTotals, String> {
    results
        .into_iter()
        .map(|result| result.into_hash().map(|fields| normalize(&fields)))
        .sum()
}

/// Drop duplicate ids, keeping first-seen order.
fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

fn record_query<T>(
    operation: &str,
    dimension: Dimension,
    started: Instant,
    result: &Result<T, UsageError>,
) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.error_code(),
    };
    metrics::record_usage_query(
        operation,
        dimension.as_str(),
        outcome,
        started.elapsed().as_secs_f64(),
    );
}
