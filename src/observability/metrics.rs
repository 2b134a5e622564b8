//! Prometheus metrics for the usage engine.
//!
//! Provides metrics for:
//! - Query counts and latency per operation
//! - Store round trips
//! - Degraded buckets/entities and fallback pricing

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Render the current metrics in Prometheus text format, if initialized.
pub fn render() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        PROMETHEUS_HANDLE.get().map(|handle| handle.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record one aggregator call.
///
/// `outcome` is `"ok"` or the error code of the failure.
pub fn record_usage_query(operation: &str, dimension: &str, outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "usage_queries_total",
            "operation" => operation.to_string(),
            "dimension" => dimension.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!("usage_query_duration_seconds", "operation" => operation.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (operation, dimension, outcome, duration_secs);
    }
}

/// Record a store round trip (`pipeline` or `discovery`).
pub fn record_store_round_trip(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("usage_store_round_trips_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record buckets or entities that degraded to zero (`bucket`, `model_bucket`
/// or `entity`).
pub fn record_degraded(scope: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        if count > 0 {
            counter!("usage_degraded_total", "scope" => scope.to_string()).increment(count);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (scope, count);
    }
}

/// Record a cost estimated with the fallback model.
pub fn record_fallback_cost(dimension: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("usage_fallback_cost_total", "dimension" => dimension.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = dimension;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
