use chrono::NaiveDate;
use http::StatusCode;
use thiserror::Error;

use crate::cache::CacheError;

/// Errors returned by the usage aggregator.
///
/// Degraded buckets and entities are not errors: they read as zero and are
/// logged and counted instead.
#[derive(Debug, Error)]
pub enum UsageError {
    /// `custom` range whose start is after its end. Nothing was read.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// `custom` range spanning more days than allowed. Nothing was read.
    #[error("Range too large: {days} days requested, at most {max} allowed")]
    RangeTooLarge { days: i64, max: i64 },

    /// The counter store could not be reached, failed a round trip, or the
    /// query timed out. No partial results are returned.
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// The entity directory failed to list a page.
    #[error("Entity directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl UsageError {
    /// HTTP status an API surface should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UsageError::InvalidRange { .. } | UsageError::RangeTooLarge { .. } => {
                StatusCode::BAD_REQUEST
            }
            UsageError::StoreUnavailable(_) | UsageError::DirectoryUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Stable machine-readable code, also used as the metrics outcome label.
    pub fn error_code(&self) -> &'static str {
        match self {
            UsageError::InvalidRange { .. } => "invalid_range",
            UsageError::RangeTooLarge { .. } => "range_too_large",
            UsageError::StoreUnavailable(_) => "store_unavailable",
            UsageError::DirectoryUnavailable(_) => "directory_unavailable",
        }
    }
}

impl From<CacheError> for UsageError {
    fn from(err: CacheError) -> Self {
        UsageError::StoreUnavailable(err.to_string())
    }
}
