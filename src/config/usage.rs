use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Usage engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageConfig {
    /// Fixed UTC offset that day, hour and month boundaries are computed in
    /// (`"+08:00"`, `"-05:00"`, `"Z"`). Must match the offset the relay
    /// stamps bucket keys with.
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset: String,

    /// Model used to estimate cost when a window has tokens but no per-model
    /// buckets.
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Upper bound on a whole usage call, in milliseconds.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            timezone_offset: default_timezone_offset(),
            fallback_model: default_fallback_model(),
            query_timeout_ms: None,
        }
    }
}

impl UsageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.offset()?;
        if self.fallback_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "usage.fallback_model cannot be empty".into(),
            ));
        }
        if self.query_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "usage.query_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The parsed display offset.
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.timezone_offset).map_err(|e| {
            ConfigError::Validation(format!("usage.timezone_offset: {e}"))
        })
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

fn default_timezone_offset() -> String {
    "+08:00".to_string()
}

fn default_fallback_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

/// Parse `±HH:MM`, `±HHMM`, `±HH` or `Z` into a fixed offset.
///
/// The shape is checked here; chrono's parser does the arithmetic and range
/// checks but tolerates trailing input.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let invalid = || format!("invalid UTC offset '{s}', expected ±HH:MM");
    let body = s.strip_prefix(['+', '-']).ok_or_else(invalid)?;
    let is_digit_at = |i: usize| body.as_bytes()[i].is_ascii_digit();
    let well_formed = match body.len() {
        2 | 4 => (0..body.len()).all(is_digit_at),
        5 => body.as_bytes()[2] == b':' && [0, 1, 3, 4].into_iter().all(is_digit_at),
        _ => false,
    };
    if !well_formed {
        return Err(invalid());
    }

    // chrono requires minutes.
    let full = if body.len() == 2 {
        format!("{s}00")
    } else {
        s.to_string()
    };
    full.parse::<FixedOffset>().map_err(|_| invalid())
}
