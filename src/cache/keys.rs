use chrono::{NaiveDate, NaiveDateTime, Timelike};

use crate::models::{Dimension, Granularity};

/// Key prefix for API key counters.
const KEY_PREFIX: &str = "usage";
/// Key prefix for upstream account counters.
const ACCOUNT_PREFIX: &str = "account_usage";

/// A parsed per-model bucket key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBucketKey {
    pub dimension: Dimension,
    pub entity_id: String,
    pub granularity: Granularity,
    pub model: String,
    pub period: String,
}

/// Usage counter key layout, shared with the relay path that writes the
/// counters.
///
/// | Row                  | Key                                                       |
/// |----------------------|-----------------------------------------------------------|
/// | key bucket           | `usage:{granularity}:{id}:{period}`                       |
/// | key lifetime         | `usage:{id}`                                              |
/// | key model bucket     | `usage:{id}:model:{granularity}:{model}:{period}`         |
/// | account bucket       | `account_usage:{granularity}:{id}:{period}`               |
/// | account lifetime     | `account_usage:{id}`                                      |
/// | account model bucket | `account_usage:model:{granularity}:{id}:{model}:{period}` |
///
/// Entity ids never contain `:`. Model names may (Bedrock ids end in
/// `-v2:0`), so the period is always parsed from the tail.
///
/// The writer does not use hash tags, so in cluster mode the keys of one read
/// span many slots; each command is routed to its own node.
pub struct UsageKeys;

impl UsageKeys {
    fn prefix(dimension: Dimension) -> &'static str {
        match dimension {
            Dimension::ApiKey => KEY_PREFIX,
            Dimension::Account => ACCOUNT_PREFIX,
        }
    }

    /// Periodic bucket: `usage:daily:{id}:2026-10-17`
    pub fn bucket(
        dimension: Dimension,
        entity_id: &str,
        granularity: Granularity,
        period: &str,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            Self::prefix(dimension),
            granularity.as_str(),
            entity_id,
            period
        )
    }

    /// Lifetime running totals: `usage:{id}`
    pub fn lifetime(dimension: Dimension, entity_id: &str) -> String {
        format!("{}:{}", Self::prefix(dimension), entity_id)
    }

    /// Per-model bucket within an entity.
    pub fn model_bucket(
        dimension: Dimension,
        entity_id: &str,
        granularity: Granularity,
        model: &str,
        period: &str,
    ) -> String {
        match dimension {
            Dimension::ApiKey => format!(
                "{KEY_PREFIX}:{entity_id}:model:{}:{model}:{period}",
                granularity.as_str()
            ),
            Dimension::Account => format!(
                "{ACCOUNT_PREFIX}:model:{}:{entity_id}:{model}:{period}",
                granularity.as_str()
            ),
        }
    }

    /// Discovery glob for the model buckets of one window.
    ///
    /// With `Some(period)` only that period matches; with `None` every period
    /// of the granularity matches and callers filter the results.
    pub fn model_pattern(
        dimension: Dimension,
        entity_id: &str,
        granularity: Granularity,
        period: Option<&str>,
    ) -> String {
        let id = escape_glob(entity_id);
        let tail = match period {
            Some(period) => format!("*:{}", escape_glob(period)),
            None => "*".to_string(),
        };
        match dimension {
            Dimension::ApiKey => {
                format!("{KEY_PREFIX}:{id}:model:{}:{tail}", granularity.as_str())
            }
            Dimension::Account => {
                format!("{ACCOUNT_PREFIX}:model:{}:{id}:{tail}", granularity.as_str())
            }
        }
    }

    /// Parse a per-model bucket key. Returns `None` for anything else.
    pub fn parse_model_key(key: &str) -> Option<ModelBucketKey> {
        let (dimension, rest) = split_prefix(key)?;
        let (entity_id, granularity, rest) = match dimension {
            Dimension::ApiKey => {
                let (entity_id, rest) = rest.split_once(':')?;
                let rest = rest.strip_prefix("model:")?;
                let (gran, rest) = rest.split_once(':')?;
                (entity_id, Granularity::from_str_opt(gran)?, rest)
            }
            Dimension::Account => {
                let rest = rest.strip_prefix("model:")?;
                let (gran, rest) = rest.split_once(':')?;
                let (entity_id, rest) = rest.split_once(':')?;
                (entity_id, Granularity::from_str_opt(gran)?, rest)
            }
        };

        let (model, period) = split_period_tail(rest, granularity)?;
        if entity_id.is_empty() || model.is_empty() {
            return None;
        }
        Some(ModelBucketKey {
            dimension,
            entity_id: entity_id.to_string(),
            granularity,
            model: model.to_string(),
            period: period.to_string(),
        })
    }

    /// `YYYY-MM-DD`
    pub fn daily_period(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    /// `YYYY-MM-DD:HH`
    pub fn hourly_period(at: NaiveDateTime) -> String {
        format!("{}:{:02}", at.date().format("%Y-%m-%d"), at.hour())
    }

    /// `YYYY-MM`
    pub fn monthly_period(date: NaiveDate) -> String {
        date.format("%Y-%m").to_string()
    }

    /// Whether `period` is a well-formed period key for `granularity`.
    pub fn is_valid_period(granularity: Granularity, period: &str) -> bool {
        match granularity {
            Granularity::Daily => parse_date(period).is_some(),
            Granularity::Monthly => {
                period.len() == 7
                    && NaiveDate::parse_from_str(&format!("{period}-01"), "%Y-%m-%d").is_ok()
            }
            Granularity::Hourly => match period.split_once(':') {
                Some((date, hour)) => {
                    parse_date(date).is_some()
                        && hour.len() == 2
                        && hour.parse::<u32>().is_ok_and(|h| h < 24)
                }
                None => false,
            },
        }
    }
}

fn split_prefix(key: &str) -> Option<(Dimension, &str)> {
    // Check the longer prefix first: "account_usage:" does not start with
    // "usage:", but keep the order explicit.
    if let Some(rest) = key.strip_prefix("account_usage:") {
        Some((Dimension::Account, rest))
    } else {
        key.strip_prefix("usage:").map(|rest| (Dimension::ApiKey, rest))
    }
}

/// Split `{model}:{period}` where the period is one segment (daily, monthly)
/// or two (hourly).
fn split_period_tail(rest: &str, granularity: Granularity) -> Option<(&str, &str)> {
    let segments = match granularity {
        Granularity::Hourly => 2,
        Granularity::Daily | Granularity::Monthly => 1,
    };
    let mut split_at = rest.len();
    for _ in 0..segments {
        split_at = rest[..split_at].rfind(':')?;
    }
    let (model, period) = (&rest[..split_at], &rest[split_at + 1..]);
    UsageKeys::is_valid_period(granularity, period).then_some((model, period))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Escape Redis glob metacharacters so ids, periods and prefixes match
/// literally.
pub(crate) fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
