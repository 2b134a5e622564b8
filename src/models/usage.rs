use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign},
    str::FromStr,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::pricing::CostBreakdown;

/// Which kind of entity a usage counter is scoped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// A proxy API key issued by the gateway
    ApiKey,
    /// A pooled upstream provider account
    Account,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::ApiKey => "api_key",
            Dimension::Account => "account",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_key" | "api-key" | "key" => Ok(Dimension::ApiKey),
            "account" => Ok(Dimension::Account),
            other => Err(format!(
                "unknown dimension '{other}' (expected 'api-key' or 'account')"
            )),
        }
    }
}

/// Width of a usage bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Hourly,
    Daily,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(Granularity::Hourly),
            "daily" => Some(Granularity::Daily),
            "monthly" => Some(Granularity::Monthly),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical usage counters, derived from one or more raw buckets.
///
/// Never persisted. `all_tokens` is the writer's aggregate when it stored
/// one, otherwise the sum of the four token counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub requests: u64,
    /// Input + output tokens (the relay's original "tokens" counter)
    pub tokens: u64,
    pub all_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
}

impl UsageTotals {
    pub const ZERO: UsageTotals = UsageTotals {
        requests: 0,
        tokens: 0,
        all_tokens: 0,
        input_tokens: 0,
        output_tokens: 0,
        cache_create_tokens: 0,
        cache_read_tokens: 0,
    };

    /// Build totals from the four token counters, deriving the aggregates.
    pub fn from_tokens(
        requests: u64,
        input_tokens: u64,
        output_tokens: u64,
        cache_create_tokens: u64,
        cache_read_tokens: u64,
    ) -> Self {
        Self {
            requests,
            tokens: input_tokens.saturating_add(output_tokens),
            all_tokens: input_tokens
                .saturating_add(output_tokens)
                .saturating_add(cache_create_tokens)
                .saturating_add(cache_read_tokens),
            input_tokens,
            output_tokens,
            cache_create_tokens,
            cache_read_tokens,
        }
    }

    /// Field-wise sum. Associative and commutative; `ZERO` is the identity.
    pub fn merge(&self, other: &UsageTotals) -> UsageTotals {
        UsageTotals {
            requests: self.requests.saturating_add(other.requests),
            tokens: self.tokens.saturating_add(other.tokens),
            all_tokens: self.all_tokens.saturating_add(other.all_tokens),
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            cache_create_tokens: self
                .cache_create_tokens
                .saturating_add(other.cache_create_tokens),
            cache_read_tokens: self
                .cache_read_tokens
                .saturating_add(other.cache_read_tokens),
        }
    }

    /// Sum of the four token components, ignoring any stored aggregate.
    pub fn component_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_create_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Add for UsageTotals {
    type Output = UsageTotals;

    fn add(self, rhs: UsageTotals) -> UsageTotals {
        self.merge(&rhs)
    }
}

impl AddAssign for UsageTotals {
    fn add_assign(&mut self, rhs: UsageTotals) {
        *self = self.merge(&rhs);
    }
}

impl Sum for UsageTotals {
    fn sum<I: Iterator<Item = UsageTotals>>(iter: I) -> Self {
        iter.fold(UsageTotals::ZERO, |acc, t| acc.merge(&t))
    }
}

impl<'a> Sum<&'a UsageTotals> for UsageTotals {
    fn sum<I: Iterator<Item = &'a UsageTotals>>(iter: I) -> Self {
        iter.fold(UsageTotals::ZERO, |acc, t| acc.merge(t))
    }
}

/// A caller's requested time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeRangeSpec {
    Today,
    #[serde(rename = "7days")]
    Last7Days,
    #[serde(rename = "30days")]
    Last30Days,
    Monthly,
    All,
    Custom { start: NaiveDate, end: NaiveDate },
}

impl TimeRangeSpec {
    pub fn label(&self) -> &'static str {
        match self {
            TimeRangeSpec::Today => "today",
            TimeRangeSpec::Last7Days => "7days",
            TimeRangeSpec::Last30Days => "30days",
            TimeRangeSpec::Monthly => "monthly",
            TimeRangeSpec::All => "all",
            TimeRangeSpec::Custom { .. } => "custom",
        }
    }

    /// Build a range from its name plus optional `YYYY-MM-DD` bounds.
    ///
    /// Only `custom` uses the bounds, and requires both. Ordering and span
    /// are checked later by the range resolver.
    pub fn parse(name: &str, start: Option<&str>, end: Option<&str>) -> Result<Self, String> {
        match name {
            "today" => Ok(TimeRangeSpec::Today),
            "7days" | "7d" => Ok(TimeRangeSpec::Last7Days),
            "30days" | "30d" => Ok(TimeRangeSpec::Last30Days),
            "monthly" | "month" => Ok(TimeRangeSpec::Monthly),
            "all" => Ok(TimeRangeSpec::All),
            "custom" => {
                let (Some(start), Some(end)) = (start, end) else {
                    return Err("custom range requires both start and end dates".to_string());
                };
                let parse = |s: &str| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map_err(|_| format!("invalid date '{s}', expected YYYY-MM-DD"))
                };
                Ok(TimeRangeSpec::Custom {
                    start: parse(start)?,
                    end: parse(end)?,
                })
            }
            other => Err(format!(
                "unknown range '{other}' (expected today, 7days, 30days, monthly, all or custom)"
            )),
        }
    }
}

impl fmt::Display for TimeRangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRangeSpec::Custom { start, end } => write!(f, "custom({start}..={end})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Whether the caller wants one scalar total or a per-period trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RangeMode {
    /// Fewest buckets that cover the range (a single monthly bucket for
    /// `30days`/`monthly`)
    #[default]
    Total,
    /// Daily (or hourly for `today`) buckets for trend charts
    Series,
}

/// Granularity the caller should label its chart axis with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayGranularity {
    Hour,
    Day,
}

/// How the cost in a [`UsageReport`] was obtained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    /// Summed from per-model sub-buckets
    PerModel,
    /// Estimated with the representative default model (no per-model data)
    Fallback,
    /// No tokens, no cost
    #[default]
    None,
}

/// Usage and cost of one model within a window.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub usage: UsageTotals,
    pub cost: CostBreakdown,
}

/// Result of a single-entity usage query.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub entity_id: String,
    pub dimension: Dimension,
    pub range: TimeRangeSpec,
    pub usage: UsageTotals,
    pub cost: CostBreakdown,
    pub cost_source: CostSource,
    /// Per-model breakdown, most expensive first
    pub models: Vec<ModelUsage>,
}

/// One point of a usage trend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsagePoint {
    /// Period key (`YYYY-MM-DD` or `YYYY-MM-DD:HH`)
    pub period: String,
    pub usage: UsageTotals,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn sample(seed: u64) -> UsageTotals {
        UsageTotals::from_tokens(seed, seed * 10, seed * 5, seed * 2, seed * 3)
    }

    #[test]
    fn test_merge_is_associative() {
        let (a, b, c) = (sample(1), sample(7), sample(13));
        assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn test_merge_is_commutative() {
        let (a, b) = (sample(3), sample(11));
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_with_zero_is_identity() {
        let a = sample(5);
        assert_eq!(a.merge(&UsageTotals::ZERO), a);
        assert_eq!(UsageTotals::ZERO.merge(&a), a);
        assert_eq!(UsageTotals::default(), UsageTotals::ZERO);
    }

    #[test]
    fn test_merge_saturates() {
        let big = UsageTotals {
            requests: u64::MAX,
            ..Default::default()
        };
        assert_eq!(big.merge(&sample(1)).requests, u64::MAX);
    }

    #[test]
    fn test_sum_matches_fold() {
        let items = vec![sample(1), sample(2), sample(3)];
        let summed: UsageTotals = items.iter().sum();
        assert_eq!(summed, sample(1) + sample(2) + sample(3));
        assert_eq!(summed.requests, 6);
    }

    #[test]
    fn test_from_tokens_derives_aggregates() {
        let t = UsageTotals::from_tokens(2, 100, 50, 10, 5);
        assert_eq!(t.tokens, 150);
        assert_eq!(t.all_tokens, 165);
        assert_eq!(t.component_tokens(), 165);
    }

    #[rstest]
    #[case::today("today", TimeRangeSpec::Today)]
    #[case::week("7days", TimeRangeSpec::Last7Days)]
    #[case::month_window("30days", TimeRangeSpec::Last30Days)]
    #[case::monthly("monthly", TimeRangeSpec::Monthly)]
    #[case::all("all", TimeRangeSpec::All)]
    fn test_parse_named_ranges(#[case] name: &str, #[case] expected: TimeRangeSpec) {
        assert_eq!(TimeRangeSpec::parse(name, None, None).unwrap(), expected);
    }

    #[test]
    fn test_parse_custom_range() {
        let spec = TimeRangeSpec::parse("custom", Some("2026-01-01"), Some("2026-01-31")).unwrap();
        assert_eq!(
            spec,
            TimeRangeSpec::Custom {
                start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            }
        );
        assert!(TimeRangeSpec::parse("custom", Some("2026-01-01"), None).is_err());
        assert!(TimeRangeSpec::parse("custom", Some("01/01/2026"), Some("2026-01-31")).is_err());
        assert!(TimeRangeSpec::parse("fortnight", None, None).is_err());
    }

    #[test]
    fn test_dimension_from_str() {
        assert_eq!("api-key".parse::<Dimension>().unwrap(), Dimension::ApiKey);
        assert_eq!("account".parse::<Dimension>().unwrap(), Dimension::Account);
        assert!("org".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_usage_totals_serializes_camel_case() {
        let json = serde_json::to_value(UsageTotals::from_tokens(1, 2, 3, 0, 0)).unwrap();
        assert_eq!(json["allTokens"], 5);
        assert_eq!(json["cacheCreateTokens"], 0);
    }
}
