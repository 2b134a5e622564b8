//! Raw counter hashes to canonical [`UsageTotals`].
//!
//! The relay has written two generations of field names: the current camelCase
//! names and, on lifetime rows, the same names with a `total` prefix.

use std::collections::HashMap;

use crate::models::UsageTotals;

/// (current name, legacy name) per canonical counter.
const REQUESTS: (&str, &str) = ("requests", "totalRequests");
const TOKENS: (&str, &str) = ("tokens", "totalTokens");
const INPUT_TOKENS: (&str, &str) = ("inputTokens", "totalInputTokens");
const OUTPUT_TOKENS: (&str, &str) = ("outputTokens", "totalOutputTokens");
const CACHE_CREATE_TOKENS: (&str, &str) = ("cacheCreateTokens", "totalCacheCreateTokens");
const CACHE_READ_TOKENS: (&str, &str) = ("cacheReadTokens", "totalCacheReadTokens");
const ALL_TOKENS: (&str, &str) = ("allTokens", "totalAllTokens");

/// Map one raw record to canonical totals. Never fails.
///
/// Each counter takes the current field whenever it is present and parses,
/// even when it is zero; the legacy field is read only when the current one
/// is missing or garbage. The aggregates `allTokens` and `tokens` fall back
/// to sums of their components when neither name yields a non-zero value.
pub fn normalize(fields: &HashMap<String, String>) -> UsageTotals {
    let input_tokens = read(fields, INPUT_TOKENS).unwrap_or(0);
    let output_tokens = read(fields, OUTPUT_TOKENS).unwrap_or(0);
    let cache_create_tokens = read(fields, CACHE_CREATE_TOKENS).unwrap_or(0);
    let cache_read_tokens = read(fields, CACHE_READ_TOKENS).unwrap_or(0);

    let mut totals = UsageTotals::from_tokens(
        read(fields, REQUESTS).unwrap_or(0),
        input_tokens,
        output_tokens,
        cache_create_tokens,
        cache_read_tokens,
    );
    if let Some(all_tokens) = read(fields, ALL_TOKENS).filter(|v| *v > 0) {
        totals.all_tokens = all_tokens;
    }
    if let Some(tokens) = read(fields, TOKENS).filter(|v| *v > 0) {
        totals.tokens = tokens;
    }
    totals
}

fn read(fields: &HashMap<String, String>, (current, legacy): (&str, &str)) -> Option<u64> {
    [current, legacy]
        .into_iter()
        .filter_map(|name| fields.get(name))
        .find_map(|raw| parse_counter(raw))
}

/// Parse a counter value. Integers are taken as-is; float strings (left by
/// `HINCRBYFLOAT`) are truncated; negative, non-finite and garbage values
/// read as `None`.
fn parse_counter(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<u64>() {
        return Some(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Some(value.trunc() as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn record(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_current_fields() {
        let totals = normalize(&record(&[
            ("requests", "10"),
            ("inputTokens", "1000"),
            ("outputTokens", "500"),
            ("cacheCreateTokens", "20"),
            ("cacheReadTokens", "30"),
        ]));
        assert_eq!(
            totals,
            UsageTotals {
                requests: 10,
                tokens: 1500,
                all_tokens: 1550,
                input_tokens: 1000,
                output_tokens: 500,
                cache_create_tokens: 20,
                cache_read_tokens: 30,
            }
        );
    }

    #[test]
    fn test_legacy_only_record() {
        let totals = normalize(&record(&[
            ("totalInputTokens", "5"),
            ("totalOutputTokens", "3"),
        ]));
        assert_eq!(totals.input_tokens, 5);
        assert_eq!(totals.output_tokens, 3);
        assert_eq!(totals.all_tokens, 8);
        assert_eq!(totals.tokens, 8);
        assert_eq!(totals.requests, 0);
    }

    #[test]
    fn test_current_name_wins_over_legacy() {
        let totals = normalize(&record(&[("requests", "7"), ("totalRequests", "3")]));
        assert_eq!(totals.requests, 7);
    }

    #[test]
    fn test_zero_current_wins_over_legacy() {
        let totals = normalize(&record(&[("inputTokens", "0"), ("totalInputTokens", "5")]));
        assert_eq!(totals.input_tokens, 0);

        let totals = normalize(&record(&[("requests", "0"), ("totalRequests", "3")]));
        assert_eq!(totals.requests, 0);
    }

    #[test]
    fn test_garbage_current_falls_through_to_legacy() {
        let totals = normalize(&record(&[("requests", "n/a"), ("totalRequests", "3")]));
        assert_eq!(totals.requests, 3);
    }

    #[test]
    fn test_stored_all_tokens_preferred() {
        // Writer aggregate differs from the component sum; keep the writer's value
        let totals = normalize(&record(&[
            ("inputTokens", "100"),
            ("outputTokens", "50"),
            ("allTokens", "175"),
            ("tokens", "140"),
        ]));
        assert_eq!(totals.all_tokens, 175);
        assert_eq!(totals.tokens, 140);
    }

    #[test]
    fn test_zero_aggregate_recomputed_from_components() {
        let totals = normalize(&record(&[
            ("inputTokens", "7"),
            ("outputTokens", "3"),
            ("allTokens", "0"),
        ]));
        assert_eq!(totals.all_tokens, 10);
    }

    #[test]
    fn test_legacy_all_tokens_used() {
        let totals = normalize(&record(&[("totalAllTokens", "42"), ("totalRequests", "2")]));
        assert_eq!(totals.all_tokens, 42);
        assert_eq!(totals.requests, 2);
    }

    #[test]
    fn test_empty_record_is_zero() {
        assert!(normalize(&HashMap::new()).is_zero());
    }

    #[rstest]
    #[case::integer("12", Some(12))]
    #[case::float("12.0", Some(12))]
    #[case::float_truncated("12.9", Some(12))]
    #[case::whitespace(" 7 ", Some(7))]
    #[case::negative("-5", None)]
    #[case::garbage("abc", None)]
    #[case::empty("", None)]
    #[case::nan("NaN", None)]
    #[case::infinite("inf", None)]
    fn test_parse_counter(#[case] raw: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_counter(raw), expected);
    }

    #[test]
    fn test_unparseable_reads_as_zero() {
        let totals = normalize(&record(&[("requests", "lots"), ("inputTokens", "12.0")]));
        assert_eq!(totals.requests, 0);
        assert_eq!(totals.input_tokens, 12);
        assert_eq!(totals.all_tokens, 12);
    }
}
