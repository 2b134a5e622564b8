//! Model pricing and the cost calculator used by the usage engine.
//!
//! All money is integer micro-dollars (1/1,000,000 of a dollar). Prices are
//! expressed per 1M tokens so that cheap cache-read prices stay integral.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::UsageTotals;

/// Pricing information for a specific model.
///
/// Values are micro-dollars per 1M tokens. For example $3 per 1M input
/// tokens is `3_000_000`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    /// Cost per 1M input tokens
    #[serde(default)]
    pub input_per_1m_tokens: i64,

    /// Cost per 1M output tokens
    #[serde(default)]
    pub output_per_1m_tokens: i64,

    /// Cost per 1M cache write (cache creation) tokens.
    /// Charged at the input rate when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_per_1m_tokens: Option<i64>,

    /// Cost per 1M cache read tokens.
    /// Charged at the input rate when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_per_1m_tokens: Option<i64>,
}

impl ModelPricing {
    /// Create pricing from dollars per 1M tokens (the unit vendors publish).
    pub fn from_dollars_per_1m(input: f64, output: f64) -> Self {
        Self {
            input_per_1m_tokens: dollars_to_microdollars(input),
            output_per_1m_tokens: dollars_to_microdollars(output),
            ..Default::default()
        }
    }

    /// Add prompt-cache prices in dollars per 1M tokens.
    pub fn with_cache_dollars_per_1m(mut self, write: f64, read: f64) -> Self {
        self.cache_write_per_1m_tokens = Some(dollars_to_microdollars(write));
        self.cached_input_per_1m_tokens = Some(dollars_to_microdollars(read));
        self
    }
}

/// Human-readable rendering of each [`CostBreakdown`] field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormattedCost {
    pub input: String,
    pub output: String,
    pub cache_write: String,
    pub cache_read: String,
    pub total: String,
}

/// Monetary cost of some usage, split by token class. Amounts are in
/// micro-dollars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub input: i64,
    pub output: i64,
    pub cache_write: i64,
    pub cache_read: i64,
    pub total: i64,
    pub formatted: FormattedCost,
}

impl Default for CostBreakdown {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

impl CostBreakdown {
    /// Build a breakdown; `total` and the formatted strings are derived.
    pub fn new(input: i64, output: i64, cache_write: i64, cache_read: i64) -> Self {
        let total = input
            .saturating_add(output)
            .saturating_add(cache_write)
            .saturating_add(cache_read);
        Self {
            input,
            output,
            cache_write,
            cache_read,
            total,
            formatted: FormattedCost {
                input: format_cost(input),
                output: format_cost(output),
                cache_write: format_cost(cache_write),
                cache_read: format_cost(cache_read),
                total: format_cost(total),
            },
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Field-wise sum.
    pub fn merge(&self, other: &CostBreakdown) -> CostBreakdown {
        CostBreakdown::new(
            self.input.saturating_add(other.input),
            self.output.saturating_add(other.output),
            self.cache_write.saturating_add(other.cache_write),
            self.cache_read.saturating_add(other.cache_read),
        )
    }
}

impl std::iter::Sum for CostBreakdown {
    fn sum<I: Iterator<Item = CostBreakdown>>(iter: I) -> Self {
        iter.fold(CostBreakdown::zero(), |acc, c| acc.merge(&c))
    }
}

/// Computes the cost of usage for one model.
///
/// Implementations must be pure: the same usage and model always produce the
/// same breakdown. Callers never pass an empty model name.
pub trait PricingCalculator: Send + Sync {
    fn cost(&self, usage: &UsageTotals, model: &str) -> CostBreakdown;
}

/// `[pricing]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Per-model prices. Keys match exact model names or name prefixes
    /// (`"claude-3-5-sonnet"` prices `"claude-3-5-sonnet-20241022"`).
    #[serde(default)]
    pub models: HashMap<String, ModelPricing>,

    /// Seed the table with built-in prices for common models.
    /// Configured entries override built-in ones.
    #[serde(default = "default_true")]
    pub include_builtin: bool,

    /// Price applied to models that match no entry. Without it unknown
    /// models cost nothing.
    #[serde(default)]
    pub unknown_model: Option<ModelPricing>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            models: HashMap::new(),
            include_builtin: true,
            unknown_model: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Model price table with prefix matching.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    unknown_model: Option<ModelPricing>,
}

impl PricingTable {
    pub fn from_config(config: &PricingConfig) -> Self {
        let mut table = if config.include_builtin {
            Self::builtin()
        } else {
            Self::default()
        };
        for (model, pricing) in &config.models {
            table.set_pricing(model, pricing.clone());
        }
        table.unknown_model = config.unknown_model.clone();
        table
    }

    /// Built-in list prices for common Anthropic, OpenAI and Google models.
    pub fn builtin() -> Self {
        let mut table = Self::default();
        let entries: [(&str, ModelPricing); 16] = [
            (
                "claude-3-5-sonnet",
                ModelPricing::from_dollars_per_1m(3.0, 15.0).with_cache_dollars_per_1m(3.75, 0.30),
            ),
            (
                "claude-3-7-sonnet",
                ModelPricing::from_dollars_per_1m(3.0, 15.0).with_cache_dollars_per_1m(3.75, 0.30),
            ),
            (
                "claude-sonnet-4",
                ModelPricing::from_dollars_per_1m(3.0, 15.0).with_cache_dollars_per_1m(3.75, 0.30),
            ),
            (
                "claude-3-5-haiku",
                ModelPricing::from_dollars_per_1m(0.80, 4.0).with_cache_dollars_per_1m(1.0, 0.08),
            ),
            (
                "claude-3-haiku",
                ModelPricing::from_dollars_per_1m(0.25, 1.25).with_cache_dollars_per_1m(0.30, 0.03),
            ),
            (
                "claude-3-opus",
                ModelPricing::from_dollars_per_1m(15.0, 75.0)
                    .with_cache_dollars_per_1m(18.75, 1.50),
            ),
            (
                "claude-opus-4",
                ModelPricing::from_dollars_per_1m(15.0, 75.0)
                    .with_cache_dollars_per_1m(18.75, 1.50),
            ),
            (
                "gpt-4o",
                ModelPricing::from_dollars_per_1m(2.50, 10.0).with_cache_dollars_per_1m(2.50, 1.25),
            ),
            (
                "gpt-4o-mini",
                ModelPricing::from_dollars_per_1m(0.15, 0.60)
                    .with_cache_dollars_per_1m(0.15, 0.075),
            ),
            (
                "gpt-4.1",
                ModelPricing::from_dollars_per_1m(2.0, 8.0).with_cache_dollars_per_1m(2.0, 0.50),
            ),
            (
                "gpt-4.1-mini",
                ModelPricing::from_dollars_per_1m(0.40, 1.60).with_cache_dollars_per_1m(0.40, 0.10),
            ),
            (
                "gpt-4.1-nano",
                ModelPricing::from_dollars_per_1m(0.10, 0.40)
                    .with_cache_dollars_per_1m(0.10, 0.025),
            ),
            (
                "gemini-1.5-pro",
                ModelPricing::from_dollars_per_1m(1.25, 5.0),
            ),
            (
                "gemini-2.5-pro",
                ModelPricing::from_dollars_per_1m(1.25, 10.0)
                    .with_cache_dollars_per_1m(1.25, 0.31),
            ),
            (
                "gemini-2.0-flash",
                ModelPricing::from_dollars_per_1m(0.10, 0.40)
                    .with_cache_dollars_per_1m(0.10, 0.025),
            ),
            (
                "gemini-2.0-flash-lite",
                ModelPricing::from_dollars_per_1m(0.075, 0.30),
            ),
        ];
        for (model, pricing) in entries {
            table.set_pricing(model, pricing);
        }
        table
    }

    /// Add or replace pricing for a model name or prefix.
    pub fn set_pricing(&mut self, model: &str, pricing: ModelPricing) {
        self.models.insert(model.to_ascii_lowercase(), pricing);
    }

    /// Look up pricing for a model.
    ///
    /// Tries the exact (case-insensitive) name, then the name with vendor
    /// decorations removed (`anthropic/`, `us.anthropic.`, `-v2:0`), then the
    /// longest configured prefix of either.
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        let lowered = model.to_ascii_lowercase();
        let bare = strip_vendor_decorations(&lowered);

        for candidate in [lowered.as_str(), bare] {
            if let Some(pricing) = self.models.get(candidate) {
                return Some(pricing);
            }
        }

        [lowered.as_str(), bare]
            .iter()
            .flat_map(|candidate| {
                self.models
                    .iter()
                    .filter(move |(prefix, _)| candidate.starts_with(prefix.as_str()))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, pricing)| pricing)
    }

    /// Compute cost from pricing and usage.
    ///
    /// Uses `i128` for intermediate calculations so billions of tokens at high
    /// prices cannot overflow. Results saturate to `i64::MAX`.
    fn compute_cost(pricing: &ModelPricing, usage: &UsageTotals) -> CostBreakdown {
        let per_1m = |tokens: u64, price: i64| -> i64 {
            saturate_to_i64((tokens as i128 * price as i128) / 1_000_000)
        };

        CostBreakdown::new(
            per_1m(usage.input_tokens, pricing.input_per_1m_tokens),
            per_1m(usage.output_tokens, pricing.output_per_1m_tokens),
            per_1m(
                usage.cache_create_tokens,
                pricing
                    .cache_write_per_1m_tokens
                    .unwrap_or(pricing.input_per_1m_tokens),
            ),
            per_1m(
                usage.cache_read_tokens,
                pricing
                    .cached_input_per_1m_tokens
                    .unwrap_or(pricing.input_per_1m_tokens),
            ),
        )
    }
}

impl PricingCalculator for PricingTable {
    fn cost(&self, usage: &UsageTotals, model: &str) -> CostBreakdown {
        match self.get(model).or(self.unknown_model.as_ref()) {
            Some(pricing) => Self::compute_cost(pricing, usage),
            None => {
                tracing::debug!(model, "No pricing for model, reporting zero cost");
                CostBreakdown::zero()
            }
        }
    }
}

/// Remove routing decorations vendors put around the same model id.
fn strip_vendor_decorations(model: &str) -> &str {
    // "anthropic/claude-3-5-sonnet" (OpenRouter style)
    let model = model.rsplit('/').next().unwrap_or(model);
    // "us.anthropic.claude-3-5-sonnet-20241022-v2:0" (Bedrock style)
    let model = model
        .find("anthropic.")
        .map(|idx| &model[idx + "anthropic.".len()..])
        .unwrap_or(model);
    // "...-v2:0" / "...@20241022" version suffixes
    let model = model.split('@').next().unwrap_or(model);
    match model.rfind("-v") {
        Some(idx) if model[idx + 2..].chars().all(|c| c.is_ascii_digit() || c == ':') => {
            &model[..idx]
        }
        _ => model,
    }
}

/// Render micro-dollars for display: 2 decimals from $1, 4 from $0.001,
/// otherwise 6.
pub fn format_cost(microdollars: i64) -> String {
    let amount = Decimal::new(microdollars, 6);
    let abs = amount.abs();
    let dp = if abs >= Decimal::ONE {
        2
    } else if abs >= Decimal::new(1, 3) {
        4
    } else {
        6
    };
    format!("${:.*}", dp as usize, amount.round_dp(dp))
}

/// Convert dollars to micro-dollars.
pub fn dollars_to_microdollars(dollars: f64) -> i64 {
    (dollars * 1_000_000.0).round() as i64
}

/// Saturate an i128 value to fit in an i64.
fn saturate_to_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn usage(input: u64, output: u64, cache_create: u64, cache_read: u64) -> UsageTotals {
        UsageTotals::from_tokens(1, input, output, cache_create, cache_read)
    }

    #[test]
    fn test_sonnet_cost_breakdown() {
        let table = PricingTable::builtin();
        // 1000 input @ $3/1M = $0.003, 500 output @ $15/1M = $0.0075
        let cost = table.cost(&usage(1000, 500, 0, 0), "claude-3-5-sonnet-20241022");
        assert_eq!(cost.input, 3_000);
        assert_eq!(cost.output, 7_500);
        assert_eq!(cost.cache_write, 0);
        assert_eq!(cost.cache_read, 0);
        assert_eq!(cost.total, 10_500);
        assert_eq!(cost.formatted.total, "$0.0105");
    }

    #[test]
    fn test_cache_tokens_priced_separately() {
        let table = PricingTable::builtin();
        // 1M cache write @ $3.75, 1M cache read @ $0.30
        let cost = table.cost(&usage(0, 0, 1_000_000, 1_000_000), "claude-3-5-sonnet");
        assert_eq!(cost.cache_write, 3_750_000);
        assert_eq!(cost.cache_read, 300_000);
        assert_eq!(cost.total, 4_050_000);
        assert_eq!(cost.formatted.total, "$4.05");
    }

    #[test]
    fn test_cache_prices_default_to_input_rate() {
        let mut table = PricingTable::default();
        table.set_pricing("custom-model", ModelPricing::from_dollars_per_1m(2.0, 4.0));
        let cost = table.cost(&usage(0, 0, 1_000_000, 1_000_000), "custom-model");
        assert_eq!(cost.cache_write, 2_000_000);
        assert_eq!(cost.cache_read, 2_000_000);
    }

    #[rstest]
    #[case::exact("gpt-4o", "gpt-4o")]
    #[case::dated("gpt-4o-2024-08-06", "gpt-4o")]
    #[case::longest_prefix_wins("gpt-4o-mini-2024-07-18", "gpt-4o-mini")]
    #[case::openrouter("anthropic/claude-3-5-haiku-20241022", "claude-3-5-haiku")]
    #[case::bedrock("us.anthropic.claude-3-opus-20240229-v1:0", "claude-3-opus")]
    #[case::vertex("claude-3-5-sonnet-v2@20241022", "claude-3-5-sonnet")]
    #[case::case_insensitive("Claude-3-Haiku-20240307", "claude-3-haiku")]
    fn test_lookup_resolves_variants(#[case] model: &str, #[case] expected_key: &str) {
        let table = PricingTable::builtin();
        assert_eq!(table.get(model), table.get(expected_key));
        assert!(table.get(model).is_some());
    }

    #[rstest]
    #[case::gpt_41("gpt-4.1-2025-04-14", 2_000_000)]
    #[case::gpt_41_mini("gpt-4.1-mini-2025-04-14", 400_000)]
    #[case::gpt_41_nano("gpt-4.1-nano-2025-04-14", 100_000)]
    #[case::flash("gemini-2.0-flash-001", 100_000)]
    #[case::flash_lite("gemini-2.0-flash-lite-001", 75_000)]
    fn test_smaller_variants_not_priced_as_their_family(
        #[case] model: &str,
        #[case] input_per_1m: i64,
    ) {
        let table = PricingTable::builtin();
        assert_eq!(table.cost(&usage(1_000_000, 0, 0, 0), model).input, input_per_1m);
    }

    #[test]
    fn test_unknown_model_costs_zero_without_configured_price() {
        let table = PricingTable::builtin();
        assert!(table.get("mystery-model").is_none());
        assert_eq!(table.cost(&usage(1000, 1000, 0, 0), "mystery-model").total, 0);
    }

    #[test]
    fn test_unknown_model_price_applies() {
        let config = PricingConfig {
            unknown_model: Some(ModelPricing::from_dollars_per_1m(1.0, 1.0)),
            ..Default::default()
        };
        let table = PricingTable::from_config(&config);
        assert_eq!(table.cost(&usage(1_000_000, 0, 0, 0), "mystery-model").total, 1_000_000);
    }

    #[test]
    fn test_config_overrides_builtin() {
        let mut models = HashMap::new();
        models.insert(
            "claude-3-5-sonnet".to_string(),
            ModelPricing::from_dollars_per_1m(1.0, 1.0),
        );
        let table = PricingTable::from_config(&PricingConfig {
            models,
            ..Default::default()
        });
        assert_eq!(
            table.get("claude-3-5-sonnet-20241022").unwrap().input_per_1m_tokens,
            1_000_000
        );
        // Other built-ins are still present
        assert!(table.get("gpt-4o").is_some());
    }

    #[test]
    fn test_builtin_can_be_disabled() {
        let table = PricingTable::from_config(&PricingConfig {
            include_builtin: false,
            ..Default::default()
        });
        assert!(table.get("gpt-4o").is_none());
    }

    #[test]
    fn test_large_token_counts_do_not_overflow() {
        let table = PricingTable::builtin();
        let cost = table.cost(&usage(u64::MAX / 2, 0, 0, 0), "claude-3-opus");
        assert!(cost.input > 0);
    }

    #[rstest]
    #[case::zero(0, "$0.000000")]
    #[case::sub_tenth_cent(207, "$0.000207")]
    #[case::cents(10_500, "$0.0105")]
    #[case::dollars(4_050_000, "$4.05")]
    #[case::rounding(1_234_567, "$1.23")]
    fn test_format_cost(#[case] micro: i64, #[case] expected: &str) {
        assert_eq!(format_cost(micro), expected);
    }

    #[test]
    fn test_breakdown_merge_and_sum() {
        let a = CostBreakdown::new(1, 2, 3, 4);
        let b = CostBreakdown::new(10, 20, 30, 40);
        let merged = a.merge(&b);
        assert_eq!(merged.total, 110);
        let summed: CostBreakdown = vec![a, b].into_iter().sum();
        assert_eq!(summed, merged);
    }
}
