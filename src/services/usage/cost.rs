//! Cost of a window from its per-model buckets.

use std::collections::BTreeMap;

use crate::{
    models::{CostSource, ModelUsage, UsageTotals},
    pricing::{CostBreakdown, PricingCalculator},
};

/// Outcome of a cost rollup.
#[derive(Debug, Clone, PartialEq)]
pub struct RolledUpCost {
    pub cost: CostBreakdown,
    pub source: CostSource,
    /// Per-model usage and cost, most expensive first.
    pub models: Vec<ModelUsage>,
}

/// Price a window.
///
/// Model buckets are grouped by model name (an empty name counts as
/// `default_model`), merged, and priced with one calculator call per model.
/// When no model has usage but `raw` has tokens, `raw` is priced as if it
/// were all `default_model`. Rows that carry only an aggregate token count
/// (no input/output split) are priced as if every token were input.
pub fn rollup<I>(
    calculator: &dyn PricingCalculator,
    default_model: &str,
    model_buckets: I,
    raw: &UsageTotals,
) -> RolledUpCost
where
    I: IntoIterator<Item = (String, UsageTotals)>,
{
    let mut by_model: BTreeMap<String, UsageTotals> = BTreeMap::new();
    for (model, usage) in model_buckets {
        if usage.is_zero() {
            continue;
        }
        let model = if model.trim().is_empty() {
            default_model.to_string()
        } else {
            model
        };
        *by_model.entry(model).or_default() += usage;
    }

    if by_model.is_empty() {
        if raw.all_tokens == 0 {
            return RolledUpCost {
                cost: CostBreakdown::zero(),
                source: CostSource::None,
                models: Vec::new(),
            };
        }
        return RolledUpCost {
            cost: calculator.cost(&fallback_usage(raw), default_model),
            source: CostSource::Fallback,
            models: Vec::new(),
        };
    }

    let mut models: Vec<ModelUsage> = by_model
        .into_iter()
        .map(|(model, usage)| {
            let cost = calculator.cost(&usage, &model);
            ModelUsage { model, usage, cost }
        })
        .collect();
    let cost: CostBreakdown = models.iter().map(|m| m.cost.clone()).sum();
    models.sort_by(|a, b| b.cost.total.cmp(&a.cost.total).then_with(|| a.model.cmp(&b.model)));

    RolledUpCost {
        cost,
        source: CostSource::PerModel,
        models,
    }
}

/// Usage to price with the fallback model.
fn fallback_usage(raw: &UsageTotals) -> UsageTotals {
    if raw.component_tokens() > 0 {
        return *raw;
    }
    UsageTotals {
        input_tokens: raw.all_tokens,
        ..*raw
    }
}
