pub mod entities;
mod usage;

pub use entities::{DirectoryError, EntityDirectory, EntityPage, StaticDirectory};
pub use usage::{
    Clock, MAX_CUSTOM_RANGE_DAYS, RangeResolver, ResolvedRange, RolledUpCost, UsageAggregator,
    UsageAggregatorConfig, UsageError, UsagePage, normalize, rollup,
};
