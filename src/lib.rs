//! Usage and cost aggregation over an LLM gateway's counter store.
//!
//! The relay path increments per-entity hash counters (hourly, daily, monthly
//! and lifetime, each with per-model sub-buckets). This crate reads them back:
//! it resolves a time range to bucket keys, pipelines the reads, normalizes
//! legacy field names and prices the per-model usage.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use keymeter::{
//!     config::MeterConfig,
//!     models::{Dimension, TimeRangeSpec},
//!     pricing::PricingTable,
//!     services::{UsageAggregator, UsageAggregatorConfig},
//! };
//!
//! let config = MeterConfig::from_file("keymeter.toml")?;
//! let store = keymeter::cache::connect(&config.store).await?;
//! let aggregator = UsageAggregator::new(
//!     store,
//!     Arc::new(PricingTable::from_config(&config.pricing)),
//!     UsageAggregatorConfig::from_config(&config.usage)?,
//! );
//! let report = aggregator
//!     .get_usage("k1", Dimension::ApiKey, &TimeRangeSpec::Last7Days)
//!     .await?;
//! println!("{}", report.cost.formatted.total);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod services;
