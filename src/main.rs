use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use keymeter::{
    config::MeterConfig,
    models::{Dimension, TimeRangeSpec},
    observability,
    pricing::PricingTable,
    services::{UsageAggregator, UsageAggregatorConfig},
};
use serde::Serialize;

/// CLI arguments for keymeter
#[derive(Parser, Debug)]
#[command(version, about = "Usage and cost reports from gateway counters", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./keymeter.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Print the query metrics in Prometheus text format to stderr on success
    #[arg(long, global = true)]
    metrics: bool,
}

/// Which entities and window to report on.
#[derive(clap::Args, Debug)]
struct Window {
    /// Entity kind: api-key or account
    #[arg(short, long, default_value = "api-key")]
    dimension: Dimension,

    /// today, 7days, 30days, monthly, all or custom
    #[arg(short, long, default_value = "today")]
    range: String,

    /// First day of a custom range (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,

    /// Last day of a custom range (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,
}

impl Window {
    fn range(&self) -> Result<TimeRangeSpec, String> {
        TimeRangeSpec::parse(&self.range, self.start.as_deref(), self.end.as_deref())
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Usage and cost of one entity
    Usage {
        /// Entity id
        #[arg(long)]
        id: String,
        #[command(flatten)]
        window: Window,
        /// Print a per-period trend instead of a total
        #[arg(long)]
        series: bool,
    },
    /// Usage totals of several entities in one round trip
    Batch {
        /// Comma-separated entity ids
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        window: Window,
    },
    /// Load and validate the config file, then exit
    CheckConfig,
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Features => run_features(),
        Command::CheckConfig => run_check_config(args.config.as_deref()),
        Command::Usage { id, window, series } => {
            let aggregator = build_aggregator(args.config.as_deref()).await;
            let range = parse_range(&window);
            if series {
                let points = aggregator
                    .get_usage_series(&id, window.dimension, &range)
                    .await;
                print_or_exit(points);
            } else {
                let report = aggregator.get_usage(&id, window.dimension, &range).await;
                print_or_exit(report);
            }
            dump_metrics(args.metrics);
        }
        Command::Batch { ids, window } => {
            let aggregator = build_aggregator(args.config.as_deref()).await;
            let range = parse_range(&window);
            let usage = aggregator
                .get_usage_batch(&ids, window.dimension, &range)
                .await;
            print_or_exit(usage);
            dump_metrics(args.metrics);
        }
    }
}

fn resolve_config_path(explicit_path: Option<&str>) -> Result<PathBuf, String> {
    let path = PathBuf::from(explicit_path.unwrap_or("keymeter.toml"));
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }
    Ok(path)
}

fn load_config(explicit_path: Option<&str>) -> MeterConfig {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match MeterConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

fn run_check_config(explicit_path: Option<&str>) {
    let config = load_config(explicit_path);
    let store = match &config.store {
        keymeter::config::StoreConfig::None => "none",
        keymeter::config::StoreConfig::Memory(_) => "memory",
        keymeter::config::StoreConfig::Redis(_) => "redis",
    };
    println!("Config OK");
    println!("  store:           {store}");
    println!("  timezone offset: {}", config.usage.timezone_offset);
    println!("  fallback model:  {}", config.usage.fallback_model);
    println!("  priced models:   {}", config.pricing.models.len());
}

async fn build_aggregator(explicit_path: Option<&str>) -> UsageAggregator {
    let config = load_config(explicit_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Warning: Failed to initialize tracing: {}", e);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    if config.store.is_none() {
        eprintln!("Error: No counter store configured. Add a [store] section.");
        std::process::exit(1);
    }

    let store = match keymeter::cache::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to counter store");
            eprintln!("Error: Failed to connect to counter store: {}", e);
            std::process::exit(1);
        }
    };

    let aggregator_config = match UsageAggregatorConfig::from_config(&config.usage) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    UsageAggregator::new(
        store,
        Arc::new(PricingTable::from_config(&config.pricing)),
        aggregator_config,
    )
}

fn parse_range(window: &Window) -> TimeRangeSpec {
    match window.range() {
        Ok(range) => range,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_or_exit<T: Serialize>(result: Result<T, keymeter::services::UsageError>) {
    let value = match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            std::process::exit(1);
        }
    };
    match serde_json::to_string_pretty(&value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

fn dump_metrics(enabled: bool) {
    if !enabled {
        return;
    }
    match observability::metrics::render() {
        Some(text) => eprint!("{text}"),
        None => eprintln!("Metrics unavailable: enable [observability.metrics] and the prometheus feature"),
    }
}

fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("cli", "Interface", cfg!(feature = "cli")),
        ("redis", "Infrastructure", cfg!(feature = "redis")),
        ("prometheus", "Infrastructure", cfg!(feature = "prometheus")),
    ];

    println!("keymeter v{version}\n");
    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<16} {status}");
    }
}
