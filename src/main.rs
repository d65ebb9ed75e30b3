//! inventory-sync CLI entry point

use anyhow::{Context, Result};
use inventory_sync::config::{cli::Cli, toml as config_toml, validator, Config};
use inventory_sync::coordinator::{RoundCoordinator, RoundOptions};
use inventory_sync::logging;
use inventory_sync::output::text;
use inventory_sync::source::{PartitionSource, SeedFetcher, StaticSource};
use inventory_sync::store::{InventoryStore, JsonFileStore, LogStore};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    logging::init(cli.log_level.as_deref())?;

    println!("inventory-sync v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = build_config(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    print_configuration(&config);

    if cli.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    println!();
    println!("Starting round...");
    println!();

    run_round(&config)
}

/// Load the config file (or the built-in sample) and apply CLI overrides
fn build_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => config_toml::parse_toml_file(path)?,
        None => Config::sample(),
    };

    config_toml::merge_cli_with_config(cli, base)
}

fn run_round(config: &Config) -> Result<()> {
    let partitions = StaticSource::from_config(config).partitions()?;

    let fetcher = SeedFetcher::new()
        .with_max_delay(Duration::from_millis(config.runtime.max_fetch_delay_ms))
        .with_failures(config.runtime.fail_partitions.iter().cloned());

    let store: Arc<dyn InventoryStore> = match &config.output.store_path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(LogStore),
    };

    let coordinator = RoundCoordinator::new(Arc::new(fetcher), store, RoundOptions::from_config(config));

    match coordinator.run_round(partitions) {
        Ok(report) => {
            text::print_round_report(&report);
            if let Some(path) = &config.output.store_path {
                println!("Inventory written to {}", path.display());
            }
            Ok(())
        }
        Err(e) => {
            text::print_round_error(&e);
            Err(anyhow::Error::new(e).context("Inventory round failed"))
        }
    }
}

fn print_configuration(config: &Config) {
    println!("Configuration:");
    println!("  Runtime:");
    println!("    Strategy: {}", config.runtime.strategy);
    match config.runtime.arrive_timeout_ms {
        Some(ms) => println!("    Arrive timeout: {}ms", ms),
        None => println!("    Arrive timeout: none"),
    }
    if config.runtime.max_fetch_delay_ms > 0 {
        println!("    Max fetch delay: {}ms", config.runtime.max_fetch_delay_ms);
    }
    if !config.runtime.fail_partitions.is_empty() {
        println!("    Failing partitions: {}", config.runtime.fail_partitions.join(", "));
    }

    println!("  Aggregate:");
    match config.aggregate.shards {
        Some(shards) => println!("    Shards: {}", shards),
        None => println!("    Shards: auto ({} CPUs)", num_cpus::get()),
    }

    println!("  Partitions: {}", config.partitions.len());
    for partition in &config.partitions {
        println!("    {} ({} items)", partition.id, partition.items.len());
    }

    println!("  Output:");
    match &config.output.store_path {
        Some(path) => println!("    Store: {}", path.display()),
        None => println!("    Store: log"),
    }
}
