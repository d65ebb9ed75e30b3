//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, StrategyType as CliStrategyType};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    if let Some(strategy) = cli.strategy {
        config.runtime.strategy = match strategy {
            CliStrategyType::Barrier => RoundStrategy::Barrier,
            CliStrategyType::Channel => RoundStrategy::Channel,
        };
    }

    if let Some(timeout) = &cli.arrive_timeout {
        let timeout = parse_duration(timeout).context("Invalid --arrive-timeout")?;
        config.runtime.arrive_timeout_ms = Some(timeout.as_millis() as u64);
    }

    if let Some(delay) = &cli.max_fetch_delay {
        let delay = parse_duration(delay).context("Invalid --max-fetch-delay")?;
        config.runtime.max_fetch_delay_ms = delay.as_millis() as u64;
    }

    if let Some(shards) = cli.shards {
        config.aggregate.shards = Some(shards);
    }

    for id in &cli.fail_partitions {
        if !config.runtime.fail_partitions.contains(id) {
            config.runtime.fail_partitions.push(id.clone());
        }
    }

    if let Some(store) = &cli.store {
        config.output.store_path = Some(store.clone());
    }

    Ok(config)
}

/// Parse a duration string (e.g., "250ms", "5s", "2m"); bare numbers are milliseconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_str, multiplier_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1u64)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in duration: {}", s))?;

    let millis = num
        .checked_mul(multiplier_ms)
        .with_context(|| format!("Duration too large: {}", s))?;

    Ok(Duration::from_millis(millis))
}
