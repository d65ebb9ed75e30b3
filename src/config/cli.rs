//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Round strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    /// Workers merge into a shared map and meet at a barrier
    Barrier,
    /// Workers send partial maps to a single aggregator
    Channel,
}

/// inventory-sync - merge partitioned inventory once every source has reported
#[derive(Parser, Debug)]
#[command(name = "inventory-sync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file (partitions, runtime, output)
    ///
    /// Without one, the built-in three-partition sample is used.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Write the merged inventory to this JSON file
    #[arg(short = 'o', long)]
    pub store: Option<PathBuf>,

    /// How partial results are combined
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyType>,

    /// Give up waiting at the barrier after this long (e.g., 500ms, 5s)
    #[arg(long)]
    pub arrive_timeout: Option<String>,

    /// Simulate up to this much fetch latency per partition (e.g., 50ms)
    #[arg(long)]
    pub max_fetch_delay: Option<String>,

    /// Aggregate shard count
    #[arg(long)]
    pub shards: Option<usize>,

    /// Force the fetch of this partition to fail (repeatable)
    #[arg(long = "fail-partition", value_name = "ID")]
    pub fail_partitions: Vec<String>,

    /// Log filter (e.g., info, debug, inventory_sync=trace)
    #[arg(long, env = "INVENTORY_SYNC_LOG")]
    pub log_level: Option<String>,

    /// Validate and print the configuration without running a round
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shards == Some(0) {
            anyhow::bail!("shards must be at least 1");
        }

        if self.fail_partitions.iter().any(|id| id.trim().is_empty()) {
            anyhow::bail!("--fail-partition requires a non-empty partition id");
        }

        Ok(())
    }
}
