//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::aggregate::ItemMap;
use crate::coordinator::RoundStrategy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub partitions: Vec<PartitionConfig>,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// One partition: a source identifier and its seed items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub id: String,
    #[serde(default)]
    pub items: ItemMap,
}

/// Shared aggregate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Shard count (rounded up to a power of two); defaults to four per CPU
    pub shards: Option<usize>,
}

/// Round execution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub strategy: RoundStrategy,
    /// Bounded barrier wait; unset means wait forever
    pub arrive_timeout_ms: Option<u64>,
    /// Upper bound of the simulated fetch latency
    #[serde(default)]
    pub max_fetch_delay_ms: u64,
    /// Partitions whose fetch is forced to fail
    #[serde(default)]
    pub fail_partitions: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON file receiving the persisted aggregate; unset logs it instead
    pub store_path: Option<PathBuf>,
}

impl Config {
    /// Built-in three-partition sample used when no config file is given
    pub fn sample() -> Self {
        let partition = |index: usize, pairs: &[(&str, u64)]| PartitionConfig {
            id: format!("http://dummy.endpoint/{}/inventory", index),
            items: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };

        Self {
            partitions: vec![
                partition(0, &[("sku1", 10), ("sku2", 5)]),
                partition(1, &[("sku1", 3)]),
                partition(2, &[("sku2", 7), ("sku3", 1)]),
            ],
            aggregate: AggregateConfig::default(),
            runtime: RuntimeConfig::default(),
            output: OutputConfig::default(),
        }
    }
}
