//! Configuration validation

use super::*;
use anyhow::Result;
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_partitions(&config.partitions)?;
    validate_aggregate(&config.aggregate)?;
    validate_runtime(&config.runtime, &config.partitions)?;

    Ok(())
}

/// Validate partition list
pub fn validate_partitions(partitions: &[PartitionConfig]) -> Result<()> {
    if partitions.is_empty() {
        anyhow::bail!("at least one partition must be configured");
    }

    let mut seen = HashSet::new();
    for (i, partition) in partitions.iter().enumerate() {
        if partition.id.trim().is_empty() {
            anyhow::bail!("partitions[{}]: id must not be empty", i);
        }
        if !seen.insert(partition.id.as_str()) {
            anyhow::bail!("partitions[{}]: duplicate partition id '{}'", i, partition.id);
        }
        if let Some(sku) = partition.items.keys().find(|k| k.is_empty()) {
            anyhow::bail!("partitions[{}] ('{}'): item key '{}' must not be empty", i, partition.id, sku);
        }
    }

    Ok(())
}

/// Validate aggregate configuration
pub fn validate_aggregate(aggregate: &AggregateConfig) -> Result<()> {
    if aggregate.shards == Some(0) {
        anyhow::bail!("aggregate.shards must be at least 1");
    }

    Ok(())
}

/// Validate runtime configuration
pub fn validate_runtime(runtime: &RuntimeConfig, partitions: &[PartitionConfig]) -> Result<()> {
    if runtime.arrive_timeout_ms == Some(0) {
        anyhow::bail!("runtime.arrive_timeout_ms must be greater than 0");
    }

    for id in &runtime.fail_partitions {
        if !partitions.iter().any(|p| &p.id == id) {
            anyhow::bail!("runtime.fail_partitions: unknown partition id '{}'", id);
        }
    }

    Ok(())
}
