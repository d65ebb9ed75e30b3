//! Partition sources and inventory fetchers
//!
//! A [`PartitionSource`] enumerates the units of work for one round. An
//! [`InventoryFetcher`] retrieves the item data for a single partition; in
//! production this would call the partition's remote endpoint, here the
//! reference [`SeedFetcher`] returns the partition's seed items.
//!
//! # Thread Safety
//!
//! Fetchers are shared by every worker thread of a round, so they must be
//! `Send + Sync`. Fetching is the slow, externally-bound step and runs without
//! holding any lock.

pub mod mock;

use crate::aggregate::ItemMap;
use crate::config::Config;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// One unit of work: a source identifier and its item data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: String,
    pub items: ItemMap,
}

impl Partition {
    pub fn new(id: impl Into<String>, items: ItemMap) -> Self {
        Self {
            id: id.into(),
            items,
        }
    }

    /// Build a partition from `(sku, quantity)` pairs
    pub fn from_pairs<'a, I>(id: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u64)>,
    {
        let items = pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        Self::new(id, items)
    }
}

/// Remote retrieval failure for one partition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("source '{partition}' unavailable: {reason}")]
    Unavailable { partition: String, reason: String },

    #[error("malformed response from '{partition}': {reason}")]
    Malformed { partition: String, reason: String },
}

impl FetchError {
    pub fn partition(&self) -> &str {
        match self {
            FetchError::Unavailable { partition, .. } | FetchError::Malformed { partition, .. } => partition,
        }
    }
}

/// Supplies the fixed set of partitions for a round
pub trait PartitionSource {
    fn partitions(&self) -> crate::Result<Vec<Partition>>;
}

/// Retrieves the items of one partition
pub trait InventoryFetcher: Send + Sync {
    /// Fetch the current item data for `partition`
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on any retrieval problem. The caller does not
    /// retry.
    fn fetch(&self, partition: &Partition) -> Result<ItemMap, FetchError>;
}

/// Fixed list of partitions
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    partitions: Vec<Partition>,
}

impl StaticSource {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }

    /// Partitions declared in the configuration, in declaration order
    pub fn from_config(config: &Config) -> Self {
        let partitions = config
            .partitions
            .iter()
            .map(|p| Partition::new(p.id.clone(), p.items.clone()))
            .collect();
        Self::new(partitions)
    }
}

impl PartitionSource for StaticSource {
    fn partitions(&self) -> crate::Result<Vec<Partition>> {
        if self.partitions.is_empty() {
            anyhow::bail!("partition source is empty");
        }
        Ok(self.partitions.clone())
    }
}

/// Returns each partition's seed items
///
/// Stands in for the remote endpoint call. It can simulate network latency
/// with a random delay and inject failures for named partitions.
#[derive(Debug)]
pub struct SeedFetcher {
    max_delay: Duration,
    failing: HashSet<String>,
    rng: Mutex<Xoshiro256PlusPlus>,
}

impl SeedFetcher {
    pub fn new() -> Self {
        Self {
            max_delay: Duration::ZERO,
            failing: HashSet::new(),
            rng: Mutex::new(Xoshiro256PlusPlus::from_entropy()),
        }
    }

    /// Sleep a random duration in `[0, max_delay]` before returning
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Fail every fetch of the named partitions with [`FetchError::Unavailable`]
    pub fn with_failures<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(ids.into_iter().map(Into::into));
        self
    }

    fn jitter(&self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let max_us = self.max_delay.as_micros() as u64;
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Duration::from_micros(rng.gen_range(0..=max_us))
    }
}

impl Default for SeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryFetcher for SeedFetcher {
    fn fetch(&self, partition: &Partition) -> Result<ItemMap, FetchError> {
        let delay = self.jitter();
        if !delay.is_zero() {
            debug!(partition = %partition.id, delay_us = delay.as_micros() as u64, "simulating fetch latency");
            std::thread::sleep(delay);
        }

        if self.failing.contains(&partition.id) {
            return Err(FetchError::Unavailable {
                partition: partition.id.clone(),
                reason: "injected failure".to_string(),
            });
        }

        Ok(partition.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_partition_from_pairs() {
        let partition = Partition::from_pairs("p0", [("sku1", 10), ("sku2", 5)]);
        assert_eq!(partition.id, "p0");
        assert_eq!(partition.items.len(), 2);
        assert_eq!(partition.items["sku1"], 10);
    }

    #[test]
    fn test_static_source_returns_partitions_in_order() {
        let source = StaticSource::new(vec![
            Partition::from_pairs("a", [("sku1", 1)]),
            Partition::from_pairs("b", [("sku2", 2)]),
        ]);

        let ids: Vec<_> = source.partitions().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_static_source_empty_is_error() {
        assert!(StaticSource::default().partitions().is_err());
    }

    #[test]
    fn test_static_source_from_sample_config() {
        let source = StaticSource::from_config(&Config::sample());
        assert_eq!(source.partitions().unwrap().len(), 3);
    }

    #[test]
    fn test_seed_fetcher_returns_seed_items() {
        let fetcher = SeedFetcher::new();
        let partition = Partition::from_pairs("p0", [("sku1", 10)]);
        assert_eq!(fetcher.fetch(&partition).unwrap(), partition.items);
    }

    #[test]
    fn test_seed_fetcher_injected_failure() {
        let fetcher = SeedFetcher::new().with_failures(["p1"]);
        let ok = Partition::from_pairs("p0", [("sku1", 10)]);
        let bad = Partition::from_pairs("p1", [("sku1", 10)]);

        assert!(fetcher.fetch(&ok).is_ok());
        let err = fetcher.fetch(&bad).unwrap_err();
        assert_eq!(err.partition(), "p1");
        assert!(matches!(err, FetchError::Unavailable { .. }));
    }

    #[test]
    fn test_seed_fetcher_delay_is_bounded() {
        let fetcher = SeedFetcher::new().with_max_delay(Duration::from_millis(5));
        let partition = Partition::from_pairs("p0", [("sku1", 1)]);

        for _ in 0..10 {
            assert!(fetcher.jitter() <= Duration::from_millis(5));
        }

        let start = Instant::now();
        fetcher.fetch(&partition).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
