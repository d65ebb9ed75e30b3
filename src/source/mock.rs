//! Mock inventory fetcher for testing
//!
//! Lets tests script exactly what each partition's fetch returns, inject
//! failures, delay individual partitions to force an arrival order, and
//! inspect which partitions were fetched.
//!
//! # Example
//!
//! ```
//! use inventory_sync::source::{InventoryFetcher, Partition};
//! use inventory_sync::source::mock::MockFetcher;
//!
//! let fetcher = MockFetcher::new();
//! fetcher.fail("p1", "connection refused");
//!
//! let ok = Partition::from_pairs("p0", [("sku1", 4)]);
//! let bad = Partition::from_pairs("p1", [("sku1", 4)]);
//!
//! assert_eq!(fetcher.fetch(&ok).unwrap()["sku1"], 4);
//! assert!(fetcher.fetch(&bad).is_err());
//! assert_eq!(fetcher.fetched(), vec!["p0".to_string(), "p1".to_string()]);
//! ```

use super::{FetchError, InventoryFetcher, Partition};
use crate::aggregate::ItemMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted fetcher
///
/// Partitions without a scripted response return their seed items.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Result<ItemMap, FetchError>>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `items` for partition `id` instead of its seed items
    pub fn respond(&self, id: &str, items: ItemMap) {
        self.responses.lock().unwrap().insert(id.to_string(), Ok(items));
    }

    /// Fail fetches of partition `id`
    pub fn fail(&self, id: &str, reason: &str) {
        self.responses.lock().unwrap().insert(
            id.to_string(),
            Err(FetchError::Unavailable {
                partition: id.to_string(),
                reason: reason.to_string(),
            }),
        );
    }

    /// Sleep for `delay` before answering partition `id`
    pub fn delay(&self, id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
    }

    /// Partition ids fetched so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.lock().unwrap().len()
    }
}

impl InventoryFetcher for MockFetcher {
    fn fetch(&self, partition: &Partition) -> Result<ItemMap, FetchError> {
        let delay = self.delays.lock().unwrap().get(&partition.id).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        self.fetched.lock().unwrap().push(partition.id.clone());

        match self.responses.lock().unwrap().get(&partition.id) {
            Some(response) => response.clone(),
            None => Ok(partition.items.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fetcher_defaults_to_seed_items() {
        let fetcher = MockFetcher::new();
        let partition = Partition::from_pairs("p0", [("sku1", 1), ("sku2", 2)]);
        assert_eq!(fetcher.fetch(&partition).unwrap(), partition.items);
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn test_mock_fetcher_scripted_response() {
        let fetcher = MockFetcher::new();
        let mut items = ItemMap::new();
        items.insert("sku9".to_string(), 9);
        fetcher.respond("p0", items.clone());

        let partition = Partition::from_pairs("p0", [("sku1", 1)]);
        assert_eq!(fetcher.fetch(&partition).unwrap(), items);
    }

    #[test]
    fn test_mock_fetcher_failure_names_partition() {
        let fetcher = MockFetcher::new();
        fetcher.fail("p2", "timeout");

        let err = fetcher.fetch(&Partition::from_pairs("p2", [])).unwrap_err();
        assert_eq!(err.partition(), "p2");
        assert_eq!(err.to_string(), "source 'p2' unavailable: timeout");
    }

    #[test]
    fn test_mock_fetcher_clones_share_state() {
        let fetcher = MockFetcher::new();
        let clone = fetcher.clone();
        clone.fetch(&Partition::from_pairs("p0", [])).unwrap();
        assert_eq!(fetcher.fetched(), vec!["p0".to_string()]);
    }
}
