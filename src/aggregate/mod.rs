//! Shared inventory aggregate
//!
//! A concurrently-mutable map from SKU to accumulated quantity. Workers merge
//! their partial results into it in parallel; the finalizer reads a snapshot
//! once every worker has arrived at the barrier.
//!
//! Keys are spread over a power-of-two number of mutex-guarded shards, so
//! merges of unrelated keys rarely contend while merges of the same key are
//! serialized by that key's shard lock (an atomic read-modify-write).
//!
//! # Example
//!
//! ```
//! use inventory_sync::aggregate::SharedAggregate;
//!
//! let aggregate = SharedAggregate::new();
//! aggregate.merge("sku1", 10).unwrap();
//! aggregate.merge("sku1", 3).unwrap();
//! aggregate.merge("sku2", 5).unwrap();
//!
//! let contents = aggregate.contents();
//! assert_eq!(contents["sku1"], 13);
//! assert_eq!(contents["sku2"], 5);
//! ```

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Mapping of SKU to quantity, sorted by SKU
pub type ItemMap = BTreeMap<String, u64>;

/// Shards allocated per CPU when no explicit count is given
const SHARDS_PER_CPU: usize = 4;

/// Failure while combining a partial result into the aggregate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("quantity overflow merging {quantity} into '{key}' (current total {current})")]
    Overflow { key: String, current: u64, quantity: u64 },

    #[error("item key must not be empty")]
    EmptyKey,
}

/// Sharded, thread-safe SKU → quantity map with upsert-or-add semantics
#[derive(Debug)]
pub struct SharedAggregate {
    shards: Box<[Mutex<HashMap<String, u64>>]>,
    mask: usize,
}

impl SharedAggregate {
    /// Create an aggregate sized for this machine (four shards per CPU)
    pub fn new() -> Self {
        Self::with_shards(num_cpus::get() * SHARDS_PER_CPU)
    }

    /// Create an aggregate with at least `shards` shards
    ///
    /// The count is rounded up to the next power of two; zero is treated as one.
    pub fn with_shards(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            mask: count - 1,
        }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Add `quantity` to `key`, inserting it if absent
    ///
    /// Returns the new accumulated value for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Overflow`] if the sum would not fit in a `u64`;
    /// the stored value is left unchanged. Returns [`MergeError::EmptyKey`]
    /// for an empty key.
    pub fn merge(&self, key: &str, quantity: u64) -> Result<u64, MergeError> {
        if key.is_empty() {
            return Err(MergeError::EmptyKey);
        }

        let mut shard = self.shard(key);
        match shard.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                let total = current.checked_add(quantity).ok_or_else(|| MergeError::Overflow {
                    key: key.to_string(),
                    current,
                    quantity,
                })?;
                entry.insert(total);
                Ok(total)
            }
            Entry::Vacant(entry) => Ok(*entry.insert(quantity)),
        }
    }

    /// Merge every entry of `items`, stopping at the first error
    ///
    /// Entries merged before the failing one stay merged.
    pub fn merge_all<'a, I>(&self, items: I) -> Result<usize, MergeError>
    where
        I: IntoIterator<Item = (&'a String, &'a u64)>,
    {
        let mut merged = 0;
        for (key, quantity) in items {
            self.merge(key, *quantity)?;
            merged += 1;
        }
        Ok(merged)
    }

    /// Current value for `key`
    pub fn get(&self, key: &str) -> Option<u64> {
        self.shard(key).get(key).copied()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| lock(s).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| lock(s).is_empty())
    }

    /// Sorted snapshot of every key and its accumulated quantity
    ///
    /// Shards are locked one at a time, so the snapshot is only consistent
    /// when no merges run concurrently (as is the case after a barrier trip).
    pub fn contents(&self) -> ItemMap {
        let mut snapshot = ItemMap::new();
        for shard in self.shards.iter() {
            snapshot.extend(lock(shard).iter().map(|(k, v)| (k.clone(), *v)));
        }
        snapshot
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, HashMap<String, u64>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) & self.mask;
        lock(&self.shards[index])
    }
}

impl Default for SharedAggregate {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
