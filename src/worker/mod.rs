//! Worker thread implementation
//!
//! A Worker owns exactly one partition. It runs three steps:
//!
//! 1. **Fetch**: ask the [`InventoryFetcher`] for the partition's items (no locks held)
//! 2. **Merge**: add every `(sku, quantity)` into the [`SharedAggregate`]
//! 3. **Arrive**: signal the [`ReusableBarrier`] and wait for the round to trip
//!
//! # Failure Handling
//!
//! A fetch or merge failure breaks the barrier so no other worker waits
//! forever for this partition. The failing worker does not retry and does not
//! arrive. Workers released by a break, or that find the barrier already
//! broken after fetching, stop without merging and report the round aborted.
//!
//! # Example
//!
//! ```
//! use inventory_sync::aggregate::SharedAggregate;
//! use inventory_sync::barrier::ReusableBarrier;
//! use inventory_sync::source::{Partition, SeedFetcher};
//! use inventory_sync::worker::{Worker, WorkerOutcome};
//! use std::sync::Arc;
//!
//! let aggregate = Arc::new(SharedAggregate::new());
//! let barrier = Arc::new(ReusableBarrier::new(1));
//! let partition = Partition::from_pairs("p0", [("sku1", 10)]);
//!
//! let worker = Worker::new(partition, Arc::new(SeedFetcher::new()), aggregate.clone(), barrier);
//! let outcome = worker.run();
//!
//! assert!(matches!(outcome, WorkerOutcome::Arrived { leader: true, .. }));
//! assert_eq!(aggregate.get("sku1"), Some(10));
//! ```

use crate::aggregate::{MergeError, SharedAggregate};
use crate::barrier::{BarrierError, BarrierState, ReusableBarrier};
use crate::source::{FetchError, InventoryFetcher, Partition};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Failure inside a worker's own fetch or merge step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
}

/// How a worker finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Merged and arrived; the generation tripped. The leader ran the finalizer.
    Arrived { generation: u64, leader: bool },

    /// Released by a broken barrier or gave up waiting
    Aborted(BarrierError),

    /// This worker's fetch or merge failed and it broke the barrier
    Failed(WorkerError),
}

impl WorkerOutcome {
    /// True when this worker caused the round to abort (its own failure or
    /// its own wait timing out)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            WorkerOutcome::Failed(_) | WorkerOutcome::Aborted(BarrierError::TimedOut { .. })
        )
    }

    pub fn is_arrived(&self) -> bool {
        matches!(self, WorkerOutcome::Arrived { .. })
    }
}

/// Processes one partition of a round
pub struct Worker {
    partition: Partition,
    fetcher: Arc<dyn InventoryFetcher>,
    aggregate: Arc<SharedAggregate>,
    barrier: Arc<ReusableBarrier>,
    arrive_timeout: Option<Duration>,
}

impl Worker {
    pub fn new(
        partition: Partition,
        fetcher: Arc<dyn InventoryFetcher>,
        aggregate: Arc<SharedAggregate>,
        barrier: Arc<ReusableBarrier>,
    ) -> Self {
        Self {
            partition,
            fetcher,
            aggregate,
            barrier,
            arrive_timeout: None,
        }
    }

    /// Bound the wait at the barrier; expiry breaks the barrier
    pub fn with_arrive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.arrive_timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.partition.id
    }

    /// Fetch, merge and arrive
    pub fn run(self) -> WorkerOutcome {
        let _guard = BreakOnPanic(&self.barrier);
        let id = self.partition.id.as_str();

        let items = match self.fetcher.fetch(&self.partition) {
            Ok(items) => items,
            Err(e) => return self.fail(WorkerError::Fetch(e)),
        };
        info!(partition = %id, items = items.len(), "received inventory");

        // The round may already be lost; don't contribute to a dead aggregate
        if let BarrierState::Broken { generation } = self.barrier.state() {
            warn!(partition = %id, generation, "barrier already broken, discarding fetched items");
            return WorkerOutcome::Aborted(BarrierError::Broken { generation });
        }

        for (sku, quantity) in &items {
            match self.aggregate.merge(sku, *quantity) {
                Ok(total) => debug!(partition = %id, sku = %sku, quantity, total, "merged"),
                Err(e) => return self.fail(WorkerError::Merge(e)),
            }
        }
        info!(partition = %id, merged = items.len(), "partial merge complete");

        let arrival = match self.arrive_timeout {
            Some(timeout) => self.barrier.arrive_timeout(timeout),
            None => self.barrier.arrive(),
        };

        match arrival {
            Ok(result) => {
                debug!(
                    partition = %id,
                    generation = result.generation(),
                    leader = result.is_leader(),
                    "barrier released"
                );
                WorkerOutcome::Arrived {
                    generation: result.generation(),
                    leader: result.is_leader(),
                }
            }
            Err(e) => {
                warn!(partition = %id, error = %e, "round aborted");
                WorkerOutcome::Aborted(e)
            }
        }
    }

    fn fail(&self, error: WorkerError) -> WorkerOutcome {
        error!(partition = %self.partition.id, error = %error, "worker failed, breaking barrier");
        self.barrier.break_barrier();
        WorkerOutcome::Failed(error)
    }
}

/// Breaks the barrier if the worker unwinds, so a panicking fetcher cannot
/// leave the other parties waiting forever
struct BreakOnPanic<'a>(&'a ReusableBarrier);

impl Drop for BreakOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.break_barrier();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ItemMap;
    use crate::source::mock::MockFetcher;
    use crate::source::SeedFetcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker(partition: Partition, fetcher: Arc<dyn InventoryFetcher>, aggregate: &Arc<SharedAggregate>, barrier: &Arc<ReusableBarrier>) -> Worker {
        Worker::new(partition, fetcher, Arc::clone(aggregate), Arc::clone(barrier))
    }

    struct PanickingFetcher;

    impl InventoryFetcher for PanickingFetcher {
        fn fetch(&self, _partition: &Partition) -> Result<ItemMap, FetchError> {
            panic!("fetcher exploded");
        }
    }

    #[test]
    fn test_single_worker_merges_and_leads() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        let barrier = Arc::new(ReusableBarrier::new(1));
        let partition = Partition::from_pairs("p0", [("sku1", 10), ("sku2", 5)]);

        let outcome = worker(partition, Arc::new(SeedFetcher::new()), &aggregate, &barrier).run();

        assert_eq!(outcome, WorkerOutcome::Arrived { generation: 0, leader: true });
        assert_eq!(aggregate.get("sku1"), Some(10));
        assert_eq!(aggregate.get("sku2"), Some(5));
    }

    #[test]
    fn test_fetch_failure_breaks_barrier_without_merging() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        let barrier = Arc::new(ReusableBarrier::new(2));
        let fetcher = MockFetcher::new();
        fetcher.fail("p0", "connection refused");

        let outcome = worker(Partition::from_pairs("p0", [("sku1", 1)]), Arc::new(fetcher), &aggregate, &barrier).run();

        assert!(matches!(outcome, WorkerOutcome::Failed(WorkerError::Fetch(_))));
        assert!(outcome.is_failure());
        assert!(barrier.is_broken());
        assert!(aggregate.is_empty());
    }

    #[test]
    fn test_merge_failure_breaks_barrier() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        aggregate.merge("sku1", u64::MAX).unwrap();
        let barrier = Arc::new(ReusableBarrier::new(2));

        let outcome = worker(
            Partition::from_pairs("p0", [("sku1", 1)]),
            Arc::new(SeedFetcher::new()),
            &aggregate,
            &barrier,
        )
        .run();

        assert!(matches!(outcome, WorkerOutcome::Failed(WorkerError::Merge(MergeError::Overflow { .. }))));
        assert!(barrier.is_broken());
    }

    #[test]
    fn test_worker_on_broken_barrier_discards_items() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        let barrier = Arc::new(ReusableBarrier::new(2));
        barrier.break_barrier();

        let outcome = worker(
            Partition::from_pairs("p0", [("sku1", 1)]),
            Arc::new(SeedFetcher::new()),
            &aggregate,
            &barrier,
        )
        .run();

        assert_eq!(outcome, WorkerOutcome::Aborted(BarrierError::Broken { generation: 0 }));
        assert!(!outcome.is_failure());
        assert!(aggregate.is_empty());
    }

    #[test]
    fn test_waiting_worker_released_by_peer_failure() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        let barrier = Arc::new(ReusableBarrier::new(2));
        let fetcher = MockFetcher::new();
        fetcher.fail("p1", "boom");
        fetcher.delay("p1", Duration::from_millis(50));
        let fetcher: Arc<dyn InventoryFetcher> = Arc::new(fetcher);

        let first = worker(Partition::from_pairs("p0", [("sku1", 7)]), fetcher.clone(), &aggregate, &barrier);
        let second = worker(Partition::from_pairs("p1", [("sku1", 3)]), fetcher, &aggregate, &barrier);

        let h0 = thread::spawn(move || first.run());
        let h1 = thread::spawn(move || second.run());

        assert_eq!(h0.join().unwrap(), WorkerOutcome::Aborted(BarrierError::Broken { generation: 0 }));
        assert!(matches!(h1.join().unwrap(), WorkerOutcome::Failed(_)));
        assert_eq!(aggregate.get("sku1"), Some(7));
    }

    #[test]
    fn test_arrive_timeout_reports_timed_out() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        let barrier = Arc::new(ReusableBarrier::new(2));

        let outcome = worker(
            Partition::from_pairs("p0", [("sku1", 1)]),
            Arc::new(SeedFetcher::new()),
            &aggregate,
            &barrier,
        )
        .with_arrive_timeout(Some(Duration::from_millis(20)))
        .run();

        assert_eq!(outcome, WorkerOutcome::Aborted(BarrierError::TimedOut { generation: 0 }));
        assert!(outcome.is_failure());
        assert!(barrier.is_broken());
    }

    #[test]
    fn test_panicking_fetcher_breaks_barrier() {
        let aggregate = Arc::new(SharedAggregate::with_shards(2));
        let barrier = Arc::new(ReusableBarrier::new(2));

        let panicking = worker(Partition::from_pairs("p0", []), Arc::new(PanickingFetcher), &aggregate, &barrier);
        assert!(thread::spawn(move || panicking.run()).join().is_err());

        assert!(barrier.is_broken());
    }

    #[test]
    fn test_workers_trip_barrier_once() {
        let parties = 5;
        let aggregate = Arc::new(SharedAggregate::with_shards(4));
        let trips = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&trips);
        let barrier = Arc::new(ReusableBarrier::with_action(parties, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let fetcher: Arc<dyn InventoryFetcher> = Arc::new(SeedFetcher::new());

        let handles: Vec<_> = (0..parties)
            .map(|i| {
                let w = worker(Partition::from_pairs(format!("p{}", i), [("sku", 2)]), fetcher.clone(), &aggregate, &barrier);
                thread::spawn(move || w.run())
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(outcomes.iter().all(WorkerOutcome::is_arrived));
        assert_eq!(
            outcomes.iter().filter(|o| matches!(o, WorkerOutcome::Arrived { leader: true, .. })).count(),
            1
        );
        assert_eq!(trips.load(Ordering::SeqCst), 1);
        assert_eq!(aggregate.get("sku"), Some(10));
    }
}
