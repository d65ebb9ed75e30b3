//! Round coordinator
//!
//! Orchestrates one fan-out/fan-in round: spawns a worker thread per
//! partition, lets them merge into a shared aggregate, and persists the
//! result exactly once when every partition has reported.
//!
//! # Strategies
//!
//! - **Barrier** (default): workers merge into a [`SharedAggregate`] and arrive
//!   at a [`ReusableBarrier`]; the last arrival runs the [`Finalizer`].
//! - **Channel**: workers send partial maps to the coordinating thread, which
//!   merges them and runs the finalizer after the last message.
//!
//! # Example
//!
//! ```
//! use inventory_sync::coordinator::{RoundCoordinator, RoundOptions};
//! use inventory_sync::source::{Partition, SeedFetcher};
//! use inventory_sync::store::memory::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let coordinator = RoundCoordinator::new(
//!     Arc::new(SeedFetcher::new()),
//!     Arc::new(store.clone()),
//!     RoundOptions::default(),
//! );
//!
//! let report = coordinator.run_round(vec![
//!     Partition::from_pairs("p0", [("sku1", 10), ("sku2", 5)]),
//!     Partition::from_pairs("p1", [("sku1", 3)]),
//! ])?;
//!
//! assert_eq!(report.aggregate["sku1"], 13);
//! assert_eq!(store.persist_count(), 1);
//! # Ok::<(), inventory_sync::coordinator::RoundError>(())
//! ```

pub mod channel;
pub mod finalizer;

use crate::aggregate::{ItemMap, SharedAggregate};
use crate::barrier::ReusableBarrier;
use crate::config::Config;
use crate::source::{InventoryFetcher, Partition};
use crate::store::{InventoryStore, PersistError};
use crate::worker::{Worker, WorkerOutcome};
use finalizer::{Finalizer, FinalizerOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// How partial results are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStrategy {
    #[default]
    Barrier,
    Channel,
}

impl fmt::Display for RoundStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStrategy::Barrier => write!(f, "barrier"),
            RoundStrategy::Channel => write!(f, "channel"),
        }
    }
}

/// Tunables for a round
#[derive(Debug, Clone, Default)]
pub struct RoundOptions {
    pub strategy: RoundStrategy,
    /// Bound on each worker's wait at the barrier (barrier strategy only)
    pub arrive_timeout: Option<Duration>,
    /// Aggregate shard count; defaults to four per CPU
    pub shards: Option<usize>,
}

impl RoundOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            strategy: config.runtime.strategy,
            arrive_timeout: config.runtime.arrive_timeout_ms.map(Duration::from_millis),
            shards: config.aggregate.shards,
        }
    }
}

/// Final outcome of one partition's worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub partition: String,
    pub outcome: WorkerOutcome,
}

/// A synchronized and persisted round
#[derive(Debug)]
pub struct RoundReport {
    pub strategy: RoundStrategy,
    pub generation: u64,
    pub aggregate: ItemMap,
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl RoundReport {
    /// Partition whose worker ran the finalizer (barrier strategy only)
    pub fn leader(&self) -> Option<&str> {
        self.workers
            .iter()
            .find(|w| matches!(w.outcome, WorkerOutcome::Arrived { leader: true, .. }))
            .map(|w| w.partition.as_str())
    }
}

/// Why a round did not produce a persisted aggregate
#[derive(Debug, Error)]
pub enum RoundError {
    #[error("no partitions to process")]
    NoPartitions,

    /// The round never synchronized; persistence was not attempted
    #[error("round aborted, failed partitions: {failed:?}")]
    Aborted {
        failed: Vec<String>,
        /// What had been merged before the abort
        snapshot: ItemMap,
        workers: Vec<WorkerReport>,
    },

    /// The round synchronized but the store rejected the aggregate
    #[error("round {generation} synchronized but persistence failed: {source}")]
    Persist {
        generation: u64,
        snapshot: ItemMap,
        #[source]
        source: PersistError,
    },

    #[error("worker thread for partition '{partition}' panicked")]
    WorkerPanicked { partition: String },

    #[error("failed to spawn worker thread for partition '{partition}': {source}")]
    Spawn {
        partition: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs fan-out/fan-in rounds against a fetcher and a store
pub struct RoundCoordinator {
    fetcher: Arc<dyn InventoryFetcher>,
    store: Arc<dyn InventoryStore>,
    options: RoundOptions,
}

impl RoundCoordinator {
    pub fn new(
        fetcher: Arc<dyn InventoryFetcher>,
        store: Arc<dyn InventoryStore>,
        options: RoundOptions,
    ) -> Self {
        Self {
            fetcher,
            store,
            options,
        }
    }

    pub fn options(&self) -> &RoundOptions {
        &self.options
    }

    /// Process every partition and persist the merged aggregate once
    ///
    /// # Errors
    ///
    /// - [`RoundError::NoPartitions`] for an empty partition list
    /// - [`RoundError::Aborted`] if any worker failed; nothing was persisted
    /// - [`RoundError::Persist`] if the round synchronized but persisting failed
    /// - [`RoundError::WorkerPanicked`] / [`RoundError::Spawn`] for thread failures
    pub fn run_round(&self, partitions: Vec<Partition>) -> Result<RoundReport, RoundError> {
        if partitions.is_empty() {
            return Err(RoundError::NoPartitions);
        }

        let started = Instant::now();
        let strategy = self.options.strategy;
        info!(partitions = partitions.len(), strategy = %strategy, "starting round");

        let finalizer = Arc::new(Finalizer::new(Arc::clone(&self.store)));
        let (workers, snapshot) = match strategy {
            RoundStrategy::Barrier => self.run_barrier_round(&finalizer, partitions)?,
            RoundStrategy::Channel => channel::run_round(&self.fetcher, &finalizer, partitions)?,
        };

        let elapsed = started.elapsed();
        match finalizer.take_outcome() {
            Some(FinalizerOutcome {
                generation,
                snapshot,
                persisted: Ok(()),
            }) => {
                info!(generation, items = snapshot.len(), elapsed_ms = elapsed.as_millis() as u64, "round complete");
                Ok(RoundReport {
                    strategy,
                    generation,
                    aggregate: snapshot,
                    workers,
                    elapsed,
                })
            }
            Some(FinalizerOutcome {
                generation,
                snapshot,
                persisted: Err(source),
            }) => Err(RoundError::Persist {
                generation,
                snapshot,
                source,
            }),
            None => {
                let failed: Vec<String> = workers
                    .iter()
                    .filter(|w| w.outcome.is_failure())
                    .map(|w| w.partition.clone())
                    .collect();
                warn!(failed = ?failed, "round aborted, nothing persisted");
                Err(RoundError::Aborted {
                    failed,
                    snapshot,
                    workers,
                })
            }
        }
    }

    fn run_barrier_round(
        &self,
        finalizer: &Arc<Finalizer>,
        partitions: Vec<Partition>,
    ) -> Result<(Vec<WorkerReport>, ItemMap), RoundError> {
        let aggregate = Arc::new(match self.options.shards {
            Some(shards) => SharedAggregate::with_shards(shards),
            None => SharedAggregate::new(),
        });

        let barrier = {
            let finalizer = Arc::clone(finalizer);
            let aggregate = Arc::clone(&aggregate);
            Arc::new(ReusableBarrier::with_action(partitions.len(), move |generation| {
                finalizer.finalize(generation, &aggregate)
            }))
        };

        let mut handles: Vec<(String, JoinHandle<WorkerOutcome>)> = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let id = partition.id.clone();
            let worker = Worker::new(
                partition,
                Arc::clone(&self.fetcher),
                Arc::clone(&aggregate),
                Arc::clone(&barrier),
            )
            .with_arrive_timeout(self.options.arrive_timeout);

            match thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker.run())
            {
                Ok(handle) => handles.push((id, handle)),
                Err(source) => {
                    error!(partition = %id, error = %source, "failed to spawn worker");
                    // Release the workers already waiting for this party
                    barrier.break_barrier();
                    let _ = join_workers(handles);
                    return Err(RoundError::Spawn { partition: id, source });
                }
            }
        }

        let workers = join_workers(handles)?;
        Ok((workers, aggregate.contents()))
    }
}

/// Join every worker; a panic is reported after all threads have finished
fn join_workers(handles: Vec<(String, JoinHandle<WorkerOutcome>)>) -> Result<Vec<WorkerReport>, RoundError> {
    let mut workers = Vec::with_capacity(handles.len());
    let mut panicked = None;

    for (partition, handle) in handles {
        match handle.join() {
            Ok(outcome) => workers.push(WorkerReport { partition, outcome }),
            Err(_) => {
                error!(partition = %partition, "worker thread panicked");
                panicked.get_or_insert(partition);
            }
        }
    }

    match panicked {
        Some(partition) => Err(RoundError::WorkerPanicked { partition }),
        None => Ok(workers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::BarrierError;
    use crate::source::mock::MockFetcher;
    use crate::source::{FetchError, SeedFetcher};
    use crate::store::memory::MemoryStore;
    use crate::worker::WorkerError;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn items(pairs: &[(&str, u64)]) -> ItemMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn scenario_partitions() -> Vec<Partition> {
        vec![
            Partition::from_pairs("p0", [("sku1", 10), ("sku2", 5)]),
            Partition::from_pairs("p1", [("sku1", 3)]),
            Partition::from_pairs("p2", [("sku2", 7), ("sku3", 1)]),
        ]
    }

    fn coordinator(fetcher: Arc<dyn InventoryFetcher>, store: &MemoryStore, strategy: RoundStrategy) -> RoundCoordinator {
        RoundCoordinator::new(
            fetcher,
            Arc::new(store.clone()),
            RoundOptions {
                strategy,
                arrive_timeout: None,
                shards: Some(4),
            },
        )
    }

    #[test]
    fn test_three_partition_scenario() {
        for strategy in [RoundStrategy::Barrier, RoundStrategy::Channel] {
            let store = MemoryStore::new();
            let report = coordinator(Arc::new(SeedFetcher::new()), &store, strategy)
                .run_round(scenario_partitions())
                .unwrap();

            let expected = items(&[("sku1", 13), ("sku2", 12), ("sku3", 1)]);
            assert_eq!(report.aggregate, expected);
            assert_eq!(report.generation, 0);
            assert_eq!(report.strategy, strategy);
            assert_eq!(report.workers.len(), 3);
            assert!(report.workers.iter().all(|w| w.outcome.is_arrived()));

            assert_eq!(store.persist_count(), 1, "strategy {}", strategy);
            assert_eq!(store.last().unwrap().items, expected);
        }
    }

    #[test]
    fn test_barrier_round_has_single_leader() {
        let store = MemoryStore::new();
        let report = coordinator(Arc::new(SeedFetcher::new()), &store, RoundStrategy::Barrier)
            .run_round(scenario_partitions())
            .unwrap();

        let leaders = report
            .workers
            .iter()
            .filter(|w| matches!(w.outcome, WorkerOutcome::Arrived { leader: true, .. }))
            .count();
        assert_eq!(leaders, 1);
        assert!(report.leader().is_some());
    }

    #[test]
    fn test_second_fetch_fails() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        fetcher.delay("p1", Duration::from_millis(50));
        fetcher.fail("p1", "endpoint unreachable");
        fetcher.delay("p2", Duration::from_millis(200));

        let err = coordinator(Arc::new(fetcher), &store, RoundStrategy::Barrier)
            .run_round(scenario_partitions())
            .unwrap_err();

        match err {
            RoundError::Aborted {
                failed,
                snapshot,
                workers,
            } => {
                assert_eq!(failed, vec!["p1".to_string()]);
                assert_eq!(snapshot, items(&[("sku1", 10), ("sku2", 5)]));
                assert_eq!(workers[0].outcome, WorkerOutcome::Aborted(BarrierError::Broken { generation: 0 }));
                assert!(matches!(workers[1].outcome, WorkerOutcome::Failed(WorkerError::Fetch(_))));
                assert_eq!(workers[2].outcome, WorkerOutcome::Aborted(BarrierError::Broken { generation: 0 }));
            }
            other => panic!("expected aborted round, got {:?}", other),
        }
        assert_eq!(store.persist_count(), 0);
    }

    #[test]
    fn test_channel_round_fetch_failure_never_persists() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        fetcher.fail("p1", "endpoint unreachable");

        let err = coordinator(Arc::new(fetcher), &store, RoundStrategy::Channel)
            .run_round(scenario_partitions())
            .unwrap_err();

        match err {
            RoundError::Aborted { failed, workers, .. } => {
                assert_eq!(failed, vec!["p1".to_string()]);
                assert!(workers.iter().all(|w| !w.outcome.is_arrived()));
            }
            other => panic!("expected aborted round, got {:?}", other),
        }
        assert_eq!(store.persist_count(), 0);
    }

    #[test]
    fn test_persist_failure_surfaces_after_sync() {
        for strategy in [RoundStrategy::Barrier, RoundStrategy::Channel] {
            let store = MemoryStore::new();
            store.fail_with("database offline");

            let err = coordinator(Arc::new(SeedFetcher::new()), &store, strategy)
                .run_round(scenario_partitions())
                .unwrap_err();

            match err {
                RoundError::Persist { generation, snapshot, source } => {
                    assert_eq!(generation, 0);
                    assert_eq!(snapshot, items(&[("sku1", 13), ("sku2", 12), ("sku3", 1)]));
                    assert!(matches!(source, PersistError::Rejected(_)));
                }
                other => panic!("expected persist error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_no_partitions() {
        let store = MemoryStore::new();
        let err = coordinator(Arc::new(SeedFetcher::new()), &store, RoundStrategy::Barrier)
            .run_round(Vec::new())
            .unwrap_err();
        assert!(matches!(err, RoundError::NoPartitions));
    }

    #[test]
    fn test_arrive_timeout_aborts_hung_round() {
        let store = MemoryStore::new();
        let fetcher = MockFetcher::new();
        // p2 is slower than everyone's arrival timeout
        fetcher.delay("p2", Duration::from_millis(300));

        let coordinator = RoundCoordinator::new(
            Arc::new(fetcher),
            Arc::new(store.clone()),
            RoundOptions {
                strategy: RoundStrategy::Barrier,
                arrive_timeout: Some(Duration::from_millis(50)),
                shards: None,
            },
        );

        let err = coordinator.run_round(scenario_partitions()).unwrap_err();
        match err {
            RoundError::Aborted { failed, workers, .. } => {
                assert!(!failed.is_empty());
                assert!(!failed.contains(&"p2".to_string()));
                assert_eq!(workers[2].outcome, WorkerOutcome::Aborted(BarrierError::Broken { generation: 0 }));
            }
            other => panic!("expected aborted round, got {:?}", other),
        }
        assert_eq!(store.persist_count(), 0);
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        struct Exploding;

        impl InventoryFetcher for Exploding {
            fn fetch(&self, partition: &Partition) -> Result<ItemMap, FetchError> {
                if partition.id == "p1" {
                    panic!("fetcher exploded");
                }
                Ok(partition.items.clone())
            }
        }

        for strategy in [RoundStrategy::Barrier, RoundStrategy::Channel] {
            let store = MemoryStore::new();
            let err = coordinator(Arc::new(Exploding), &store, strategy)
                .run_round(scenario_partitions())
                .unwrap_err();

            assert!(matches!(err, RoundError::WorkerPanicked { ref partition } if partition == "p1"));
            assert_eq!(store.persist_count(), 0);
        }
    }

    #[test]
    fn test_randomized_rounds_sum_exactly() {
        let keys = ["sku1", "sku2", "sku3", "sku4", "sku5"];

        for seed in 0..10u64 {
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            let count = rng.gen_range(2..12);
            let mut expected = ItemMap::new();

            let partitions: Vec<Partition> = (0..count)
                .map(|i| {
                    let mut partition_items = ItemMap::new();
                    for key in keys {
                        if !rng.gen_bool(0.6) {
                            continue;
                        }
                        let quantity = rng.gen_range(1..1000);
                        partition_items.insert(key.to_string(), quantity);
                        *expected.entry(key.to_string()).or_insert(0) += quantity;
                    }
                    Partition::new(format!("p{}", i), partition_items)
                })
                .collect();

            for strategy in [RoundStrategy::Barrier, RoundStrategy::Channel] {
                let store = MemoryStore::new();
                let fetcher = SeedFetcher::new().with_max_delay(Duration::from_millis(3));
                let report = coordinator(Arc::new(fetcher), &store, strategy)
                    .run_round(partitions.clone())
                    .unwrap();

                assert_eq!(report.aggregate, expected, "seed {} strategy {}", seed, strategy);
                assert_eq!(store.persist_count(), 1);
            }
        }
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(serde_json::to_string(&RoundStrategy::Channel).unwrap(), "\"channel\"");
        let parsed: RoundStrategy = serde_json::from_str("\"barrier\"").unwrap();
        assert_eq!(parsed, RoundStrategy::Barrier);
    }
}
