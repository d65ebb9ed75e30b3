//! Round finalizer
//!
//! The single action run when a round synchronizes: snapshot the aggregate
//! and hand it to the inventory store. Failures are recorded for the
//! coordinator, never propagated back into the workers.

use crate::aggregate::{ItemMap, SharedAggregate};
use crate::store::{InventoryRecord, InventoryStore, PersistError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// What the finalizer did for one generation
#[derive(Debug)]
pub struct FinalizerOutcome {
    pub generation: u64,
    pub snapshot: ItemMap,
    pub persisted: Result<(), PersistError>,
}

pub struct Finalizer {
    store: Arc<dyn InventoryStore>,
    invocations: AtomicUsize,
    outcome: Mutex<Option<FinalizerOutcome>>,
}

impl Finalizer {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self {
            store,
            invocations: AtomicUsize::new(0),
            outcome: Mutex::new(None),
        }
    }

    /// Barrier action: read the aggregate and persist it
    ///
    /// Called on the tripping thread after every party has merged, so no
    /// merge runs concurrently with the read.
    pub fn finalize(&self, generation: u64, aggregate: &SharedAggregate) {
        self.finalize_snapshot(generation, aggregate.contents());
    }

    /// Persist an already-merged snapshot
    pub fn finalize_snapshot(&self, generation: u64, snapshot: ItemMap) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        info!(generation, items = snapshot.len(), "all partitions merged, persisting inventory");

        let record = InventoryRecord::new(generation, snapshot);
        let persisted = self.store.persist(&record);
        if let Err(e) = &persisted {
            error!(generation, error = %e, "failed to persist inventory");
        }

        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(FinalizerOutcome {
            generation,
            snapshot: record.items,
            persisted,
        });
    }

    /// Number of times the finalizer has run
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Take the most recent outcome, if the finalizer ran
    pub fn take_outcome(&self) -> Option<FinalizerOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
