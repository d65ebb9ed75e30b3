//! inventory-sync - barrier-coordinated inventory aggregation
//!
//! Fans a round of work out to one thread per partition, merges every
//! partition's SKU quantities into a shared aggregate, and persists the merged
//! result exactly once, after every partition has reported.
//!
//! # Architecture
//!
//! - **Reusable barrier**: generation-tracked barrier that runs a finalize action once per trip and can be broken and reset
//! - **Shared aggregate**: sharded map with atomic upsert-or-add merges
//! - **Workers**: fetch, merge, arrive; a failure breaks the barrier instead of deadlocking peers
//! - **Coordinator**: runs a round with the barrier or channel strategy and reports the outcome
//! - **Sources and stores**: pluggable `fetch` and `persist` collaborators

pub mod aggregate;
pub mod barrier;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod output;
pub mod source;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use aggregate::{ItemMap, SharedAggregate};
pub use barrier::{BarrierError, ReusableBarrier};
pub use config::Config;
pub use coordinator::{RoundCoordinator, RoundError, RoundOptions, RoundReport, RoundStrategy};
pub use worker::{Worker, WorkerOutcome};

/// Result type used for application glue (config, CLI, sources)
pub type Result<T> = anyhow::Result<T>;
