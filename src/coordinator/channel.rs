//! Channel-based round
//!
//! Workers fetch in parallel and send their partial maps over a channel to
//! the coordinating thread, which is the only writer of the aggregate. After
//! receiving one successful message per partition it runs the finalizer. The
//! first failure aborts the round: later partials are discarded and the
//! finalizer never runs.

use super::{RoundError, WorkerReport};
use crate::aggregate::{ItemMap, SharedAggregate};
use crate::barrier::BarrierError;
use crate::coordinator::finalizer::Finalizer;
use crate::source::{FetchError, InventoryFetcher, Partition};
use crate::worker::{WorkerError, WorkerOutcome};
use crossbeam::channel;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Channel rounds have no barrier; every round is generation 0
const CHANNEL_GENERATION: u64 = 0;

enum PartialResult {
    Items { index: usize, items: ItemMap },
    Failed { index: usize, error: FetchError },
}

/// Run one round; returns per-partition outcomes and the merged snapshot
pub(super) fn run_round(
    fetcher: &Arc<dyn InventoryFetcher>,
    finalizer: &Finalizer,
    partitions: Vec<Partition>,
) -> Result<(Vec<WorkerReport>, ItemMap), RoundError> {
    let parties = partitions.len();
    let ids: Vec<String> = partitions.iter().map(|p| p.id.clone()).collect();
    let (tx, rx) = channel::unbounded();

    let mut handles = Vec::with_capacity(parties);
    for (index, partition) in partitions.into_iter().enumerate() {
        let tx = tx.clone();
        let fetcher = Arc::clone(fetcher);
        let handle = thread::Builder::new()
            .name(format!("worker-{}", partition.id))
            .spawn(move || {
                let message = match fetcher.fetch(&partition) {
                    Ok(items) => {
                        info!(partition = %partition.id, items = items.len(), "received inventory");
                        PartialResult::Items { index, items }
                    }
                    Err(error) => PartialResult::Failed { index, error },
                };
                // Only fails if the aggregator already gave up on the round
                let _ = tx.send(message);
            })
            .map_err(|source| RoundError::Spawn {
                partition: ids[index].clone(),
                source,
            })?;
        handles.push(handle);
    }
    drop(tx);

    let aggregate = SharedAggregate::with_shards(1);
    let mut outcomes: Vec<Option<WorkerOutcome>> = vec![None; parties];
    let mut aborted = false;

    for message in rx.iter().take(parties) {
        match message {
            PartialResult::Items { index, items } if !aborted => match aggregate.merge_all(&items) {
                Ok(merged) => {
                    info!(partition = %ids[index], merged, "partial merge complete");
                    outcomes[index] = Some(WorkerOutcome::Arrived {
                        generation: CHANNEL_GENERATION,
                        leader: false,
                    });
                }
                Err(e) => {
                    error!(partition = %ids[index], error = %e, "merge failed, aborting round");
                    aborted = true;
                    outcomes[index] = Some(WorkerOutcome::Failed(WorkerError::Merge(e)));
                }
            },
            PartialResult::Items { index, .. } => {
                warn!(partition = %ids[index], "round already aborted, discarding partial result");
                outcomes[index] = Some(WorkerOutcome::Aborted(BarrierError::Broken {
                    generation: CHANNEL_GENERATION,
                }));
            }
            PartialResult::Failed { index, error } => {
                error!(partition = %ids[index], error = %error, "fetch failed, aborting round");
                aborted = true;
                outcomes[index] = Some(WorkerOutcome::Failed(WorkerError::Fetch(error)));
            }
        }
    }

    let mut panicked = None;
    for (index, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() && panicked.is_none() {
            panicked = Some(ids[index].clone());
        }
    }
    if let Some(partition) = panicked {
        return Err(RoundError::WorkerPanicked { partition });
    }

    if aborted {
        for outcome in outcomes.iter_mut().flatten() {
            if outcome.is_arrived() {
                *outcome = WorkerOutcome::Aborted(BarrierError::Broken {
                    generation: CHANNEL_GENERATION,
                });
            }
        }
    } else {
        finalizer.finalize(CHANNEL_GENERATION, &aggregate);
    }

    let workers = ids
        .into_iter()
        .zip(outcomes)
        .map(|(partition, outcome)| WorkerReport {
            partition,
            outcome: outcome.unwrap_or(WorkerOutcome::Aborted(BarrierError::Broken {
                generation: CHANNEL_GENERATION,
            })),
        })
        .collect();

    Ok((workers, aggregate.contents()))
}
