//! Reusable barrier with a completion action
//!
//! The barrier releases a fixed number of parties together and runs a single
//! action on the thread of the last party to arrive. It is reusable: after a
//! trip it moves to the next generation and accepts a fresh set of arrivals.
//!
//! # States
//!
//! - **Waiting(generation, arrived)**: collecting arrivals for `generation`
//! - **Tripped(generation)**: transient, the action runs while the state lock is held
//! - **Broken(generation)**: a party gave up; every waiter was released with an error
//!
//! A broken barrier stays broken until [`ReusableBarrier::reset`] is called.
//! Arrivals against a broken barrier fail immediately with
//! [`BarrierError::Broken`].
//!
//! # Example
//!
//! ```
//! use inventory_sync::barrier::ReusableBarrier;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::thread;
//!
//! let trips = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&trips);
//! let barrier = Arc::new(ReusableBarrier::with_action(3, move |_generation| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! let handles: Vec<_> = (0..3)
//!     .map(|_| {
//!         let barrier = Arc::clone(&barrier);
//!         thread::spawn(move || barrier.arrive().unwrap())
//!     })
//!     .collect();
//!
//! let leaders = handles
//!     .into_iter()
//!     .map(|h| h.join().unwrap())
//!     .filter(|r| r.is_leader())
//!     .count();
//!
//! assert_eq!(leaders, 1);
//! assert_eq!(trips.load(Ordering::SeqCst), 1);
//! assert_eq!(barrier.generation(), 1);
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Error returned to a party that did not complete a normal trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BarrierError {
    /// The generation was broken (by `break_barrier`, `reset`, a timed-out
    /// party, or a panicking action) before all parties arrived
    #[error("barrier broken in generation {generation}")]
    Broken { generation: u64 },

    /// This party's bounded wait expired; the barrier has been broken
    #[error("timed out waiting at barrier in generation {generation}")]
    TimedOut { generation: u64 },
}

impl BarrierError {
    /// Generation the error was observed in
    pub fn generation(&self) -> u64 {
        match self {
            BarrierError::Broken { generation } | BarrierError::TimedOut { generation } => *generation,
        }
    }
}

/// Observable barrier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Waiting { generation: u64, arrived: usize },
    Broken { generation: u64 },
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierState::Waiting { generation, arrived } => {
                write!(f, "WAITING(generation={}, arrived={})", generation, arrived)
            }
            BarrierState::Broken { generation } => write!(f, "BROKEN(generation={})", generation),
        }
    }
}

/// Result of a successful arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    generation: u64,
    leader: bool,
}

impl BarrierWaitResult {
    /// Generation that tripped
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True for exactly one party per generation: the one that ran the action
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

type Action = Box<dyn FnMut(u64) + Send>;

/// Per-generation token. Waiters keep their own clone so that a later reset
/// cannot make a broken generation look like a tripped one.
#[derive(Debug)]
struct Generation {
    id: u64,
    broken: AtomicBool,
}

impl Generation {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            broken: AtomicBool::new(false),
        })
    }

    // Only read or written while the state mutex is held
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }
}

struct Inner {
    generation: Arc<Generation>,
    arrived: usize,
    action: Option<Action>,
}

/// Reusable synchronization point for a fixed number of parties
///
/// Built from a counter, a condition variable and a generation token. The
/// action runs on the tripping thread while the state lock is held, so it must
/// not call back into the same barrier.
pub struct ReusableBarrier {
    parties: usize,
    inner: Mutex<Inner>,
    cvar: Condvar,
}

impl ReusableBarrier {
    /// Create a barrier for `parties` parties with no completion action
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    /// Create a barrier that runs `action` once per tripped generation
    ///
    /// The action receives the generation number that tripped.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    pub fn with_action<F>(parties: usize, action: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<Action>) -> Self {
        assert!(parties > 0, "barrier requires at least one party");
        Self {
            parties,
            inner: Mutex::new(Inner {
                generation: Generation::new(0),
                arrived: 0,
                action,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Number of parties required to trip
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Current generation number
    pub fn generation(&self) -> u64 {
        self.lock().generation.id
    }

    /// Whether the current generation is broken
    pub fn is_broken(&self) -> bool {
        self.lock().generation.is_broken()
    }

    /// Number of parties currently blocked in `arrive`
    pub fn number_waiting(&self) -> usize {
        let inner = self.lock();
        if inner.generation.is_broken() {
            0
        } else {
            inner.arrived
        }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> BarrierState {
        let inner = self.lock();
        let generation = inner.generation.id;
        if inner.generation.is_broken() {
            BarrierState::Broken { generation }
        } else {
            BarrierState::Waiting {
                generation,
                arrived: inner.arrived,
            }
        }
    }

    /// Signal arrival and block until the generation trips or breaks
    ///
    /// The last party to arrive runs the action, advances the generation and
    /// returns a leader result without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Broken`] if the barrier is already broken or is
    /// broken while this party waits.
    pub fn arrive(&self) -> Result<BarrierWaitResult, BarrierError> {
        self.arrive_until(None)
    }

    /// Like [`arrive`](Self::arrive), but gives up after `timeout`
    ///
    /// On expiry the barrier is broken, so every other waiter is released
    /// with [`BarrierError::Broken`] and this party gets
    /// [`BarrierError::TimedOut`].
    pub fn arrive_timeout(&self, timeout: Duration) -> Result<BarrierWaitResult, BarrierError> {
        self.arrive_until(Some(Instant::now() + timeout))
    }

    /// Force the current generation into the broken state
    ///
    /// Every party waiting in `arrive` for this generation is released with
    /// [`BarrierError::Broken`] and the action is not run. Breaking an already
    /// broken barrier is a no-op.
    pub fn break_barrier(&self) {
        let mut inner = self.lock();
        self.break_locked(&mut inner);
    }

    /// Start a fresh generation
    ///
    /// A broken barrier moves to `Waiting(generation + 1, 0)`. If parties are
    /// waiting in a healthy generation they are released with
    /// [`BarrierError::Broken`] first.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if !inner.generation.is_broken() && inner.arrived > 0 {
            self.break_locked(&mut inner);
        }
        let next = inner.generation.id + 1;
        inner.generation = Generation::new(next);
        inner.arrived = 0;
        debug!(generation = next, "barrier reset");
    }

    fn arrive_until(&self, deadline: Option<Instant>) -> Result<BarrierWaitResult, BarrierError> {
        let mut inner = self.lock();
        let generation = Arc::clone(&inner.generation);

        if generation.is_broken() {
            return Err(BarrierError::Broken { generation: generation.id });
        }

        inner.arrived += 1;
        if inner.arrived == self.parties {
            return self.trip(inner, &generation);
        }

        loop {
            inner = match deadline {
                None => self.cvar.wait(inner).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        if !generation.is_broken() && inner.generation.id == generation.id {
                            warn!(generation = generation.id, "barrier wait timed out");
                            self.break_locked(&mut inner);
                            return Err(BarrierError::TimedOut { generation: generation.id });
                        }
                        inner
                    } else {
                        self.cvar
                            .wait_timeout(inner, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                }
            };

            if generation.is_broken() {
                return Err(BarrierError::Broken { generation: generation.id });
            }
            if inner.generation.id != generation.id {
                return Ok(BarrierWaitResult {
                    generation: generation.id,
                    leader: false,
                });
            }
        }
    }

    fn trip(
        &self,
        mut inner: MutexGuard<'_, Inner>,
        generation: &Generation,
    ) -> Result<BarrierWaitResult, BarrierError> {
        debug!(generation = generation.id, parties = self.parties, "barrier tripped");

        if let Some(action) = inner.action.as_mut() {
            let id = generation.id;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| action(id))) {
                warn!(generation = id, "barrier action panicked");
                self.break_locked(&mut inner);
                drop(inner);
                panic::resume_unwind(payload);
            }
        }

        inner.generation = Generation::new(generation.id + 1);
        inner.arrived = 0;
        self.cvar.notify_all();

        Ok(BarrierWaitResult {
            generation: generation.id,
            leader: true,
        })
    }

    fn break_locked(&self, inner: &mut Inner) {
        if inner.generation.is_broken() {
            return;
        }
        warn!(
            generation = inner.generation.id,
            arrived = inner.arrived,
            parties = self.parties,
            "barrier broken"
        );
        inner.generation.broken.store(true, Ordering::Relaxed);
        inner.arrived = 0;
        self.cvar.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ReusableBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusableBarrier")
            .field("parties", &self.parties)
            .field("state", &self.state())
            .finish()
    }
}
