//! Provider Admission Pools
//!
//! Per-provider concurrency gates with live load counters.
//!
//! # Design
//!
//! Each provider owns one [`ProviderGate`] for its whole lifetime. A task
//! holds one [`ProviderSlot`] for the whole provider call; dropping the slot
//! hands the permit back to the gate.
//!
//! Resizing never replaces the semaphore:
//!
//! ```text
//! raise  L -> N : repay deficit first, add_permits(rest)
//! lower  L -> N : forget_permits(L - N) from the free pool,
//!                 deficit += whatever is still held by running calls
//! release       : deficit > 0 ? forget the permit : return it
//! ```
//!
//! Free permits plus permits held by running calls therefore never exceed
//! the larger of the old and new limit, and settle at the new limit once the
//! calls admitted under the old one finish.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

// ============================================================================
// Admission Gate
// ============================================================================

/// Resizable semaphore for one provider
#[derive(Debug)]
pub(crate) struct ProviderGate {
    semaphore: Arc<Semaphore>,
    /// Permits still held by calls that must be retired instead of returned
    deficit: Mutex<usize>,
}

impl ProviderGate {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            deficit: Mutex::new(0),
        }
    }

    /// Free permits right now
    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits owed back by running calls
    pub(crate) fn deficit(&self) -> usize {
        *self.deficit.lock()
    }

    /// Wait for a permit; the future does not borrow the gate
    pub(crate) fn acquire(
        &self,
    ) -> impl Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send + 'static {
        Arc::clone(&self.semaphore).acquire_owned()
    }

    /// Move the capacity from `from` to `to` permits
    ///
    /// Callers serialize resizes of one gate (the registry does so under its
    /// write lock), and `from` must be the limit the gate currently enforces.
    pub(crate) fn resize(&self, from: usize, to: usize) {
        let mut deficit = self.deficit.lock();
        if to >= from {
            let grow = to - from;
            let repaid = grow.min(*deficit);
            *deficit -= repaid;
            self.semaphore.add_permits(grow - repaid);
        } else {
            let shrink = from - to;
            let forgotten = self.semaphore.forget_permits(shrink);
            *deficit += shrink - forgotten;
        }
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut deficit = self.deficit.lock();
        if *deficit > 0 {
            *deficit -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

// ============================================================================
// Load Counters
// ============================================================================

/// Atomic load counters for lock-free updates
#[derive(Debug, Default)]
pub struct ProviderLoad {
    in_flight: AtomicUsize,
    queued: AtomicUsize,
    peak_in_flight: AtomicUsize,
    admitted: AtomicU64,
}

impl ProviderLoad {
    /// Calls currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            admitted: self.admitted.load(Ordering::SeqCst),
        }
    }

    /// Register a waiter; the guard unregisters it on drop
    pub(crate) fn enqueue(self: &Arc<Self>) -> QueueGuard {
        self.queued.fetch_add(1, Ordering::SeqCst);
        QueueGuard {
            load: Arc::clone(self),
        }
    }

    /// Turn a permit granted by `gate` into a slot
    pub(crate) fn occupy(
        self: &Arc<Self>,
        gate: &Arc<ProviderGate>,
        permit: OwnedSemaphorePermit,
    ) -> ProviderSlot {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.admitted.fetch_add(1, Ordering::SeqCst);
        ProviderSlot {
            permit: Some(permit),
            gate: Arc::clone(gate),
            load: Arc::clone(self),
        }
    }
}

/// Snapshot of a provider's load
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// Calls currently holding a slot
    pub in_flight: usize,
    /// Tasks waiting for a slot
    pub queued: usize,
    /// Highest `in_flight` observed
    pub peak_in_flight: usize,
    /// Total slots granted
    pub admitted: u64,
}

// ============================================================================
// RAII Guards
// ============================================================================

/// A waiting task (RAII guard)
pub(crate) struct QueueGuard {
    load: Arc<ProviderLoad>,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.load.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An admitted call (RAII guard)
///
/// Holds the semaphore permit; dropping it hands the permit back to the gate.
pub struct ProviderSlot {
    permit: Option<OwnedSemaphorePermit>,
    gate: Arc<ProviderGate>,
    load: Arc<ProviderLoad>,
}

impl std::fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSlot").finish_non_exhaustive()
    }
}

impl Drop for ProviderSlot {
    fn drop(&mut self) {
        self.load.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            self.gate.release(permit);
        }
    }
}
