//! Non-reentrant gate that lets one sync job through at a time.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Mutual-exclusion gate for sync jobs.
///
/// Triggers take a permit with [`SyncGate::try_acquire`] and hand it to the
/// worker together with the job; the gate stays closed until the job has
/// finished and the permit is dropped. A trigger that finds the gate closed
/// is dropped, so at most one job is ever pending.
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    lock: Arc<Mutex<()>>,
}

/// Proof of holding the gate; releases it on drop.
#[derive(Debug)]
pub struct GatePermit {
    _guard: OwnedMutexGuard<()>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the gate if it is open. Never waits.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        Arc::clone(&self.lock)
            .try_lock_owned()
            .ok()
            .map(|guard| GatePermit { _guard: guard })
    }

    /// Returns true while a job holds the gate.
    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
