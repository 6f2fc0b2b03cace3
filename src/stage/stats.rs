use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a stage's operational counters.
///
/// Produced by [`Stage::stats`](crate::stage::Stage::stats); never blocks and
/// may be taken concurrently with any other operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// Worker tasks currently inside their receive loop.
    pub workers_running: u64,
    /// Configured pool size plus the shutdown coordinator slot.
    pub total_workers: u64,
    /// Submissions accepted but not yet handed off to a worker.
    pub pending: u64,
    /// Units of work completed, successes and failures alike.
    pub completed: u64,
    /// Whether shutdown has begun.
    pub closed: bool,
}

/// Atomic counters backing [`StageStats`] snapshots.
///
/// Counters sit outside the subscriber lock so the hot path never contends
/// on it.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) workers_up: AtomicU64,
    pub(crate) pending: AtomicU64,
    pub(crate) processed: AtomicU64,
    pub(crate) closed: AtomicBool,
}

impl Counters {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Set the closed flag, returning whether it was already set.
    pub(crate) fn close(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn snapshot(&self, total_workers: u64) -> StageStats {
        StageStats {
            workers_running: self.workers_up.load(Ordering::Acquire),
            total_workers,
            pending: self.pending.load(Ordering::Acquire),
            completed: self.processed.load(Ordering::Acquire),
            closed: self.is_closed(),
        }
    }
}
