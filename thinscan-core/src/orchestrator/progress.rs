//! Lock-free progress tracking for a scan run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::observability::metrics;

/// Point-in-time view of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Workers currently holding a slot.
    pub active: usize,
    /// Workers that reached a terminal state.
    pub completed: usize,
    pub total: usize,
    /// Concurrency limit of the run.
    pub limit: usize,
    /// Highest `active` value seen during the run.
    pub peak_active: usize,
}

impl ProgressSnapshot {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total).min(100) as u32
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total && self.active == 0
    }
}

/// Shared counters updated by workers and read by anyone.
///
/// Reads never block workers: counters are atomics and the latest
/// snapshot is also published on a `watch` channel.
#[derive(Debug)]
pub struct ScanProgress {
    active: AtomicUsize,
    completed: AtomicUsize,
    total: AtomicUsize,
    limit: AtomicUsize,
    peak: AtomicUsize,
    tx: watch::Sender<ProgressSnapshot>,
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanProgress {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            limit: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            tx,
        }
    }

    /// Reset for a new run.
    pub(crate) fn begin(&self, total: usize, limit: usize) {
        self.active.store(0, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.peak.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.limit.store(limit, Ordering::SeqCst);
        self.publish();
    }

    /// Mark a worker as in flight until the returned guard drops.
    pub(crate) fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        metrics::set_active_workers(now);
        self.publish();
        ActiveGuard { progress: Arc::clone(self) }
    }

    fn leave(&self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        self.completed.fetch_add(1, Ordering::SeqCst);
        metrics::set_active_workers(now);
        self.publish();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            active: self.active.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            limit: self.limit.load(Ordering::SeqCst),
            peak_active: self.peak.load(Ordering::SeqCst),
        }
    }

    /// Receive a fresh snapshot on every change.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }
}

/// Keeps a worker counted as active; dropping it records completion, so
/// a worker that panics still reaches a terminal state.
#[derive(Debug)]
pub struct ActiveGuard {
    progress: Arc<ScanProgress>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.progress.leave();
    }
}
