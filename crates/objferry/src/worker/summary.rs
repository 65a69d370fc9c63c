use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live tally of one mover pass, shared by all workers.
#[derive(Debug, Default)]
pub struct MoveSummary {
    moved: AtomicU64,
    moved_bytes: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    failed_bytes: AtomicU64,
    unclaimed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummarySnapshot {
    pub moved: u64,
    pub moved_bytes: u64,
    pub deleted: u64,
    pub failed: u64,
    pub failed_bytes: u64,
    /// Rows another worker or an earlier run already held.
    pub unclaimed: u64,
}

impl MoveSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_moved(&self, size: u64, is_delete: bool) {
        self.moved.fetch_add(1, Ordering::Relaxed);
        self.moved_bytes.fetch_add(size, Ordering::Relaxed);
        if is_delete {
            self.deleted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failed(&self, size: u64) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failed_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_unclaimed(&self) {
        self.unclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        SummarySnapshot {
            moved: self.moved.load(Ordering::Relaxed),
            moved_bytes: self.moved_bytes.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failed_bytes: self.failed_bytes.load(Ordering::Relaxed),
            unclaimed: self.unclaimed.load(Ordering::Relaxed),
        }
    }
}
