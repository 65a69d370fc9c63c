//! Typed, retrying access to one job's catalog.
//!
//! [`CatalogStore`] wraps the SQL repository functions for a single job.
//! Lock contention and I/O failures are retried under the configured
//! [`RetryPolicy`]; a row write that still fails is parked in the store's [`WriteBacklog`] and replayed later
//! by [`CatalogStore::drain_backlog`]. Writes are never dropped.

pub mod entry;

use std::collections::VecDeque;
use std::sync::Mutex;

use log::{debug, warn};

use crate::config::RetryPolicy;
use crate::db::{catalog_repo, job_repo, Database, DatabaseError};

pub use crate::db::job_repo::{Counter, JobRow, Tally};
pub use entry::{
    CatalogEntry, EntryFilter, EntryStatus, NewEntry, ObjectState, DIRECTORY_MTIME,
};

/// A row write that can be replayed from the backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogWrite {
    Insert {
        entry: NewEntry,
        pass_no: i64,
    },
    Done {
        sequence: i64,
        size: u64,
        is_delete: bool,
    },
    Failed {
        sequence: i64,
        size: u64,
        code: String,
        desc: String,
    },
    Skipped {
        sequence: i64,
        size: u64,
        is_latest: bool,
        pass_no: i64,
    },
    Reset {
        sequence: i64,
        entry: NewEntry,
        pass_no: i64,
    },
}

impl CatalogWrite {
    fn apply(&self, db: &Database, job_id: i64) -> Result<bool, DatabaseError> {
        match self {
            CatalogWrite::Insert { entry, pass_no } => {
                catalog_repo::insert_entry(db, job_id, entry, *pass_no)
            }
            CatalogWrite::Done {
                sequence,
                size,
                is_delete,
            } => catalog_repo::mark_done(db, job_id, *sequence, *size, *is_delete),
            CatalogWrite::Failed {
                sequence,
                size,
                code,
                desc,
            } => catalog_repo::mark_failed(db, job_id, *sequence, *size, code, desc),
            CatalogWrite::Skipped {
                sequence,
                size,
                is_latest,
                pass_no,
            } => {
                catalog_repo::mark_skipped(db, job_id, *sequence, *size, *is_latest, *pass_no)
            }
            CatalogWrite::Reset {
                sequence,
                entry,
                pass_no,
            } => catalog_repo::reset_pending(db, job_id, *sequence, entry, *pass_no),
        }
    }
}

/// Result of a row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row changed and counters were updated.
    Applied,
    /// The row's guard rejected the write (already applied or absent).
    Unchanged,
    /// The write failed repeatedly and was parked in the backlog.
    Deferred,
}

/// Writes waiting to be replayed, in arrival order.
#[derive(Debug, Default)]
pub struct WriteBacklog {
    pending: Mutex<VecDeque<CatalogWrite>>,
}

impl WriteBacklog {
    fn push(&self, write: CatalogWrite) {
        match self.pending.lock() {
            Ok(mut pending) => pending.push_back(write),
            Err(poisoned) => poisoned.into_inner().push_back(write),
        }
    }

    fn pop(&self) -> Option<CatalogWrite> {
        match self.pending.lock() {
            Ok(mut pending) => pending.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    fn push_front(&self, write: CatalogWrite) {
        match self.pending.lock() {
            Ok(mut pending) => pending.push_front(write),
            Err(poisoned) => poisoned.into_inner().push_front(write),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CatalogStore {
    db: Database,
    job_id: i64,
    retry: RetryPolicy,
    backlog: WriteBacklog,
}

impl CatalogStore {
    pub fn new(db: Database, job_id: i64, retry: RetryPolicy) -> Self {
        Self {
            db,
            job_id,
            retry,
            backlog: WriteBacklog::default(),
        }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_transient() => {
                    debug!(
                        "Catalog {} for job {} failed (attempt {}/{}): {}",
                        what, self.job_id, attempt, attempts, e
                    );
                    std::thread::sleep(self.retry.backoff());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write(&self, write: CatalogWrite) -> WriteOutcome {
        match self.with_retry("write", || write.apply(&self.db, self.job_id)) {
            Ok(true) => WriteOutcome::Applied,
            Ok(false) => WriteOutcome::Unchanged,
            Err(e) => {
                warn!(
                    "Catalog write for job {} deferred to backlog: {}",
                    self.job_id, e
                );
                self.backlog.push(write);
                WriteOutcome::Deferred
            }
        }
    }

    pub fn create_table(&self) -> Result<(), DatabaseError> {
        self.with_retry("create", || catalog_repo::create_table(&self.db, self.job_id))
    }

    pub fn drop_table(&self) -> Result<(), DatabaseError> {
        self.with_retry("drop", || catalog_repo::drop_table(&self.db, self.job_id))
    }

    pub fn insert(&self, entry: &NewEntry, pass_no: i64) -> WriteOutcome {
        self.write(CatalogWrite::Insert {
            entry: entry.clone(),
            pass_no,
        })
    }

    pub fn lookup(
        &self,
        path: &str,
        version_id: Option<&str>,
    ) -> Result<Option<EntryStatus>, DatabaseError> {
        self.with_retry("lookup", || {
            catalog_repo::lookup(&self.db, self.job_id, path, version_id)
        })
    }

    /// Takes a PENDING row for transfer. `false` means another worker (or an
    /// earlier attempt) already holds it.
    pub fn claim(&self, sequence: i64) -> Result<bool, DatabaseError> {
        self.with_retry("claim", || {
            catalog_repo::mark_claimed(&self.db, self.job_id, sequence)
        })
    }

    pub fn mark_done(&self, entry: &CatalogEntry) -> WriteOutcome {
        self.write(CatalogWrite::Done {
            sequence: entry.sequence,
            size: entry.size,
            is_delete: entry.is_delete,
        })
    }

    pub fn mark_failed(&self, entry: &CatalogEntry, code: &str, desc: &str) -> WriteOutcome {
        self.write(CatalogWrite::Failed {
            sequence: entry.sequence,
            size: entry.size,
            code: code.to_string(),
            desc: desc.to_string(),
        })
    }

    pub fn mark_skipped(
        &self,
        status: &EntryStatus,
        observed: &NewEntry,
        pass_no: i64,
    ) -> WriteOutcome {
        self.write(CatalogWrite::Skipped {
            sequence: status.sequence,
            size: status.size,
            is_latest: observed.is_latest,
            pass_no,
        })
    }

    pub fn reset_pending(
        &self,
        status: &EntryStatus,
        observed: &NewEntry,
        pass_no: i64,
    ) -> WriteOutcome {
        self.write(CatalogWrite::Reset {
            sequence: status.sequence,
            entry: observed.clone(),
            pass_no,
        })
    }

    pub fn page(
        &self,
        after_sequence: i64,
        limit: usize,
        filter: EntryFilter,
    ) -> Result<Vec<CatalogEntry>, DatabaseError> {
        self.with_retry("page", || {
            catalog_repo::page(&self.db, self.job_id, after_sequence, limit, filter)
        })
    }

    pub fn pending_for_path(
        &self,
        path: &str,
        after_sequence: i64,
        up_to: i64,
    ) -> Result<Vec<CatalogEntry>, DatabaseError> {
        self.with_retry("pending_for_path", || {
            catalog_repo::pending_for_path(&self.db, self.job_id, path, after_sequence, up_to)
        })
    }

    pub fn max_sequence(&self) -> Result<i64, DatabaseError> {
        self.with_retry("max_sequence", || {
            catalog_repo::max_sequence(&self.db, self.job_id)
        })
    }

    pub fn clear_skip_checks(&self) -> Result<usize, DatabaseError> {
        self.with_retry("clear_skip_checks", || {
            catalog_repo::clear_skip_checks(&self.db, self.job_id)
        })
    }

    pub fn prune_stale(&self, pass_no: i64) -> Result<usize, DatabaseError> {
        self.with_retry("prune", || {
            catalog_repo::prune_stale(&self.db, self.job_id, pass_no)
        })
    }

    pub fn count_by_state(&self) -> Result<Vec<(ObjectState, u64)>, DatabaseError> {
        self.with_retry("count", || {
            catalog_repo::count_by_state(&self.db, self.job_id)
        })
    }

    pub fn job(&self) -> Result<Option<JobRow>, DatabaseError> {
        job_repo::find_by_id(&self.db, self.job_id)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Replays parked writes in order, one attempt each. Stops at the first
    /// write that still fails and leaves it at the head of the backlog.
    ///
    /// Returns how many writes were replayed.
    pub fn drain_backlog(&self) -> usize {
        let mut replayed = 0;
        while let Some(write) = self.backlog.pop() {
            match write.apply(&self.db, self.job_id) {
                Ok(_) => replayed += 1,
                Err(e) => {
                    debug!("Backlog replay for job {} stalled: {}", self.job_id, e);
                    self.backlog.push_front(write);
                    break;
                }
            }
        }
        if replayed > 0 {
            debug!(
                "Replayed {} backlogged writes for job {} ({} left)",
                replayed,
                self.job_id,
                self.backlog.len()
            );
        }
        replayed
    }
}
