use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::backend::{ListedObject, ObjectBackend, Tagging};
use crate::catalog::{CatalogStore, NewEntry, WriteOutcome};
use crate::error::ScanError;
use crate::scan::reconcile::{decide, Decision};

/// Parked writes are replayed every this many listed objects.
const BACKLOG_DRAIN_INTERVAL: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// MOVE: every listed object becomes a PENDING row.
    Initial,
    /// RERUN: diff against the catalog, then prune what disappeared.
    Reconcile,
}

/// Counts of a single enumeration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub discovered: u64,
    pub inserted: u64,
    pub reset: u64,
    pub skipped: u64,
    /// Writes rejected by a row guard (seen twice in one listing).
    pub unchanged: u64,
    /// Writes parked in the backlog at the time they were made.
    pub deferred: u64,
    pub pruned: u64,
    /// Listing entries that could not be read at all.
    pub errors: u64,
}

/// Builds the catalog row for a listed object.
pub fn to_entry(object: ListedObject, tag_set: Option<String>) -> NewEntry {
    NewEntry {
        path: object.path,
        size: object.size,
        is_file: object.is_file,
        mtime: object.mtime,
        version_id: object.version_id,
        etag: object.etag,
        multipart_info: None,
        tag_set,
        is_delete: object.is_delete,
        is_latest: object.is_latest,
    }
}

fn capture_tags(tagging: &dyn Tagging, object: &ListedObject) -> Option<String> {
    if object.is_delete || !object.is_file {
        return None;
    }
    match tagging.get_tags(&object.path, object.version_id.as_deref()) {
        Ok(tags) if tags.is_empty() => None,
        Ok(tags) => serde_json::to_string(&tags).ok(),
        Err(e) => {
            debug!("No tags for {}: {}", object.path, e);
            None
        }
    }
}

/// Walks a source and records it in a job's catalog.
pub struct Enumerator<'a> {
    source: &'a dyn ObjectBackend,
    store: &'a CatalogStore,
    pass_no: i64,
    shutdown: Option<&'a AtomicBool>,
}

impl<'a> Enumerator<'a> {
    pub fn new(source: &'a dyn ObjectBackend, store: &'a CatalogStore, pass_no: i64) -> Self {
        Self {
            source,
            store,
            pass_no,
            shutdown: None,
        }
    }

    /// Aborts the walk with [`ScanError::Interrupted`] once `flag` is set.
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.shutdown
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub fn run(&self, mode: ScanMode) -> Result<ScanReport, ScanError> {
        let _span = info_span!(
            "scan",
            job_id = self.store.job_id(),
            pass = self.pass_no,
            mode = ?mode
        )
        .entered();

        let mut report = ScanReport::default();

        if mode == ScanMode::Reconcile {
            let cleared = self.store.clear_skip_checks()?;
            debug!("Cleared {} skip markers", cleared);
        }

        let listing = self.source.list().map_err(|e| ScanError::Listing {
            point: self.source.display_point(),
            source: e,
        })?;
        let tagging = self.source.tagging();

        for item in listing {
            if self.interrupted() {
                info!("Scan interrupted after {} objects", report.discovered);
                return Err(ScanError::Interrupted);
            }

            let object = match item {
                Ok(object) => object,
                Err(e) => {
                    warn!("Listing error: {}", e);
                    report.errors += 1;
                    continue;
                }
            };

            let tag_set = tagging.and_then(|t| capture_tags(t, &object));
            let entry = to_entry(object, tag_set);
            report.discovered += 1;

            match mode {
                ScanMode::Initial => {
                    let outcome = self.store.insert(&entry, self.pass_no);
                    tally(&mut report, outcome, Decision::Insert);
                }
                ScanMode::Reconcile => self.reconcile(&entry, &mut report)?,
            }

            if report.discovered % BACKLOG_DRAIN_INTERVAL == 0 {
                self.store.drain_backlog();
            }
        }

        self.store.drain_backlog();

        if mode == ScanMode::Reconcile {
            if report.errors > 0 {
                // Rows behind an unreadable entry were not refreshed, yet still exist.
                warn!(
                    "Skipping prune: {} listing entries could not be read",
                    report.errors
                );
            } else if self.store.backlog_len() > 0 {
                // Parked writes may still refresh rows of this pass.
                warn!(
                    "Skipping prune: {} catalog writes still parked",
                    self.store.backlog_len()
                );
            } else {
                report.pruned = self.store.prune_stale(self.pass_no)? as u64;
            }
        }

        info!(
            discovered = report.discovered,
            inserted = report.inserted,
            reset = report.reset,
            skipped = report.skipped,
            pruned = report.pruned,
            errors = report.errors,
            "Scan of {} finished",
            self.source.display_point()
        );
        Ok(report)
    }

    fn reconcile(&self, entry: &NewEntry, report: &mut ScanReport) -> Result<(), ScanError> {
        let stored = self
            .store
            .lookup(&entry.path, entry.version_id.as_deref())?;
        let decision = decide(stored.as_ref(), entry);
        let outcome = match (&stored, decision) {
            (Some(status), Decision::Skip) => self.store.mark_skipped(status, entry, self.pass_no),
            (Some(status), Decision::Reset) => {
                self.store.reset_pending(status, entry, self.pass_no)
            }
            _ => self.store.insert(entry, self.pass_no),
        };
        tally(report, outcome, decision);
        Ok(())
    }
}

fn tally(report: &mut ScanReport, outcome: WriteOutcome, decision: Decision) {
    match outcome {
        WriteOutcome::Applied => match decision {
            Decision::Insert => report.inserted += 1,
            Decision::Skip => report.skipped += 1,
            Decision::Reset => report.reset += 1,
        },
        WriteOutcome::Unchanged => report.unchanged += 1,
        WriteOutcome::Deferred => report.deferred += 1,
    }
}
