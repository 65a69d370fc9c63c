use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::catalog::{CatalogStore, EntryFilter};
use crate::error::{JobError, WorkerError};
use crate::worker::pool::WorkerPool;
use crate::worker::task::TransferGroup;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub groups: u64,
    pub rows: u64,
    pub pages: u64,
    /// Dispatching stopped early on shutdown.
    pub interrupted: bool,
}

/// Pages PENDING rows out of the catalog and feeds them to the pool as
/// per-path groups.
///
/// Rows are read in sequence order up to the highest sequence present when
/// dispatching starts. Consecutive rows sharing a path form one group; a
/// group cut by a page boundary is carried into the next page.
///
/// A path's rows are not always adjacent: a rerun resets old versions in
/// place and appends new ones at the end. Before a group is submitted it is
/// completed with every later PENDING row of its path, and those rows are
/// skipped when paging reaches them, so one worker sees all of a path.
pub struct Dispatcher {
    store: Arc<CatalogStore>,
    batch_size: usize,
    shutdown: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(store: Arc<CatalogStore>, batch_size: usize, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            shutdown,
        }
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Dispatches every pending row, then closes the pool and joins it.
    pub fn run(&self, pool: WorkerPool) -> Result<DispatchReport, JobError> {
        let _span = info_span!("dispatch", job_id = self.store.job_id()).entered();

        let dispatched = self.dispatch(&pool);
        // Join even when dispatching failed so no worker outlives the pass.
        let joined = pool.wait();
        let report = dispatched?;
        joined?;

        self.store.drain_backlog();
        info!(
            groups = report.groups,
            rows = report.rows,
            interrupted = report.interrupted,
            "Dispatch finished"
        );
        Ok(report)
    }

    fn dispatch(&self, pool: &WorkerPool) -> Result<DispatchReport, JobError> {
        let mut report = DispatchReport::default();
        let watermark = self.store.max_sequence()?;
        let mut cursor = 0;
        let mut carry: Option<TransferGroup> = None;
        // Paths whose rows up to the given sequence already went out with a group.
        let mut ahead: HashMap<String, i64> = HashMap::new();

        'pages: loop {
            if self.interrupted() {
                report.interrupted = true;
                break;
            }

            let page = self
                .store
                .page(cursor, self.batch_size, EntryFilter::pending())?;
            if page.is_empty() {
                break;
            }
            report.pages += 1;
            debug!("Page {} after sequence {}: {} rows", report.pages, cursor, page.len());

            for entry in page {
                if entry.sequence > watermark {
                    break 'pages;
                }
                cursor = entry.sequence;
                if ahead
                    .get(&entry.path)
                    .is_some_and(|&last| entry.sequence <= last)
                {
                    continue;
                }

                match carry.as_mut() {
                    Some(group) if group.accepts(&entry) => group.push(entry),
                    _ => {
                        if let Some(group) = carry.replace(TransferGroup::new(entry)) {
                            if !self.submit(pool, group, watermark, &mut ahead, &mut report)? {
                                return Ok(report);
                            }
                        }
                    }
                }
            }

            self.store.drain_backlog();
            ahead.retain(|_, last| *last > cursor);
        }

        if let Some(group) = carry.take() {
            if !report.interrupted {
                self.submit(pool, group, watermark, &mut ahead, &mut report)?;
            }
        }
        Ok(report)
    }

    /// Completes `group` with the later PENDING rows of its path and hands it
    /// to the pool. Returns `false` once shutdown was requested.
    fn submit(
        &self,
        pool: &WorkerPool,
        mut group: TransferGroup,
        watermark: i64,
        ahead: &mut HashMap<String, i64>,
        report: &mut DispatchReport,
    ) -> Result<bool, JobError> {
        if self.interrupted() {
            report.interrupted = true;
            return Ok(false);
        }

        let later = self
            .store
            .pending_for_path(&group.path, group.last_sequence(), watermark)?;
        if let Some(last) = later.last() {
            debug!("{} later rows of {} joined its group", later.len(), group.path);
            ahead.insert(group.path.clone(), last.sequence);
        }
        for entry in later {
            group.push(entry);
        }
        let rows = group.len() as u64;

        match pool.submit(group) {
            Ok(()) => {
                report.groups += 1;
                report.rows += rows;
                Ok(true)
            }
            Err(WorkerError::ChannelClosed) if self.interrupted() => {
                report.interrupted = true;
                Ok(false)
            }
            Err(e) => {
                warn!("Submitting transfer group failed: {}", e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryObjectStore, ObjectBackend};
    use crate::catalog::ObjectState;
    use crate::config::{MoveOptions, RetryPolicy};
    use crate::db::{job_repo, Database};
    use crate::worker::mover::Mover;
    use crate::worker::summary::MoveSummary;

    struct Fixture {
        source: Arc<MemoryObjectStore>,
        target: Arc<MemoryObjectStore>,
        store: Arc<CatalogStore>,
        shutdown: Arc<AtomicBool>,
    }

    impl Fixture {
        fn new(source: MemoryObjectStore, target: MemoryObjectStore) -> Self {
            let db = Database::open_in_memory().unwrap();
            let job_id = job_repo::insert(&db, "objectstore", "src", "dst", 1).unwrap();
            let store = Arc::new(CatalogStore::new(db, job_id, RetryPolicy::default()));
            store.create_table().unwrap();
            Self {
                source: Arc::new(source),
                target: Arc::new(target),
                store,
                shutdown: Arc::new(AtomicBool::new(false)),
            }
        }

        fn catalog_source(&self) {
            for object in self.source.list().unwrap() {
                let entry = crate::scan::to_entry(object.unwrap(), None);
                self.store.insert(&entry, 1);
            }
        }

        fn run(&self, threads: usize, batch_size: usize) -> DispatchReport {
            let mover = Arc::new(Mover::new(
                self.source.clone(),
                self.target.clone(),
                self.store.clone(),
                MoveOptions::default(),
                Arc::new(MoveSummary::new()),
                self.shutdown.clone(),
            ));
            let pool = WorkerPool::new(mover, threads, self.shutdown.clone()).unwrap();
            Dispatcher::new(self.store.clone(), batch_size, self.shutdown.clone())
                .run(pool)
                .unwrap()
        }
    }

    #[test]
    fn test_groups_span_page_boundaries() {
        let f = Fixture::new(
            MemoryObjectStore::versioned("src"),
            MemoryObjectStore::new("dst"),
        );
        for body in [b"1", b"2", b"3"] {
            f.source.put_bytes("multi", body).unwrap();
        }
        f.source.put_bytes("single", b"s").unwrap();
        f.catalog_source();

        // Batch of 2 cuts the three versions of "multi" across pages.
        let report = f.run(2, 2);
        assert_eq!(report.rows, 4);
        assert_eq!(report.groups, 2);
        assert!(!report.interrupted);
    }

    #[test]
    fn test_versions_are_written_oldest_first() {
        let f = Fixture::new(
            MemoryObjectStore::versioned("src"),
            MemoryObjectStore::versioned("dst"),
        );
        for body in [&b"v1"[..], b"v2", b"v3"] {
            f.source.put_bytes("k", body).unwrap();
        }
        f.catalog_source();
        f.run(4, 100);

        let written: Vec<Vec<u8>> = f
            .target
            .versions("k")
            .iter()
            .rev()
            .map(|v| f.target.read_bytes("k", v.version_id.as_deref()).unwrap())
            .collect();
        assert_eq!(written, vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]);
    }

    #[test]
    fn test_scattered_rows_of_a_path_share_one_group() {
        let f = Fixture::new(
            MemoryObjectStore::versioned("src"),
            MemoryObjectStore::versioned("dst"),
        );
        f.source.put_bytes("k", b"v1").unwrap();
        f.source.put_bytes("m", b"m").unwrap();
        f.source.put_bytes("k", b"v2").unwrap();
        f.catalog_source();
        // A later pass appends a newer version of "k" behind "m".
        f.source.put_bytes("k", b"v3").unwrap();
        let newest = f.source.list().unwrap().next().unwrap().unwrap();
        f.store.insert(&crate::scan::to_entry(newest, None), 1);

        // One row per page; the newest "k" row sits behind "m".
        let report = f.run(4, 1);
        assert_eq!(report.groups, 2);
        assert_eq!(report.rows, 4);
        assert_eq!(f.target.read_bytes("k", None).unwrap(), b"v3");
        assert_eq!(f.store.count_by_state().unwrap(), vec![(ObjectState::Done, 4)]);
    }

    #[test]
    fn test_only_pending_rows_are_dispatched() {
        let f = Fixture::new(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("a", b"a").unwrap();
        f.source.put_bytes("b", b"b").unwrap();
        f.catalog_source();
        let first = f.store.page(0, 1, EntryFilter::default()).unwrap().remove(0);
        f.store.claim(first.sequence).unwrap();
        f.store.mark_done(&first);

        let report = f.run(1, 10);
        assert_eq!(report.rows, 1);
        assert_eq!(f.target.keys(), vec!["b".to_string()]);
        assert_eq!(f.store.count_by_state().unwrap(), vec![(ObjectState::Done, 2)]);
    }

    #[test]
    fn test_shutdown_dispatches_nothing() {
        let f = Fixture::new(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("a", b"a").unwrap();
        f.catalog_source();
        f.shutdown.store(true, Ordering::Relaxed);

        let report = f.run(2, 10);
        assert!(report.interrupted);
        assert_eq!(report.groups, 0);
        assert_eq!(
            f.store.count_by_state().unwrap(),
            vec![(ObjectState::Pending, 1)]
        );
    }
}
