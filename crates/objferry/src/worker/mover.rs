use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::backend::{
    BackendError, ObjectBackend, ObjectData, ObjectMetadata, TagSet, DEFAULT_ACL, META_MODE,
    META_MTIME, META_XATTR_PREFIX,
};
use crate::catalog::{CatalogEntry, CatalogStore};
use crate::config::{MetadataOptions, MoveOptions};
use crate::worker::keys::KeyMapper;
use crate::worker::summary::MoveSummary;
use crate::worker::task::TransferGroup;

/// What happened to one catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Moved,
    Failed,
    /// The row was not PENDING any more, or the claim could not be written.
    NotClaimed,
    /// Shutdown was requested before the row was touched.
    Interrupted,
}

/// Drops metadata the pass was not asked to carry.
pub fn filter_metadata(metadata: ObjectMetadata, options: &MetadataOptions) -> ObjectMetadata {
    let entries = metadata
        .entries
        .into_iter()
        .filter(|(key, _)| {
            if key == META_MODE {
                options.permissions
            } else if key == META_MTIME {
                options.timestamps
            } else if key.starts_with(META_XATTR_PREFIX) {
                options.xattr
            } else {
                true
            }
        })
        .collect();
    ObjectMetadata { entries }
}

/// Copies catalog rows from the source to the target and records the result.
pub struct Mover {
    source: Arc<dyn ObjectBackend>,
    target: Arc<dyn ObjectBackend>,
    store: Arc<CatalogStore>,
    keys: KeyMapper,
    options: MoveOptions,
    summary: Arc<MoveSummary>,
    shutdown: Arc<AtomicBool>,
}

impl Mover {
    pub fn new(
        source: Arc<dyn ObjectBackend>,
        target: Arc<dyn ObjectBackend>,
        store: Arc<CatalogStore>,
        options: MoveOptions,
        summary: Arc<MoveSummary>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let keys = KeyMapper::new(source.prefix(), target.prefix());
        Self {
            source,
            target,
            store,
            keys,
            options,
            summary,
            shutdown,
        }
    }

    pub fn summary(&self) -> &MoveSummary {
        &self.summary
    }

    /// Transfers one path group, oldest version first.
    pub fn transfer_group(&self, group: TransferGroup) -> Vec<EntryOutcome> {
        let _span = info_span!("transfer_group", path = %group.path, versions = group.len()).entered();

        group
            .into_ordered()
            .iter()
            .map(|entry| self.transfer_entry(entry))
            .collect()
    }

    pub fn transfer_entry(&self, entry: &CatalogEntry) -> EntryOutcome {
        if self.shutdown.load(Ordering::Relaxed) {
            return EntryOutcome::Interrupted;
        }

        match self.store.claim(entry.sequence) {
            Ok(true) => {}
            Ok(false) => {
                debug!("Row {} already claimed", entry.sequence);
                self.summary.record_unclaimed();
                return EntryOutcome::NotClaimed;
            }
            Err(e) => {
                warn!("Could not claim row {} ({}): {}", entry.sequence, entry.path, e);
                self.summary.record_unclaimed();
                return EntryOutcome::NotClaimed;
            }
        }

        match self.with_retry(entry) {
            Ok(()) => {
                self.store.mark_done(entry);
                self.summary.record_moved(entry.size, entry.is_delete);
                EntryOutcome::Moved
            }
            Err(e) => {
                warn!("Transfer of {} failed: {}", entry.path, e);
                self.store.mark_failed(entry, e.code(), &e.to_string());
                self.summary.record_failed(entry.size);
                EntryOutcome::Failed
            }
        }
    }

    fn with_retry(&self, entry: &CatalogEntry) -> Result<(), BackendError> {
        let attempts = self.options.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.perform(entry) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts && e.is_transient() => {
                    debug!(
                        "Transfer of {} failed (attempt {}/{}): {}",
                        entry.path, attempt, attempts, e
                    );
                    std::thread::sleep(self.options.retry.backoff());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn perform(&self, entry: &CatalogEntry) -> Result<(), BackendError> {
        let key = self.keys.target_key(&entry.path);

        if entry.is_delete {
            // No version id: a versioned target records its own marker.
            return self.target.delete(&key, None);
        }

        if entry.is_directory() {
            if key.is_empty() {
                return Ok(());
            }
            let marker = if key.ends_with('/') {
                key
            } else {
                format!("{}/", key)
            };
            self.target.put(&marker, ObjectData::empty())?;
            return Ok(());
        }

        let mut data = self.source.get(&entry.path, entry.version_id.as_deref())?;
        data.metadata = filter_metadata(data.metadata, &self.options.metadata);
        let etag = self.target.put(&key, data)?;
        debug!("Put {} (etag {:?})", key, etag);

        if let (Some(tag_json), Some(tagging)) = (entry.tag_set.as_deref(), self.target.tagging()) {
            let tags: TagSet = serde_json::from_str(tag_json).map_err(|e| BackendError::Remote {
                code: "InvalidTagSet".into(),
                message: e.to_string(),
            })?;
            tagging.put_tags(&key, &tags)?;
        }

        if let (Some(source_acl), Some(target_acl)) = (self.source.acl(), self.target.acl()) {
            let acl = source_acl.get_acl(&entry.path, entry.version_id.as_deref())?;
            if acl != DEFAULT_ACL {
                target_acl.put_acl(&key, &acl)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryObjectStore;
    use crate::catalog::{EntryFilter, NewEntry, ObjectState};
    use crate::config::RetryPolicy;
    use crate::db::{job_repo, Database};

    struct Fixture {
        source: Arc<MemoryObjectStore>,
        target: Arc<MemoryObjectStore>,
        store: Arc<CatalogStore>,
        mover: Mover,
    }

    fn fixture(source: MemoryObjectStore, target: MemoryObjectStore) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let job_id = job_repo::insert(&db, "objectstore", "src", "dst", 1).unwrap();
        let store = Arc::new(CatalogStore::new(db, job_id, RetryPolicy::default()));
        store.create_table().unwrap();

        let source = Arc::new(source);
        let target = Arc::new(target);
        let options = MoveOptions {
            retry: RetryPolicy {
                attempts: 3,
                backoff_ms: 1,
            },
            ..MoveOptions::default()
        };
        let mover = Mover::new(
            source.clone(),
            target.clone(),
            store.clone(),
            options,
            Arc::new(MoveSummary::new()),
            Arc::new(AtomicBool::new(false)),
        );
        Fixture {
            source,
            target,
            store,
            mover,
        }
    }

    fn only_row(store: &CatalogStore) -> CatalogEntry {
        store.page(0, 10, EntryFilter::default()).unwrap().remove(0)
    }

    #[test]
    fn test_filter_metadata() {
        let mut meta = ObjectMetadata::default();
        meta.insert(META_MODE, "644");
        meta.insert(META_MTIME, "t");
        meta.insert("xattr-user.a", "YQ==");
        meta.insert("content-type", "text/plain");

        let only_time = MetadataOptions {
            timestamps: true,
            ..Default::default()
        };
        let kept = filter_metadata(meta, &only_time);
        assert_eq!(kept.get(META_MTIME), Some("t"));
        assert_eq!(kept.get(META_MODE), None);
        assert_eq!(kept.xattrs().count(), 0);
        assert_eq!(kept.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_transfer_copies_body_and_marks_done() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("a.txt", b"hello").unwrap();
        f.store.insert(&NewEntry::file("a.txt", 5, "t"), 1);

        let row = only_row(&f.store);
        assert_eq!(f.mover.transfer_entry(&row), EntryOutcome::Moved);
        assert_eq!(f.target.read_bytes("a.txt", None).unwrap(), b"hello");
        assert_eq!(only_row(&f.store).object_state, ObjectState::Done);
        assert_eq!(f.mover.summary().snapshot().moved_bytes, 5);
    }

    #[test]
    fn test_second_transfer_is_not_claimed() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("a", b"x").unwrap();
        f.store.insert(&NewEntry::file("a", 1, "t"), 1);

        let row = only_row(&f.store);
        f.mover.transfer_entry(&row);
        assert_eq!(f.mover.transfer_entry(&row), EntryOutcome::NotClaimed);
        assert_eq!(f.target.operations().len(), 1);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("a", b"x").unwrap();
        f.target.fail_next("a", 2, "SlowDown");
        f.store.insert(&NewEntry::file("a", 1, "t"), 1);

        assert_eq!(f.mover.transfer_entry(&only_row(&f.store)), EntryOutcome::Moved);
    }

    #[test]
    fn test_exhausted_retries_mark_failed() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("a", b"x").unwrap();
        f.target.fail_next("a", 3, "InternalError");
        f.store.insert(&NewEntry::file("a", 1, "t"), 1);

        assert_eq!(f.mover.transfer_entry(&only_row(&f.store)), EntryOutcome::Failed);
        let row = only_row(&f.store);
        assert_eq!(row.object_state, ObjectState::Failed);
        assert_eq!(row.error_code.as_deref(), Some("InternalError"));

        let job = f.store.job().unwrap().unwrap();
        assert_eq!(job.failed.count, 1);
    }

    #[test]
    fn test_missing_source_object_fails_without_retry() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.store.insert(&NewEntry::file("ghost", 1, "t"), 1);

        assert_eq!(f.mover.transfer_entry(&only_row(&f.store)), EntryOutcome::Failed);
        assert_eq!(only_row(&f.store).error_code.as_deref(), Some("NoSuchKey"));
    }

    #[test]
    fn test_directory_becomes_folder_marker() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.store.insert(&NewEntry::directory("docs/"), 1);

        assert_eq!(f.mover.transfer_entry(&only_row(&f.store)), EntryOutcome::Moved);
        assert_eq!(f.target.read_bytes("docs/", None).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_delete_marker_is_replicated() {
        let f = fixture(
            MemoryObjectStore::versioned("src"),
            MemoryObjectStore::versioned("dst"),
        );
        f.target.put_bytes("k", b"old").unwrap();
        f.store.insert(
            &NewEntry {
                is_delete: true,
                is_latest: true,
                version_id: Some("dm".into()),
                ..NewEntry::file("k", 0, "t")
            },
            1,
        );

        assert_eq!(f.mover.transfer_entry(&only_row(&f.store)), EntryOutcome::Moved);
        assert!(f.target.versions("k")[0].is_delete);
        assert_eq!(only_row(&f.store).object_state, ObjectState::Deleted);
    }

    #[test]
    fn test_tags_are_applied() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("t", b"x").unwrap();
        f.store.insert(
            &NewEntry {
                tag_set: Some(r#"{"team":"infra"}"#.into()),
                ..NewEntry::file("t", 1, "m")
            },
            1,
        );

        f.mover.transfer_entry(&only_row(&f.store));
        let tags = f.target.tagging().unwrap().get_tags("t", None).unwrap();
        assert_eq!(tags.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn test_acl_follows_object() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.source.put_bytes("shared", b"x").unwrap();
        f.source.put_bytes("plain", b"y").unwrap();
        f.source.acl().unwrap().put_acl("shared", "public-read").unwrap();
        f.store.insert(&NewEntry::file("shared", 1, "t"), 1);
        f.store.insert(&NewEntry::file("plain", 1, "t"), 1);

        for row in f.store.page(0, 10, EntryFilter::default()).unwrap() {
            assert_eq!(f.mover.transfer_entry(&row), EntryOutcome::Moved);
        }
        let acl = f.target.acl().unwrap();
        assert_eq!(acl.get_acl("shared", None).unwrap(), "public-read");
        assert_eq!(acl.get_acl("plain", None).unwrap(), DEFAULT_ACL);
        // Default ACLs are not rewritten.
        assert_eq!(f.target.operations().len(), 3);
    }

    #[test]
    fn test_shutdown_leaves_row_pending() {
        let f = fixture(MemoryObjectStore::new("src"), MemoryObjectStore::new("dst"));
        f.store.insert(&NewEntry::file("a", 1, "t"), 1);
        f.mover.shutdown.store(true, Ordering::Relaxed);

        assert_eq!(f.mover.transfer_entry(&only_row(&f.store)), EntryOutcome::Interrupted);
        assert_eq!(only_row(&f.store).object_state, ObjectState::Pending);
    }
}
