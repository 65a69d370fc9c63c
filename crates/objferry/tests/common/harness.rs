//! Isolated environment for migration tests.
//!
//! Each `TestHarness` owns a temporary directory holding a source tree, a
//! target tree and a file-backed catalog, so tests never share state.

#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use objferry::catalog::{CatalogEntry, CatalogStore, EntryFilter, JobRow};
use objferry::config::{MoveOptions, RetryPolicy};
use objferry::db::job_repo;
use objferry::{Database, FileSystemBackend, JobController, ObjectBackend};

pub struct TestHarness {
    temp_dir: TempDir,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub db_path: PathBuf,
    db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let source_dir = base.join("source");
        let target_dir = base.join("target");
        let db_path = base.join("catalog").join("catalog.db");

        fs::create_dir_all(&source_dir).expect("Failed to create source dir");
        fs::create_dir_all(&target_dir).expect("Failed to create target dir");
        let db = Database::open(&db_path).expect("Failed to open catalog");

        Self {
            temp_dir,
            source_dir,
            target_dir,
            db_path,
            db,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database(&self) -> Database {
        self.db.clone()
    }

    /// Writes a file below the source tree, creating parent directories.
    pub fn write_source(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.source_dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, content).expect("Failed to write source file");
        path
    }

    /// Writes `len` filler bytes.
    pub fn write_source_sized(&self, rel: &str, len: usize) -> PathBuf {
        self.write_source(rel, &vec![b'x'; len])
    }

    /// Pins the modification time of a source file to `secs` after the epoch.
    pub fn set_source_mtime(&self, rel: &str, secs: u64) {
        let file = File::options()
            .write(true)
            .open(self.source_dir.join(rel))
            .expect("Failed to open source file");
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .expect("Failed to set mtime");
    }

    pub fn read_target(&self, rel: &str) -> Option<Vec<u8>> {
        fs::read(self.target_dir.join(rel)).ok()
    }

    pub fn source(&self) -> Arc<dyn ObjectBackend> {
        Arc::new(FileSystemBackend::new(&self.source_dir, ""))
    }

    pub fn target(&self) -> Arc<dyn ObjectBackend> {
        Arc::new(FileSystemBackend::new(&self.target_dir, ""))
    }

    /// Controller with small, fast retry settings.
    pub fn controller(&self) -> JobController {
        self.controller_with(test_options())
    }

    pub fn controller_with(&self, options: MoveOptions) -> JobController {
        JobController::new(self.database(), options)
    }

    pub fn job(&self, job_id: i64) -> JobRow {
        job_repo::find_by_id(&self.db, job_id)
            .expect("Failed to load job")
            .expect("Job not found")
    }

    /// Every catalog row of the job, in sequence order.
    pub fn rows(&self, job_id: i64) -> Vec<CatalogEntry> {
        CatalogStore::new(self.database(), job_id, RetryPolicy::default())
            .page(0, 100_000, EntryFilter::default())
            .expect("Failed to page catalog")
    }

    pub fn row(&self, job_id: i64, path: &str) -> CatalogEntry {
        self.rows(job_id)
            .into_iter()
            .find(|r| r.path == path)
            .unwrap_or_else(|| panic!("No catalog row for {}", path))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_options() -> MoveOptions {
    MoveOptions {
        threads: 3,
        batch_size: 2,
        retry: RetryPolicy {
            attempts: 3,
            backoff_ms: 1,
        },
        ..MoveOptions::default()
    }
}
