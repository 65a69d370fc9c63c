//! Database module for the job catalog.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`, which gives the
//! single-writer-at-a-time semantics the catalog relies on.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction};

pub mod catalog_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// How long a connection waits on a lock held by another process
/// (e.g. a STATUS invocation reading while a MOVE is writing).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the catalog lives. Both variants share one schema and one set of
/// queries; they differ only in how the connection is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLocation {
    /// Single-file database, WAL journal.
    File(PathBuf),
    /// Private in-memory database (tests, dry runs).
    Memory,
}

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    location: CatalogLocation,
}

impl Database {
    /// Opens the catalog at `location` and runs all pending migrations.
    pub fn connect(location: CatalogLocation) -> Result<Self, DatabaseError> {
        match location {
            CatalogLocation::File(path) => Self::open(&path),
            CatalogLocation::Memory => Self::open_in_memory(),
        }
    }

    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let applied = migrations::run_all(&conn)?;
        log::info!(
            "Catalog opened at {} ({} schema steps applied)",
            path.display(),
            applied
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: CatalogLocation::File(path.to_path_buf()),
        })
    }

    /// Opens an in-memory database. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: CatalogLocation::Memory,
        })
    }

    pub fn location(&self) -> &CatalogLocation {
        &self.location
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. The transaction is committed when `f`
    /// returns `Ok` and rolled back otherwise.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Returns the canonical catalog path: `~/.objferry/catalog.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".objferry").join("catalog.db"))
}
