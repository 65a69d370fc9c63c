use std::path::PathBuf;
use thiserror::Error;

/// Failures of the catalog database.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Catalog query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Catalog I/O on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog schema v{version} could not be applied: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored column held a value outside its domain.
    #[error("Invalid value {value} in column '{column}'")]
    InvalidValue { column: &'static str, value: i64 },

    #[error("Catalog connection lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// True when another connection held the database lock.
    pub fn is_busy(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// True for failures that may succeed on a later attempt: lock
    /// contention and disk I/O errors.
    pub fn is_transient(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                self.is_busy() || e.code == rusqlite::ErrorCode::SystemIoFailure
            }
            DatabaseError::Io { .. } => true,
            _ => false,
        }
    }
}
