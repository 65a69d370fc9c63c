use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendError;
use crate::db::DatabaseError;
use crate::job::state::JobState;

#[derive(Error, Debug)]
pub enum FerryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse endpoint YAML '{path}': {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Endpoint of kind '{kind}' requires '{field}'")]
    MissingField { kind: String, field: &'static str },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker {0} panicked")]
    Panicked(usize),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Listing '{point}' failed: {source}")]
    Listing {
        point: String,
        #[source]
        source: BackendError,
    },

    #[error("Catalog write failed during scan: {0}")]
    Database(#[from] DatabaseError),

    #[error("Scan interrupted")]
    Interrupted,
}

#[derive(Error, Debug)]
pub enum JobError {
    /// An unrecoverable precondition failure; the job ends in ERROR.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Job {0} not found")]
    NotFound(i64),

    #[error("Job {job_id} is {state}; cannot {operation}")]
    InvalidState {
        job_id: i64,
        state: JobState,
        operation: &'static str,
    },

    #[error("Job {job_id} is still being moved by process {pid}")]
    Active { job_id: i64, pid: i64 },

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: i64,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, FerryError>;
