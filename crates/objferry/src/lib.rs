pub mod backend;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod scan;
pub mod worker;

pub use backend::{
    BackendError, BackendKind, FileSystemBackend, MemoryObjectStore, ObjectBackend,
};
pub use catalog::{CatalogStore, ObjectState, WriteOutcome};
pub use config::{load_endpoint_config, EndpointConfig, MetadataOptions, MoveOptions, RetryPolicy};
pub use db::{default_database_path, Database, DatabaseError};
pub use error::{ConfigError, FerryError, JobError, Result, ScanError, WorkerError};
pub use job::{JobController, JobState, JobStatus, PassReport};
pub use logging::init_logging;
