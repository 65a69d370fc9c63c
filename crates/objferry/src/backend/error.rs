use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single adapter operation.
///
/// Every variant maps to a stable short code (see [`BackendError::code`])
/// that is stored in the catalog's `error_code` column.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Object '{key}' not found")]
    NotFound { key: String },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// An error code reported by a remote store.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
}

impl BackendError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            BackendError::NotFound { .. } => "NoSuchKey",
            BackendError::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => "NoSuchKey",
                std::io::ErrorKind::PermissionDenied => "AccessDenied",
                _ => "IoError",
            },
            BackendError::Unreachable(_) => "Unreachable",
            BackendError::AccessDenied(_) => "AccessDenied",
            BackendError::InvalidKey(_) => "InvalidKey",
            BackendError::Unsupported(_) => "NotImplemented",
            BackendError::Remote { code, .. } => code,
        }
    }

    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Io { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            BackendError::Unreachable(_) | BackendError::Remote { .. } => true,
            _ => false,
        }
    }
}
