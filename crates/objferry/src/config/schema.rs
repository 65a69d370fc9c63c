use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// One source or target endpoint, as read from its YAML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub kind: BackendKind,
    /// Filesystem root (filesystem endpoints).
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// Bucket or container name (object store and swift endpoints).
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

impl EndpointConfig {
    pub fn filesystem(mountpoint: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::FileSystem,
            mountpoint: Some(mountpoint.into()),
            bucket: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
            prefix: String::new(),
        }
    }
}

/// Which object metadata is carried from source to target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOptions {
    #[serde(default)]
    pub xattr: bool,
    #[serde(default)]
    pub permissions: bool,
    #[serde(default)]
    pub timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Tunables of a MOVE or RERUN pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOptions {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub metadata: MetadataOptions,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_threads() -> usize {
    5
}

fn default_batch_size() -> usize {
    100
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            batch_size: default_batch_size(),
            metadata: MetadataOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}
