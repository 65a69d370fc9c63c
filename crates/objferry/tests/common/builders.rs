//! Builders for endpoint files and pre-populated object stores.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use objferry::backend::{BackendKind, MemoryObjectStore, ObjectBackend};

/// Builds endpoint YAML files the way an operator would write them.
pub struct EndpointBuilder {
    kind: BackendKind,
    mountpoint: Option<String>,
    bucket: Option<String>,
    endpoint: Option<String>,
    prefix: Option<String>,
}

impl EndpointBuilder {
    pub fn filesystem(mountpoint: &Path) -> Self {
        Self {
            kind: BackendKind::FileSystem,
            mountpoint: Some(mountpoint.display().to_string()),
            bucket: None,
            endpoint: None,
            prefix: None,
        }
    }

    pub fn object_store(bucket: &str) -> Self {
        Self {
            kind: BackendKind::ObjectStore,
            mountpoint: None,
            bucket: Some(bucket.to_string()),
            endpoint: None,
            prefix: None,
        }
    }

    pub fn endpoint(mut self, url: &str) -> Self {
        self.endpoint = Some(url.to_string());
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn to_yaml(&self) -> String {
        let mut yaml = format!("kind: {}\n", self.kind);
        for (key, value) in [
            ("mountpoint", &self.mountpoint),
            ("bucket", &self.bucket),
            ("endpoint", &self.endpoint),
            ("prefix", &self.prefix),
        ] {
            if let Some(value) = value {
                yaml.push_str(&format!("{}: \"{}\"\n", key, value));
            }
        }
        yaml
    }

    /// Writes the YAML to `dir/name` and returns its path.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.to_yaml()).expect("Failed to write endpoint file");
        path
    }
}

/// Populates an in-memory bucket, one call per version written.
pub struct StoreBuilder {
    store: MemoryObjectStore,
}

impl StoreBuilder {
    pub fn unversioned(bucket: &str) -> Self {
        Self {
            store: MemoryObjectStore::new(bucket),
        }
    }

    pub fn versioned(bucket: &str) -> Self {
        Self {
            store: MemoryObjectStore::versioned(bucket),
        }
    }

    pub fn object(self, key: &str, body: &[u8]) -> Self {
        self.store.put_bytes(key, body).expect("Failed to put object");
        self
    }

    pub fn delete_marker(self, key: &str) -> Self {
        self.store.delete(key, None).expect("Failed to delete object");
        self
    }

    pub fn build(self) -> MemoryObjectStore {
        self.store
    }
}
