//! Storage adapters.
//!
//! Every source and target is an [`ObjectBackend`]. The trait is kept narrow:
//! listing, streaming get/put, delete and versioning. Tagging and ACL
//! support are optional capabilities discovered at runtime.

pub mod error;
pub mod filesystem;
pub mod memory;
#[cfg(target_os = "linux")]
mod xattr;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use error::BackendError;
pub use filesystem::FileSystemBackend;
pub use memory::MemoryObjectStore;

/// Metadata key carrying the octal permission bits of a file.
pub const META_MODE: &str = "mode";
/// Metadata key carrying the RFC 3339 modification time.
pub const META_MTIME: &str = "mtime";
/// Prefix of metadata keys carrying base64-encoded extended attributes.
pub const META_XATTR_PREFIX: &str = "xattr-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "fs", alias = "file")]
    FileSystem,
    #[serde(alias = "s3")]
    ObjectStore,
    Swift,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::FileSystem => "filesystem",
            BackendKind::ObjectStore => "objectstore",
            BackendKind::Swift => "swift",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "filesystem" | "fs" | "file" => Ok(BackendKind::FileSystem),
            "objectstore" | "s3" => Ok(BackendKind::ObjectStore),
            "swift" => Ok(BackendKind::Swift),
            other => Err(format!("unknown backend kind '{}'", other)),
        }
    }
}

/// One object, version or delete marker as reported by a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedObject {
    pub path: String,
    pub size: u64,
    pub mtime: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub is_delete: bool,
    pub is_latest: bool,
    pub is_file: bool,
}

/// Metadata travelling with an object body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub entries: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(attribute name, base64 value)` pairs of extended attributes.
    pub fn xattrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(k, v)| {
            k.strip_prefix(META_XATTR_PREFIX)
                .map(|name| (name, v.as_str()))
        })
    }
}

/// A readable object body.
pub struct ObjectData {
    pub reader: Box<dyn Read + Send>,
    pub size: u64,
    pub metadata: ObjectMetadata,
}

impl ObjectData {
    /// An empty body, used for folder markers.
    pub fn empty() -> Self {
        Self {
            reader: Box::new(std::io::empty()),
            size: 0,
            metadata: ObjectMetadata::default(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            size: bytes.len() as u64,
            reader: Box::new(std::io::Cursor::new(bytes)),
            metadata: ObjectMetadata::default(),
        }
    }
}

impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectData")
            .field("size", &self.size)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

pub type ObjectListing<'a> = Box<dyn Iterator<Item = Result<ListedObject, BackendError>> + Send + 'a>;

/// A storage endpoint usable as migration source and/or target.
pub trait ObjectBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable endpoint, stored as the job's source/target point.
    fn display_point(&self) -> String;

    /// Key prefix the endpoint is scoped to (may be empty).
    fn prefix(&self) -> &str;

    /// Verifies the endpoint is reachable and usable.
    fn check(&self) -> Result<(), BackendError>;

    /// Lazily lists every object, version and delete marker under the prefix.
    ///
    /// Versions of one path are yielded consecutively, newest first.
    fn list(&self) -> Result<ObjectListing<'_>, BackendError>;

    fn get(&self, path: &str, version_id: Option<&str>) -> Result<ObjectData, BackendError>;

    /// Writes `data` under `key` and returns the resulting etag.
    fn put(&self, key: &str, data: ObjectData) -> Result<String, BackendError>;

    /// Deletes `key`. Without a version id, a versioned store records a
    /// delete marker instead.
    fn delete(&self, key: &str, version_id: Option<&str>) -> Result<(), BackendError>;

    fn is_versioned(&self) -> Result<bool, BackendError> {
        Ok(false)
    }

    fn set_versioning(&self, _enabled: bool) -> Result<(), BackendError> {
        Ok(())
    }

    fn tagging(&self) -> Option<&dyn Tagging> {
        None
    }

    fn acl(&self) -> Option<&dyn AclAccess> {
        None
    }
}

pub type TagSet = BTreeMap<String, String>;

/// Object tagging capability.
pub trait Tagging: Send + Sync {
    fn get_tags(&self, path: &str, version_id: Option<&str>) -> Result<TagSet, BackendError>;

    /// Replaces the tags of the current version of `key`.
    fn put_tags(&self, key: &str, tags: &TagSet) -> Result<(), BackendError>;
}

/// Canned ACL a freshly written object starts with.
pub const DEFAULT_ACL: &str = "private";

/// Canned-ACL capability.
pub trait AclAccess: Send + Sync {
    fn get_acl(&self, path: &str, version_id: Option<&str>) -> Result<String, BackendError>;

    fn put_acl(&self, key: &str, acl: &str) -> Result<(), BackendError>;
}
