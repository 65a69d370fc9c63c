//! Catalog entry types shared by the scanner, the mover and the SQL layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `mtime` token stored for directory entries.
pub const DIRECTORY_MTIME: &str = "-";

/// Transfer state of a single catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Pending,
    Claimed,
    Done,
    Failed,
    /// A delete marker that was replicated to the target.
    Deleted,
}

impl ObjectState {
    pub fn code(self) -> i64 {
        match self {
            ObjectState::Pending => 1,
            ObjectState::Claimed => 2,
            ObjectState::Done => 3,
            ObjectState::Failed => 4,
            ObjectState::Deleted => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => ObjectState::Pending,
            2 => ObjectState::Claimed,
            3 => ObjectState::Done,
            4 => ObjectState::Failed,
            5 => ObjectState::Deleted,
            _ => return None,
        })
    }

    /// True once the row's object has reached the target.
    pub fn is_transferred(self) -> bool {
        matches!(self, ObjectState::Done | ObjectState::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectState::Pending => "pending",
            ObjectState::Claimed => "claimed",
            ObjectState::Done => "done",
            ObjectState::Failed => "failed",
            ObjectState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes a version id into the catalog's identity column.
///
/// `None` (an unversioned object) and `Some("")` must not collide, so the
/// two classes get distinct prefixes.
pub fn version_key(version_id: Option<&str>) -> String {
    match version_id {
        None => "~".to_string(),
        Some(v) => format!("={}", v),
    }
}

/// An object discovered at the source, ready to be written to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEntry {
    pub path: String,
    pub size: u64,
    pub is_file: bool,
    pub mtime: String,
    pub version_id: Option<String>,
    pub etag: Option<String>,
    pub multipart_info: Option<String>,
    /// JSON-serialized tag set.
    pub tag_set: Option<String>,
    pub is_delete: bool,
    pub is_latest: bool,
}

impl NewEntry {
    /// A plain, unversioned file entry.
    pub fn file(path: impl Into<String>, size: u64, mtime: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size,
            is_file: true,
            mtime: mtime.into(),
            ..Default::default()
        }
    }

    /// A directory entry (zero size, `mtime = "-"`).
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            is_file: false,
            mtime: DIRECTORY_MTIME.to_string(),
            ..Default::default()
        }
    }

    pub fn version_key(&self) -> String {
        version_key(self.version_id.as_deref())
    }
}

/// A full catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub sequence: i64,
    pub path: String,
    pub size: u64,
    pub is_file: bool,
    pub mtime: String,
    pub version_id: Option<String>,
    pub etag: Option<String>,
    pub multipart_info: Option<String>,
    pub tag_set: Option<String>,
    pub is_delete: bool,
    pub is_latest: bool,
    pub object_state: ObjectState,
    pub skip_check: bool,
    pub pass_no: i64,
    pub error_date: Option<String>,
    pub error_code: Option<String>,
    pub error_desc: Option<String>,
}

impl CatalogEntry {
    pub fn is_directory(&self) -> bool {
        !self.is_file && !self.is_delete
    }
}

/// The subset of a row needed for rerun reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
    pub sequence: i64,
    pub object_state: ObjectState,
    pub mtime: String,
    pub etag: Option<String>,
    pub size: u64,
    pub skip_check: bool,
    pub pass_no: i64,
}

/// Row filter for paged reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub is_delete: Option<bool>,
    pub state: Option<ObjectState>,
}

impl EntryFilter {
    /// Rows still waiting for the mover.
    pub fn pending() -> Self {
        Self {
            is_delete: None,
            state: Some(ObjectState::Pending),
        }
    }

    pub fn with_delete(mut self, is_delete: bool) -> Self {
        self.is_delete = Some(is_delete);
        self
    }
}
