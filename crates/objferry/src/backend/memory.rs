//! An in-process object store with S3 bucket semantics.
//!
//! Supports versioning (enabled or suspended), delete markers, object tags,
//! canned ACLs and failure injection. Every mutating call is appended to an operation
//! log so callers can assert on the order in which a migration wrote.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use super::{
    AclAccess, BackendError, BackendKind, ListedObject, ObjectBackend, ObjectData,
    ObjectListing, ObjectMetadata, TagSet, Tagging, DEFAULT_ACL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningStatus {
    /// Versioning was never enabled.
    Unversioned,
    Enabled,
    Suspended,
}

/// A mutating call recorded by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put { key: String, version_id: Option<String> },
    Delete { key: String, version_id: Option<String> },
    PutTags { key: String },
    PutAcl { key: String, acl: String },
}

/// Read-only view of one stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version_id: Option<String>,
    pub size: u64,
    pub etag: String,
    pub mtime: String,
    pub is_delete: bool,
    pub is_latest: bool,
}

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: Option<String>,
    body: Vec<u8>,
    etag: String,
    mtime: String,
    is_delete: bool,
    metadata: ObjectMetadata,
    tags: TagSet,
    acl: String,
}

struct StoreState {
    versioning: VersioningStatus,
    /// Versions per key, oldest first.
    objects: BTreeMap<String, Vec<StoredVersion>>,
    ops: Vec<StoreOp>,
    /// Remaining injected failures per key: `(count, code)`.
    failures: HashMap<String, (u32, String)>,
    reachable: bool,
    clock: DateTime<Utc>,
}

impl StoreState {
    fn tick(&mut self) -> String {
        self.clock += Duration::milliseconds(1);
        self.clock.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn injected(&mut self, key: &str) -> Result<(), BackendError> {
        if let Some((remaining, code)) = self.failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::Remote {
                    code: code.clone(),
                    message: format!("injected failure for '{}'", key),
                });
            }
        }
        Ok(())
    }

    fn next_version_id(&self) -> Option<String> {
        match self.versioning {
            VersioningStatus::Enabled => Some(uuid::Uuid::new_v4().simple().to_string()),
            _ => None,
        }
    }

    /// Adds a version under the rules of the current versioning status.
    fn push(&mut self, key: &str, version: StoredVersion) {
        let versions = self.objects.entry(key.to_string()).or_default();
        match self.versioning {
            VersioningStatus::Unversioned => versions.clear(),
            // A suspended bucket overwrites its null version in place.
            VersioningStatus::Suspended => versions.retain(|v| v.version_id.is_some()),
            VersioningStatus::Enabled => {}
        }
        versions.push(version);
    }
}

fn etag_of(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub struct MemoryObjectStore {
    bucket: String,
    prefix: String,
    state: Mutex<StoreState>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: String::new(),
            state: Mutex::new(StoreState {
                versioning: VersioningStatus::Unversioned,
                objects: BTreeMap::new(),
                ops: Vec::new(),
                failures: HashMap::new(),
                reachable: true,
                clock: Utc::now(),
            }),
        }
    }

    /// A store whose bucket has versioning enabled.
    pub fn versioned(bucket: impl Into<String>) -> Self {
        let store = Self::new(bucket);
        if let Ok(mut state) = store.state.lock() {
            state.versioning = VersioningStatus::Enabled;
        }
        store
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_start_matches('/').to_string();
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Unreachable(format!("bucket '{}' lock poisoned", self.bucket)))
    }

    pub fn versioning_status(&self) -> VersioningStatus {
        self.state
            .lock()
            .map(|s| s.versioning)
            .unwrap_or(VersioningStatus::Unversioned)
    }

    /// Convenience write of an in-memory body.
    pub fn put_bytes(&self, key: &str, body: &[u8]) -> Result<String, BackendError> {
        self.put(key, ObjectData::from_bytes(body.to_vec()))
    }

    /// Body of the given (or current) version, `None` if absent or a marker.
    pub fn read_bytes(&self, key: &str, version_id: Option<&str>) -> Option<Vec<u8>> {
        let state = self.state.lock().ok()?;
        let versions = state.objects.get(key)?;
        let version = match version_id {
            Some(v) => versions.iter().find(|s| s.version_id.as_deref() == Some(v))?,
            None => versions.last()?,
        };
        (!version.is_delete).then(|| version.body.clone())
    }

    /// Versions of `key`, newest first.
    pub fn versions(&self, key: &str) -> Vec<VersionInfo> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let Some(versions) = state.objects.get(key) else {
            return Vec::new();
        };
        let newest = versions.len().saturating_sub(1);
        versions
            .iter()
            .enumerate()
            .rev()
            .map(|(i, v)| VersionInfo {
                version_id: v.version_id.clone(),
                size: v.body.len() as u64,
                etag: v.etag.clone(),
                mtime: v.mtime.clone(),
                is_delete: v.is_delete,
                is_latest: i == newest,
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.state.lock().map(|s| s.ops.clone()).unwrap_or_default()
    }

    pub fn metadata_of(&self, key: &str) -> Option<ObjectMetadata> {
        let state = self.state.lock().ok()?;
        state.objects.get(key)?.last().map(|v| v.metadata.clone())
    }

    /// Makes the next `times` calls touching `key` fail with `code`.
    pub fn fail_next(&self, key: &str, times: u32, code: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failures
                .insert(key.to_string(), (times, code.to_string()));
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.reachable = reachable;
        }
    }
}

impl ObjectBackend for MemoryObjectStore {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn display_point(&self) -> String {
        format!("mem://{}/{}", self.bucket, self.prefix)
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.lock()?.reachable {
            Ok(())
        } else {
            Err(BackendError::Unreachable(format!(
                "bucket '{}' does not answer",
                self.bucket
            )))
        }
    }

    fn list(&self) -> Result<ObjectListing<'_>, BackendError> {
        let state = self.lock()?;
        if !state.reachable {
            return Err(BackendError::Unreachable(self.bucket.clone()));
        }

        // Snapshot the listing so iteration does not hold the lock.
        let mut listed = Vec::new();
        for (key, versions) in state.objects.range(self.prefix.clone()..) {
            if !key.starts_with(&self.prefix) {
                break;
            }
            let newest = versions.len().saturating_sub(1);
            for (i, v) in versions.iter().enumerate().rev() {
                listed.push(Ok(ListedObject {
                    path: key.clone(),
                    size: v.body.len() as u64,
                    mtime: v.mtime.clone(),
                    etag: (!v.is_delete).then(|| v.etag.clone()),
                    version_id: v.version_id.clone(),
                    is_delete: v.is_delete,
                    is_latest: i == newest,
                    is_file: !v.is_delete && !key.ends_with('/'),
                }));
            }
        }
        Ok(Box::new(listed.into_iter()))
    }

    fn get(&self, path: &str, version_id: Option<&str>) -> Result<ObjectData, BackendError> {
        let mut state = self.lock()?;
        state.injected(path)?;

        let not_found = || BackendError::NotFound {
            key: path.to_string(),
        };
        let versions = state.objects.get(path).ok_or_else(not_found)?;
        let version = match version_id {
            Some(v) => versions
                .iter()
                .find(|s| s.version_id.as_deref() == Some(v))
                .ok_or_else(not_found)?,
            None => versions.last().ok_or_else(not_found)?,
        };
        if version.is_delete {
            return match version_id {
                Some(_) => Err(BackendError::Remote {
                    code: "MethodNotAllowed".into(),
                    message: format!("'{}' version is a delete marker", path),
                }),
                None => Err(not_found()),
            };
        }

        Ok(ObjectData {
            size: version.body.len() as u64,
            reader: Box::new(std::io::Cursor::new(version.body.clone())),
            metadata: version.metadata.clone(),
        })
    }

    fn put(&self, key: &str, mut data: ObjectData) -> Result<String, BackendError> {
        if key.is_empty() {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        let mut body = Vec::with_capacity(data.size as usize);
        data.reader
            .read_to_end(&mut body)
            .map_err(|e| BackendError::io(key, e))?;

        let mut state = self.lock()?;
        state.injected(key)?;

        let etag = etag_of(&body);
        let version_id = state.next_version_id();
        let mtime = state.tick();
        state.push(
            key,
            StoredVersion {
                version_id: version_id.clone(),
                body,
                etag: etag.clone(),
                mtime,
                is_delete: false,
                metadata: data.metadata,
                tags: TagSet::new(),
                acl: DEFAULT_ACL.to_string(),
            },
        );
        state.ops.push(StoreOp::Put {
            key: key.to_string(),
            version_id,
        });
        Ok(etag)
    }

    fn delete(&self, key: &str, version_id: Option<&str>) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.injected(key)?;

        match version_id {
            Some(v) => {
                let versions = state.objects.get_mut(key).ok_or_else(|| BackendError::NotFound {
                    key: key.to_string(),
                })?;
                let before = versions.len();
                versions.retain(|s| s.version_id.as_deref() != Some(v));
                if versions.len() == before {
                    return Err(BackendError::NotFound {
                        key: format!("{}?versionId={}", key, v),
                    });
                }
                if versions.is_empty() {
                    state.objects.remove(key);
                }
            }
            None if state.versioning == VersioningStatus::Unversioned => {
                state.objects.remove(key);
            }
            None => {
                let marker_id = state.next_version_id();
                let mtime = state.tick();
                state.push(
                    key,
                    StoredVersion {
                        version_id: marker_id,
                        body: Vec::new(),
                        etag: String::new(),
                        mtime,
                        is_delete: true,
                        metadata: ObjectMetadata::default(),
                        tags: TagSet::new(),
                        acl: DEFAULT_ACL.to_string(),
                    },
                );
            }
        }

        state.ops.push(StoreOp::Delete {
            key: key.to_string(),
            version_id: version_id.map(str::to_string),
        });
        Ok(())
    }

    fn is_versioned(&self) -> Result<bool, BackendError> {
        Ok(self.lock()?.versioning == VersioningStatus::Enabled)
    }

    fn set_versioning(&self, enabled: bool) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.versioning = match (enabled, state.versioning) {
            (true, _) => VersioningStatus::Enabled,
            (false, VersioningStatus::Unversioned) => VersioningStatus::Unversioned,
            (false, _) => VersioningStatus::Suspended,
        };
        Ok(())
    }

    fn tagging(&self) -> Option<&dyn Tagging> {
        Some(self)
    }

    fn acl(&self) -> Option<&dyn AclAccess> {
        Some(self)
    }
}

impl Tagging for MemoryObjectStore {
    fn get_tags(&self, path: &str, version_id: Option<&str>) -> Result<TagSet, BackendError> {
        let state = self.lock()?;
        let versions = state.objects.get(path).ok_or_else(|| BackendError::NotFound {
            key: path.to_string(),
        })?;
        let version = match version_id {
            Some(v) => versions.iter().find(|s| s.version_id.as_deref() == Some(v)),
            None => versions.last(),
        };
        Ok(version.map(|v| v.tags.clone()).unwrap_or_default())
    }

    fn put_tags(&self, key: &str, tags: &TagSet) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let current = state
            .objects
            .get_mut(key)
            .and_then(|versions| versions.last_mut())
            .filter(|v| !v.is_delete)
            .ok_or_else(|| BackendError::NotFound {
                key: key.to_string(),
            })?;
        current.tags = tags.clone();
        state.ops.push(StoreOp::PutTags {
            key: key.to_string(),
        });
        Ok(())
    }
}

impl AclAccess for MemoryObjectStore {
    fn get_acl(&self, path: &str, version_id: Option<&str>) -> Result<String, BackendError> {
        let state = self.lock()?;
        state
            .objects
            .get(path)
            .and_then(|versions| match version_id {
                Some(v) => versions.iter().find(|s| s.version_id.as_deref() == Some(v)),
                None => versions.last(),
            })
            .map(|v| v.acl.clone())
            .ok_or_else(|| BackendError::NotFound {
                key: path.to_string(),
            })
    }

    fn put_acl(&self, key: &str, acl: &str) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        let current = state
            .objects
            .get_mut(key)
            .and_then(|versions| versions.last_mut())
            .filter(|v| !v.is_delete)
            .ok_or_else(|| BackendError::NotFound {
                key: key.to_string(),
            })?;
        current.acl = acl.to_string();
        state.ops.push(StoreOp::PutAcl {
            key: key.to_string(),
            acl: acl.to_string(),
        });
        Ok(())
    }
}
