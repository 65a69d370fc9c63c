use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use walkdir::WalkDir;

use super::{
    BackendError, BackendKind, ListedObject, ObjectBackend, ObjectData, ObjectListing,
    ObjectMetadata, META_MODE, META_MTIME, META_XATTR_PREFIX,
};
use crate::catalog::entry::DIRECTORY_MTIME;

/// `mtime` recorded for entries whose metadata cannot be read.
pub const UNREADABLE_MTIME: &str = "";

/// A directory tree exposed as a flat key space.
///
/// Keys are paths relative to the mountpoint with `/` separators.
/// Directories are listed with a trailing `/`.
pub struct FileSystemBackend {
    root: PathBuf,
    prefix: String,
}

impl FileSystemBackend {
    pub fn new<P: AsRef<Path>>(mountpoint: P, prefix: &str) -> Self {
        Self {
            root: mountpoint.as_ref().to_path_buf(),
            prefix: prefix.trim_start_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope(&self) -> PathBuf {
        if self.prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(self.prefix.trim_end_matches('/'))
        }
    }

    /// Resolves a key below the root, rejecting anything that would escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, BackendError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn read_metadata(&self, path: &Path, meta: &fs::Metadata) -> ObjectMetadata {
        let mut metadata = ObjectMetadata::default();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            metadata.insert(META_MODE, format!("{:o}", meta.permissions().mode() & 0o7777));
        }
        if let Ok(modified) = meta.modified() {
            metadata.insert(META_MTIME, format_mtime(modified));
        }

        #[cfg(target_os = "linux")]
        match super::xattr::list(path) {
            Ok(attrs) => {
                let engine = base64::engine::general_purpose::STANDARD;
                for (name, value) in attrs {
                    metadata.insert(format!("{}{}", META_XATTR_PREFIX, name), engine.encode(value));
                }
            }
            Err(e) => debug!("Could not read xattrs of {}: {}", path.display(), e),
        }
        #[cfg(not(target_os = "linux"))]
        let _ = path;

        metadata
    }

    fn apply_metadata(
        &self,
        file: &File,
        path: &Path,
        metadata: &ObjectMetadata,
    ) -> Result<(), BackendError> {
        if let Some(mtime) = metadata.get(META_MTIME) {
            let parsed = DateTime::parse_from_rfc3339(mtime)
                .map_err(|e| BackendError::Remote {
                    code: "InvalidMetadata".into(),
                    message: format!("bad mtime '{}': {}", mtime, e),
                })?
                .with_timezone(&Utc);
            file.set_modified(SystemTime::from(parsed))
                .map_err(|e| BackendError::io(path, e))?;
        }

        #[cfg(target_os = "linux")]
        for (name, encoded) in metadata.xattrs() {
            let engine = base64::engine::general_purpose::STANDARD;
            let applied = engine
                .decode(encoded)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
                .and_then(|value| super::xattr::set(path, name, &value));
            if let Err(e) = applied {
                warn!("Could not set xattr {} on {}: {}", name, path.display(), e);
            }
        }

        #[cfg(unix)]
        if let Some(mode) = metadata.get(META_MODE) {
            use std::os::unix::fs::PermissionsExt;
            let bits = u32::from_str_radix(mode, 8).map_err(|e| BackendError::Remote {
                code: "InvalidMetadata".into(),
                message: format!("bad mode '{}': {}", mode, e),
            })?;
            fs::set_permissions(path, fs::Permissions::from_mode(bits))
                .map_err(|e| BackendError::io(path, e))?;
        }

        Ok(())
    }
}

pub(crate) fn format_mtime(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

impl ObjectBackend for FileSystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FileSystem
    }

    fn display_point(&self) -> String {
        self.scope().display().to_string()
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn check(&self) -> Result<(), BackendError> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(BackendError::Unreachable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(BackendError::Unreachable(format!(
                "{}: {}",
                self.root.display(),
                e
            ))),
        }
    }

    fn list(&self) -> Result<ObjectListing<'_>, BackendError> {
        let scope = self.scope();
        let meta = fs::metadata(&scope).map_err(|e| BackendError::io(&scope, e))?;
        if !meta.is_dir() {
            return Err(BackendError::InvalidKey(self.prefix.clone()));
        }

        let walker = WalkDir::new(&scope)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Box::new(FsListing {
            backend: self,
            walker,
            last_yielded: None,
        }))
    }

    fn get(&self, path: &str, version_id: Option<&str>) -> Result<ObjectData, BackendError> {
        if version_id.is_some() {
            return Err(BackendError::Unsupported("versioned read from a filesystem"));
        }
        let full = self.resolve(path)?;
        let file = File::open(&full).map_err(|e| BackendError::io(&full, e))?;
        let meta = file.metadata().map_err(|e| BackendError::io(&full, e))?;
        let metadata = self.read_metadata(&full, &meta);

        Ok(ObjectData {
            reader: Box::new(file),
            size: meta.len(),
            metadata,
        })
    }

    fn put(&self, key: &str, mut data: ObjectData) -> Result<String, BackendError> {
        let full = self.resolve(key)?;

        if key.ends_with('/') {
            fs::create_dir_all(&full).map_err(|e| BackendError::io(&full, e))?;
            return Ok(String::new());
        }

        let parent = full
            .parent()
            .ok_or_else(|| BackendError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| BackendError::io(parent, e))?;

        // Write next to the destination, then rename into place.
        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = parent.join(format!(".{}.objferry-{}", file_name, uuid::Uuid::new_v4()));

        let written = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)
                .map_err(|e| BackendError::io(&staging, e))?;
            io::copy(&mut data.reader, &mut file).map_err(|e| BackendError::io(&staging, e))?;
            self.apply_metadata(&file, &staging, &data.metadata)?;
            fs::rename(&staging, &full).map_err(|e| BackendError::io(&full, e))
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        Ok(String::new())
    }

    fn delete(&self, key: &str, version_id: Option<&str>) -> Result<(), BackendError> {
        if version_id.is_some() {
            return Err(BackendError::Unsupported("versioned delete on a filesystem"));
        }
        let full = self.resolve(key)?;
        let removed = if key.ends_with('/') {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        };
        match removed {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::io(&full, e)),
        }
    }
}

struct FsListing<'a> {
    backend: &'a FileSystemBackend,
    walker: walkdir::IntoIter,
    last_yielded: Option<PathBuf>,
}

impl FsListing<'_> {
    fn listed(&mut self, path: &Path, key: String, entry: ListedObject) -> ListedObject {
        self.last_yielded = Some(path.to_path_buf());
        ListedObject { path: key, ..entry }
    }
}

impl Iterator for FsListing<'_> {
    type Item = Result<ListedObject, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf);
                    let io_err = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop"));
                    match path {
                        // The entry itself was listed; only its contents failed.
                        Some(p) if self.last_yielded.as_deref() == Some(p.as_path()) => {
                            return Some(Err(BackendError::io(p, io_err)));
                        }
                        Some(p) => {
                            let Some(key) = self.backend.key_of(&p) else {
                                return Some(Err(BackendError::io(p, io_err)));
                            };
                            warn!("Unreadable entry {}: {}", p.display(), io_err);
                            let unreadable = ListedObject {
                                is_file: true,
                                mtime: UNREADABLE_MTIME.to_string(),
                                ..Default::default()
                            };
                            return Some(Ok(self.listed(&p, key, unreadable)));
                        }
                        None => return Some(Err(BackendError::io(PathBuf::new(), io_err))),
                    }
                }
            };

            let path = entry.path().to_path_buf();
            let Some(key) = self.backend.key_of(&path) else {
                continue;
            };

            if entry.file_type().is_dir() {
                let dir = ListedObject {
                    is_file: false,
                    mtime: DIRECTORY_MTIME.to_string(),
                    ..Default::default()
                };
                return Some(Ok(self.listed(&path, format!("{}/", key), dir)));
            }

            // Symlinks are never descended into and carry their target's attributes.
            let followed = if entry.path_is_symlink() {
                fs::metadata(&path)
            } else {
                entry.metadata().map_err(io::Error::from)
            };
            let listed = match followed {
                Ok(meta) if meta.is_dir() => {
                    let dir = ListedObject {
                        is_file: false,
                        mtime: DIRECTORY_MTIME.to_string(),
                        ..Default::default()
                    };
                    return Some(Ok(self.listed(&path, format!("{}/", key), dir)));
                }
                Ok(meta) => {
                    // Metadata can be readable while the content is not.
                    let readable = !meta.is_file() || File::open(&path).is_ok();
                    if !readable {
                        warn!("Unreadable content {}", path.display());
                    }
                    ListedObject {
                        size: meta.len(),
                        is_file: true,
                        mtime: match meta.modified() {
                            Ok(modified) if readable => format_mtime(modified),
                            _ => UNREADABLE_MTIME.to_string(),
                        },
                        ..Default::default()
                    }
                }
                Err(e) => {
                    warn!("Unreadable entry {}: {}", path.display(), e);
                    ListedObject {
                        is_file: true,
                        mtime: UNREADABLE_MTIME.to_string(),
                        ..Default::default()
                    }
                }
            };
            return Some(Ok(self.listed(&path, key, listed)));
        }
    }
}
