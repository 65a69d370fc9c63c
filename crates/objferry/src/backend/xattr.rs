//! Extended attribute access through libc. Symlinks are never followed.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

fn c_path(path: &Path) -> io::Result<CString> {
    Ok(CString::new(path.as_os_str().as_bytes())?)
}

fn unsupported(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOTSUP)
}

/// All `(name, value)` attribute pairs of `path`. Filesystems without
/// xattr support yield an empty list.
pub fn list(path: &Path) -> io::Result<Vec<(String, Vec<u8>)>> {
    let cpath = c_path(path)?;

    // SAFETY: a null buffer with size 0 only queries the required length.
    let size = unsafe { libc::llistxattr(cpath.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        let err = io::Error::last_os_error();
        return if unsupported(&err) { Ok(Vec::new()) } else { Err(err) };
    }
    if size == 0 {
        return Ok(Vec::new());
    }

    let mut names = vec![0u8; size as usize];
    // SAFETY: `names` is valid for `names.len()` bytes.
    let size = unsafe {
        libc::llistxattr(
            cpath.as_ptr(),
            names.as_mut_ptr() as *mut libc::c_char,
            names.len(),
        )
    };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }
    names.truncate(size as usize);

    let mut attrs = Vec::new();
    for raw in names.split(|b| *b == 0).filter(|n| !n.is_empty()) {
        let name = CString::new(raw.to_vec())?;
        let value = get(&cpath, &name)?;
        attrs.push((String::from_utf8_lossy(raw).into_owned(), value));
    }
    Ok(attrs)
}

fn get(path: &CString, name: &CString) -> io::Result<Vec<u8>> {
    // SAFETY: length query, see `list`.
    let size = unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut value = vec![0u8; size as usize];
    // SAFETY: `value` is valid for `value.len()` bytes.
    let read = unsafe {
        libc::lgetxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_mut_ptr() as *mut libc::c_void,
            value.len(),
        )
    };
    if read < 0 {
        return Err(io::Error::last_os_error());
    }
    value.truncate(read as usize);
    Ok(value)
}

pub fn set(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
    let cpath = c_path(path)?;
    let cname = CString::new(name)?;
    // SAFETY: all pointers are valid for the given lengths.
    let rc = unsafe {
        libc::lsetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_set_then_list() {
        let file = NamedTempFile::new().unwrap();
        if let Err(e) = set(file.path(), "user.objferry.test", b"v1") {
            // tmpfs without user xattrs, or a restricted sandbox.
            eprintln!("skipping xattr test: {}", e);
            return;
        }

        let attrs = list(file.path()).unwrap();
        assert!(attrs
            .iter()
            .any(|(name, value)| name == "user.objferry.test" && value == b"v1"));
    }
}
