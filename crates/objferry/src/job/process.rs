//! The OS process that drives a job.

use std::io;

pub fn current_pid() -> i64 {
    i64::from(std::process::id())
}

#[cfg(unix)]
fn as_pid(pid: i64) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Whether a process with this id exists.
#[cfg(unix)]
pub fn is_alive(pid: i64) -> bool {
    let Some(pid) = as_pid(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission and existence check only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends SIGTERM to the process.
#[cfg(unix)]
pub fn terminate(pid: i64) -> io::Result<()> {
    let pid = as_pid(pid)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid process id"))?;
    // SAFETY: plain kill(2) on a validated positive pid.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i64) -> bool {
    false
}

#[cfg(not(unix))]
pub fn terminate(_pid: i64) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signals are not supported on this platform",
    ))
}
