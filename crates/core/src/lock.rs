//! Per-repository exclusive writer lock with stale-holder detection.
//!
//! The lock file's contents are `"<owner-pid>\n<ISO-8601 timestamp>"`, created with
//! `OpenOptions::create_new` for atomic exclusive-create semantics.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{OsgrepError, Result};

pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        release(&self.path);
    }
}

/// Probe whether `pid` is alive via a signal-0 send. `ESRCH` means the process is gone;
/// any other outcome (success, or `EPERM` meaning it exists but we don't own it) counts
/// as alive.
fn pid_is_alive(pid: i32) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error().raw_os_error();
    errno != Some(libc::ESRCH)
}

fn parse_holder(contents: &str) -> Option<(u32, String)> {
    let mut lines = contents.lines();
    let pid = lines.next()?.trim().parse::<u32>().ok()?;
    let timestamp = lines.next().unwrap_or("").trim().to_string();
    Some((pid, timestamp))
}

fn now_iso8601() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_epoch(secs)
}

/// Minimal epoch -> ISO-8601 UTC formatter, avoiding a `chrono` dependency for a single
/// timestamp string (the lock file's own consumer only needs it for human inspection;
/// `pid_is_alive` is the actual staleness check).
fn format_epoch(epoch: u64) -> String {
    let days = (epoch / 86400) as i64;
    let rem = epoch % 86400;
    let (y, m, d) = days_to_ymd(days);
    let hours = rem / 3600;
    let mins = (rem % 3600) / 60;
    let s = rem % 60;
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{mins:02}:{s:02}Z")
}

fn days_to_ymd(mut days: i64) -> (i64, i64, i64) {
    days += 719468;
    let era = if days >= 0 { days } else { days - 146096 } / 146097;
    let doe = days - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

fn lock_file_path(lock_dir: &Path) -> PathBuf {
    lock_dir.join("LOCK")
}

fn write_lock_file(lock_path: &Path) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).open(lock_path)?;
    let contents = format!("{}\n{}", std::process::id(), now_iso8601());
    f.write_all(contents.as_bytes())
}

/// Acquire the writer lock in `lock_dir`, creating the directory if needed.
///
/// On collision with a dead owner, the stale lock is removed and acquisition is retried
/// once. On collision with a live owner, fails with `LockHeld` carrying holder pid and
/// timestamp.
pub fn acquire(lock_dir: &Path) -> Result<LockGuard> {
    std::fs::create_dir_all(lock_dir)?;
    let lock_path = lock_file_path(lock_dir);

    match write_lock_file(&lock_path) {
        Ok(()) => return Ok(LockGuard { path: lock_path }),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(OsgrepError::LockIo(e)),
    }

    let contents = std::fs::read_to_string(&lock_path).unwrap_or_default();
    let (holder_pid, holder_since) = match parse_holder(&contents) {
        Some(parsed) => parsed,
        None => {
            // Unreadable/garbage lock file: treat as stale.
            std::fs::remove_file(&lock_path).ok();
            write_lock_file(&lock_path).map_err(OsgrepError::LockIo)?;
            return Ok(LockGuard { path: lock_path });
        }
    };

    if pid_is_alive(holder_pid as i32) {
        return Err(OsgrepError::LockHeld { holder_pid, holder_since });
    }

    // Stale: the owner is dead. Reclaim and retry once.
    std::fs::remove_file(&lock_path).ok();
    write_lock_file(&lock_path).map_err(OsgrepError::LockIo)?;
    Ok(LockGuard { path: lock_path })
}

/// Remove the lock file, tolerating `ENOENT`.
fn release(lock_path: &Path) {
    match std::fs::remove_file(lock_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %lock_path.display(), error = %e, "failed to release lock"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _guard = acquire(dir.path()).unwrap();
            assert!(lock_file_path(dir.path()).exists());
        }
        assert!(!lock_file_path(dir.path()).exists());
    }

    #[test]
    fn live_holder_produces_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = lock_file_path(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        // Our own pid is always alive.
        write_lock_file(&lock_path).unwrap();

        let err = acquire(dir.path()).unwrap_err();
        match err {
            OsgrepError::LockHeld { holder_pid, .. } => {
                assert_eq!(holder_pid, std::process::id())
            }
            other => panic!("expected LockHeld, got {other:?}"),
        }
    }

    #[test]
    fn dead_holder_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = lock_file_path(dir.path());
        std::fs::create_dir_all(dir.path()).unwrap();
        // PID 1 on most systems is alive (init); use an implausibly large pid instead,
        // which on Linux (pid_max default 4194304) reliably does not correspond to a
        // live process in a test sandbox.
        let contents = format!("{}\n{}", 999_999_999u32, now_iso8601());
        std::fs::write(&lock_path, contents).unwrap();

        let guard = acquire(dir.path());
        assert!(guard.is_ok());
    }
}
