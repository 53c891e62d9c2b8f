//! Advisory file locking with a bounded wait.
//!
//! Every shared file (the state document, review queues) is guarded by a
//! sibling `<name>.lock` file. Acquisition polls `try_lock_exclusive` until a
//! deadline; callers that cannot get the lock in time continue without it.
//! A lost update is preferred over an interactive command that hangs.

use crate::error::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive lock held until drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try to take the lock at `path` within `timeout`.
    ///
    /// Returns `Ok(None)` when the deadline passes while another process
    /// still holds the lock.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Option<FileLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    return Ok(Some(FileLock {
                        file,
                        path: path.to_path_buf(),
                    }))
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Run `f` while holding the lock at `lock_path`, degrading to unlocked
/// execution when the lock cannot be acquired in time.
pub fn with_lock<T>(
    lock_path: &Path,
    timeout: Duration,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let guard = match FileLock::acquire(lock_path, timeout) {
        Ok(Some(guard)) => Some(guard),
        Ok(None) => {
            tracing::warn!(
                lock = %lock_path.display(),
                timeout_ms = timeout.as_millis() as u64,
                "lock wait timed out; continuing without lock"
            );
            None
        }
        Err(e) => {
            tracing::warn!(lock = %lock_path.display(), error = %e, "lock unavailable; continuing without lock");
            None
        }
    };
    let result = f();
    drop(guard);
    result
}
