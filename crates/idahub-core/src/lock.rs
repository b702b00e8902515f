//! Cross-process exclusive file lock.
//!
//! Advisory lock over a path using `fs2` (`flock` on Unix, `LockFileEx` on
//! Windows). The lock knows nothing about the resource it protects.
//!
//! ```rust,ignore
//! let lock = FileLock::new("/home/me/.ida-mcp/instances.json.lock");
//! let _guard = lock.acquire()?;
//! // exclusive access until `_guard` drops
//! ```

use crate::config::RegistryConfig;
use crate::{HubError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exclusive lock on a file path, acquired by polling a non-blocking try-lock.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

/// Held lock. Dropping the guard releases the lock.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create a lock over `path` with the default 5s timeout.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: RegistryConfig::LOCK_TIMEOUT,
            poll_interval: RegistryConfig::LOCK_POLL_INTERVAL,
        }
    }

    /// Override the acquisition deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the backoff between attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, creating the lock file and its parent directory if
    /// needed. Fails with `LockTimeout` once the deadline passes.
    pub fn acquire(&self) -> Result<FileLockGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| HubError::io_with_path(e, parent))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| HubError::io_with_path(e, &self.path))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {
                    debug!("Acquired lock {}", self.path.display());
                    return Ok(FileLockGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(e) => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Lock {} not acquired within {:?}: {}",
                            self.path.display(),
                            self.timeout,
                            e
                        );
                        return Err(HubError::LockTimeout {
                            path: self.path.clone(),
                            timeout: self.timeout,
                        });
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }
}

impl FileLockGuard {
    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released lock {}", self.path.display());
        }
    }
}
