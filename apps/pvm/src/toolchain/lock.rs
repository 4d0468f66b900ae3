//! Advisory inter-process locks on store resources.
//!
//! Two `pvm` processes may run at once (two terminals installing the same
//! version, or switching versions concurrently). Each guarded resource has a
//! lock file under `<root>/locks/`; the OS releases the lock when the holder
//! exits, even abnormally, so a crashed process never leaves the store stuck.
//!
//! Locking uses `std::fs::File::lock` and `File::try_lock` (flock on Unix,
//! `LockFileEx` on Windows) rather than the `fs4` or `fslock` crates.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{PvmError, PvmResult};

/// Interval between attempts while another process holds the lock.
const POLL_INTERVAL_MS: u64 = 200;

/// An exclusive lock, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> PvmResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PvmError::io(format!("failed to create {}", parent.display()), e))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| PvmError::io(format!("failed to open lock {}", path.display()), e))
}

impl StoreLock {
    /// Blocks the current thread until the lock is acquired.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error if the lock file cannot be opened or locked.
    pub fn acquire(path: &Path) -> PvmResult<Self> {
        let file = open_lock_file(path)?;
        file.lock()
            .map_err(|e| PvmError::io(format!("failed to lock {}", path.display()), e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Waits for the lock without blocking the async runtime.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error if the lock file cannot be opened or locked.
    pub async fn acquire_async(path: &Path) -> PvmResult<Self> {
        let file = open_lock_file(path)?;
        let mut announced = false;
        loop {
            match file.try_lock() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(TryLockError::WouldBlock) => {
                    if !announced {
                        tracing::info!(lock = %path.display(), "waiting for another pvm process");
                        announced = true;
                    }
                    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                }
                Err(TryLockError::Error(e)) => {
                    return Err(PvmError::io(format!("failed to lock {}", path.display()), e));
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        tracing::debug!(lock = %self.path.display(), "released");
    }
}
