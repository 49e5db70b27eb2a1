//! Storage root lock
//!
//! One coordinator process owns a storage root at a time. The owner holds an
//! advisory `flock` on `<root>/.ota_release.lock` for as long as the
//! coordinator is open. Acquisition waits up to a timeout and reports
//! contention.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("storage root {path} is locked by another process (waited {waited:?})")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive advisory lock on a storage root.
///
/// Released when dropped.
#[derive(Debug)]
pub struct StorageLock {
    lock_path: PathBuf,
    #[allow(dead_code)]
    lock_file: File,
}

impl StorageLock {
    /// Lock file name
    pub const LOCK_FILENAME: &'static str = ".ota_release.lock";

    /// Acquire the lock for `root`, creating the directory if needed.
    pub fn acquire(root: &Path, timeout: Duration) -> LockResult<Self> {
        fs::create_dir_all(root)?;

        let lock_path = root.join(Self::LOCK_FILENAME);
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);
        let mut warned = false;

        loop {
            match Self::try_acquire_exclusive(&lock_path) {
                Ok(file) => {
                    if warned {
                        info!(
                            path = %lock_path.display(),
                            waited_secs = start.elapsed().as_secs_f64(),
                            "storage lock acquired after contention"
                        );
                    }
                    return Ok(Self {
                        lock_path,
                        lock_file: file,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Duration::from_millis(500) {
                        warn!(path = %lock_path.display(), "storage lock contended, waiting");
                        warned = true;
                    }
                }
                Err(e) => return Err(LockError::Io(e)),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path,
                    waited: timeout,
                });
            }

            std::thread::sleep(poll_interval);
        }
    }

    #[cfg(unix)]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(lock_path)?;

        // SAFETY: fd is owned by `file`, which outlives the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

        if result == 0 {
            Ok(file)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            } else {
                Err(err)
            }
        }
    }

    #[cfg(not(unix))]
    fn try_acquire_exclusive(lock_path: &Path) -> io::Result<File> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the file is still open; unlocking an fd we own.
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_creates_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested").join("store");

        let lock = StorageLock::acquire(&root, Duration::from_secs(1)).unwrap();

        assert!(root.exists());
        assert_eq!(lock.path().file_name().unwrap(), StorageLock::LOCK_FILENAME);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = TempDir::new().unwrap();

        {
            let _lock = StorageLock::acquire(temp_dir.path(), Duration::from_secs(1)).unwrap();
        }

        let _again = StorageLock::acquire(temp_dir.path(), Duration::from_secs(1)).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_second_owner_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let _held = StorageLock::acquire(temp_dir.path(), Duration::from_secs(1)).unwrap();

        // flock locks belong to the open file description, so a second open
        // in the same process contends just like another process would.
        let err = StorageLock::acquire(temp_dir.path(), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }
}
