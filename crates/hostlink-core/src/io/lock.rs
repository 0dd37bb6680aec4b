//! File locking with backoff retry

use crate::io::error::FileError;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Default retry count used by registry writers (50ms .. 800ms backoff).
pub const DEFAULT_LOCK_RETRIES: u32 = 5;

/// File lock guard that releases on drop
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
    #[cfg(unix)]
    fd: i32,
    #[cfg(not(unix))]
    path: std::path::PathBuf,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: `fd` belongs to `self.file`, which is still open here.
            unsafe {
                libc::flock(self.fd, libc::LOCK_UN);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(50u64 * (1 << attempt))
}

/// Acquire an exclusive lock on `path` with exponential backoff
///
/// Attempt 0 does not wait; attempt `n` waits `50ms * 2^(n-1)` before
/// retrying, so `max_retries = 5` gives up after roughly 1.5 seconds.
///
/// # Errors
///
/// Returns [`FileError::LockTimeout`] if the lock is still held after all
/// retries, or [`FileError::Io`] if the lock file cannot be opened.
pub fn acquire_lock(path: &Path, max_retries: u32) -> Result<FileLock, FileError> {
    #[cfg(unix)]
    {
        unix_acquire_lock(path, max_retries)
    }

    #[cfg(not(unix))]
    {
        fallback_acquire_lock(path, max_retries)
    }
}

#[cfg(unix)]
fn unix_acquire_lock(path: &Path, max_retries: u32) -> Result<FileLock, FileError> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| FileError::io(path, e))?;

    let fd = file.as_raw_fd();

    for attempt in 0..=max_retries {
        // SAFETY: `fd` is a valid descriptor owned by `file`.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(FileLock { file, fd });
        }

        let err = std::io::Error::last_os_error();
        let would_block = err.raw_os_error() == Some(libc::EWOULDBLOCK)
            || err.raw_os_error() == Some(libc::EAGAIN);
        if !would_block {
            return Err(FileError::io(path, err));
        }

        if attempt < max_retries {
            std::thread::sleep(backoff(attempt));
        }
    }

    Err(FileError::LockTimeout {
        path: path.to_path_buf(),
        retries: max_retries,
    })
}

#[cfg(not(unix))]
fn fallback_acquire_lock(path: &Path, max_retries: u32) -> Result<FileLock, FileError> {
    use std::fs::OpenOptions;

    // No flock here: exclusive creation of the lock file stands in for it.
    for attempt in 0..=max_retries {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => {
                return Ok(FileLock {
                    file,
                    path: path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if attempt < max_retries {
                    std::thread::sleep(backoff(attempt));
                }
            }
            Err(e) => return Err(FileError::io(path, e)),
        }
    }

    Err(FileError::LockTimeout {
        path: path.to_path_buf(),
        retries: max_retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_backoff_doubles_from_fifty_ms() {
        assert_eq!(backoff(0), Duration::from_millis(50));
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_acquire_lock_creates_file_and_releases_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("instances.lock");

        {
            let _lock = acquire_lock(&lock_path, DEFAULT_LOCK_RETRIES).unwrap();
            assert!(lock_path.exists());
        }

        let _again = acquire_lock(&lock_path, 0).unwrap();
    }

    #[test]
    fn test_contended_lock_waits_for_holder() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = Arc::new(temp_dir.path().join("instances.lock"));
        let barrier = Arc::new(Barrier::new(2));

        let holder_path = Arc::clone(&lock_path);
        let holder_barrier = Arc::clone(&barrier);
        let holder = thread::spawn(move || {
            let _lock = acquire_lock(&holder_path, 5).unwrap();
            holder_barrier.wait();
            thread::sleep(Duration::from_millis(100));
        });

        barrier.wait();
        let waited = acquire_lock(&lock_path, 5);
        holder.join().unwrap();
        assert!(waited.is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_times_out_while_held() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("instances.lock");

        let _held = acquire_lock(&lock_path, 0).unwrap();
        let result = acquire_lock(&lock_path, 2);
        assert!(matches!(
            result,
            Err(FileError::LockTimeout { retries: 2, .. })
        ));
    }
}
