//! Error types for locked and atomic file operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by [`acquire_lock`](super::acquire_lock) and
/// [`write_atomic`](super::write_atomic)
#[derive(Error, Debug)]
pub enum FileError {
    /// Failed to acquire file lock after multiple retries
    #[error("Failed to acquire lock on {path} after {retries} retries")]
    LockTimeout { path: PathBuf, retries: u32 },

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Target path has no parent directory or file name
    #[error("Invalid target path: {path}")]
    InvalidPath { path: PathBuf },
}

impl FileError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
