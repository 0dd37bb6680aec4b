//! Cross-process file primitives used by the port registry
//!
//! - **File locking**: advisory `flock` with exponential backoff retry
//! - **Atomic write**: temp file in the same directory, fsync, rename

pub mod atomic;
pub mod error;
pub mod lock;

pub use atomic::write_atomic;
pub use error::FileError;
pub use lock::{FileLock, acquire_lock};
