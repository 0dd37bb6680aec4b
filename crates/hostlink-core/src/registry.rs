//! Shared port registry
//!
//! A small JSON file (`<home>/.hostlink/instances.json`) in which every
//! running control plane records which port it bound. Other instances read
//! it to avoid claiming a port that a live sibling already owns, and a
//! restarting instance reads its own entry to prefer the port it just left.
//!
//! The registry is a hint: the real `bind` is authoritative. Entries whose
//! pid is no longer alive are ignored by readers and dropped by the next
//! writer. Each instance only ever writes or removes its own entry.
//!
//! Read-modify-write cycles run under an exclusive lock on `instances.lock`
//! and replace the file atomically.

use crate::io::{FileError, acquire_lock, lock::DEFAULT_LOCK_RETRIES, write_atomic};
use crate::process::is_pid_alive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const REGISTRY_FILE: &str = "instances.json";
const LOCK_FILE: &str = "instances.lock";

/// One instance's claim on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Stable identity of the host instance (normally its workspace path).
    pub instance_key: String,
    pub port: u16,
    pub registered_at: DateTime<Utc>,
    /// Owning process, used to detect stale entries.
    pub pid: u32,
}

impl RegistryEntry {
    /// `true` while the owning process exists.
    pub fn is_live(&self) -> bool {
        is_pid_alive(self.pid)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    instances: Vec<RegistryEntry>,
}

/// Errors raised by [`PortRegistry`].
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error("Registry file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize registry: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Handle on the registry directory. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct PortRegistry {
    dir: PathBuf,
}

impl PortRegistry {
    /// Registry rooted at `dir` (the file is `dir/instances.json`).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Registry under an explicit home directory.
    pub fn in_home(home: &Path) -> Self {
        Self::new(home.join(crate::home::REGISTRY_DIR))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Read every entry, live or stale. A missing file is an empty registry.
    pub fn load(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        Ok(read_file(&self.path())?.instances)
    }

    /// The entry recorded for `instance_key`, if any.
    pub fn entry_for(&self, instance_key: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self
            .load()?
            .into_iter()
            .find(|e| e.instance_key == instance_key))
    }

    /// Record that `instance_key` (owned by this process) now holds `port`.
    ///
    /// Replaces any previous entry for the same key and drops stale entries
    /// belonging to dead processes.
    pub fn register(&self, instance_key: &str, port: u16) -> Result<RegistryEntry, RegistryError> {
        let entry = RegistryEntry {
            instance_key: instance_key.to_string(),
            port,
            registered_at: Utc::now(),
            pid: std::process::id(),
        };
        let stored = entry.clone();
        self.update(move |entries| {
            entries.retain(|e| e.instance_key != stored.instance_key);
            entries.push(stored);
        })?;
        debug!(instance_key, port, "registered port in instance registry");
        Ok(entry)
    }

    /// Remove this process's entry for `instance_key`.
    ///
    /// Returns `true` if an entry was removed. An entry for the same key that
    /// belongs to another process is left alone.
    pub fn unregister(&self, instance_key: &str) -> Result<bool, RegistryError> {
        let own_pid = std::process::id();
        let mut removed = false;
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|e| !(e.instance_key == instance_key && e.pid == own_pid));
            removed = entries.len() != before;
        })?;
        Ok(removed)
    }

    /// Drop entries whose owning process is gone. Returns how many were removed.
    pub fn prune_stale(&self) -> Result<usize, RegistryError> {
        self.update(|_| {})
    }

    /// Locked read-modify-write. Stale entries are pruned before `mutate`
    /// runs; returns the number pruned.
    fn update<F>(&self, mutate: F) -> Result<usize, RegistryError>
    where
        F: FnOnce(&mut Vec<RegistryEntry>),
    {
        std::fs::create_dir_all(&self.dir).map_err(|e| FileError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let _lock = acquire_lock(&self.lock_path(), DEFAULT_LOCK_RETRIES)?;

        let path = self.path();
        let mut file = match read_file(&path) {
            Ok(file) => file,
            Err(RegistryError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "discarding corrupt instance registry");
                RegistryFile::default()
            }
            Err(e) => return Err(e),
        };

        let before = file.instances.len();
        file.instances.retain(RegistryEntry::is_live);
        let pruned = before - file.instances.len();
        if pruned > 0 {
            debug!(pruned, "dropped stale registry entries");
        }

        mutate(&mut file.instances);
        file.instances.sort_by_key(|e| e.port);

        let json = serde_json::to_vec_pretty(&file).map_err(RegistryError::Serialize)?;
        write_atomic(&path, &json)?;
        Ok(pruned)
    }
}

fn read_file(path: &Path) -> Result<RegistryFile, RegistryError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RegistryFile::default()),
        Err(e) => {
            return Err(FileError::Io {
                path: path.to_path_buf(),
                source: e,
            }
            .into());
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RegistryFile::default());
    }
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
