//! Atomic whole-file replacement

use crate::io::error::FileError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path_for(path: &Path) -> Result<PathBuf, FileError> {
    let parent = path.parent().ok_or_else(|| FileError::InvalidPath {
        path: path.to_path_buf(),
    })?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FileError::InvalidPath {
            path: path.to_path_buf(),
        })?;
    Ok(parent.join(format!(".{name}.{}.tmp", std::process::id())))
}

/// Replace `path` with `contents` so readers see either the old or the new
/// file, never a partial one.
///
/// The temp file lives next to the target so the final `rename` stays on one
/// filesystem. Parent directories are created as needed.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), FileError> {
    let tmp = temp_path_for(path)?;
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent).map_err(|e| FileError::io(parent, e))?;
    }

    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(FileError::io(&tmp, e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        FileError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/instances.json");

        write_atomic(&target, b"[1]").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "[1]");

        write_atomic(&target, b"[1,2]").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "[1,2]");
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("instances.json");
        write_atomic(&target, b"{}").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["instances.json".to_string()]);
    }

    #[test]
    fn test_write_atomic_rejects_root_path() {
        let result = write_atomic(Path::new("/"), b"x");
        assert!(matches!(result, Err(FileError::InvalidPath { .. })));
    }
}
