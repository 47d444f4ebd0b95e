//! Single-instance guard.
//!
//! The lock file is created atomically and removed when the guard is dropped.

use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {0} exists - another instance may be running")]
    Held(PathBuf),

    #[error("failed to create lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: impl AsRef<Path>) -> Result<LockFile, LockError> {
        let path = path.as_ref().to_path_buf();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(LockError::Held(path)),
            Err(source) => return Err(LockError::Io { path, source }),
        };

        // removed again by Drop if the write fails
        let lock = LockFile { path };
        file.write_all(b"running\n").map_err(|source| LockError::Io {
            path: lock.path.clone(),
            source,
        })?;
        debug!("acquired {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("released {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tempreg.lck");

        let lock = LockFile::acquire(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "running\n");
        assert!(matches!(LockFile::acquire(&path), Err(LockError::Held(_))));

        drop(lock);
        assert!(!path.exists());
        let _again = LockFile::acquire(&path).unwrap();
    }

    #[test]
    fn test_drop_after_external_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tempreg.lck");

        let lock = LockFile::acquire(&path).unwrap();
        fs::remove_file(lock.path()).unwrap();
        drop(lock);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("tempreg.lck");
        assert!(matches!(LockFile::acquire(&path), Err(LockError::Io { .. })));
    }
}
