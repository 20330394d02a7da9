//! Host-wide serialization of client runs
//!
//! The RACF server cannot interleave dialogues for the same guest, so every
//! client process takes an exclusive advisory lock on a well-known file before
//! connecting and holds it until the connection is closed.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

/// Default lock file shared by all client processes on the host
pub const DEFAULT_LOCK_PATH: &str = "/var/lock/iucv_session.lock";

/// Errors taking the process lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot open lock file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Held exclusive lock. Released when dropped.
#[derive(Debug)]
pub struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Block until the lock at `path` is ours
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Open {
                path: path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| LockError::Lock {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Process lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "Process lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whether a fresh open file description could lock `path` right now
    fn is_free(path: &Path) -> bool {
        let file = File::open(path).unwrap();
        match file.try_lock_exclusive() {
            Ok(()) => {
                FileExt::unlock(&file).unwrap();
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
            Err(e) => panic!("unexpected lock error: {e}"),
        }
    }

    #[test]
    fn lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.lock");

        let held = ProcessLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(!is_free(&path));

        drop(held);
        assert!(is_free(&path));
        let again = ProcessLock::acquire(&path).unwrap();
        assert!(!is_free(&path));
        drop(again);
    }

    #[test]
    fn missing_directory_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/session.lock");
        let err = ProcessLock::acquire(&path).unwrap_err();
        assert!(matches!(err, LockError::Open { .. }));
        assert!(err.to_string().contains("session.lock"));
    }
}
