//! Advisory file locking for the file-backed stores
//!
//! Each stored record gets a sibling `.lock` file. Writers hold it
//! exclusively for the temp-file-and-rename sequence, readers hold it shared
//! while reading, so a reader never observes a half-replaced record.
//!
//! Lock files outlive their records. Unlinking one would let a process still
//! waiting on the old inode and a process creating a fresh file both hold an
//! "exclusive" lock.

use super::{PersistenceError, StoreResult};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Path of the lock file guarding `path`
pub fn lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn open_lock_file(path: &Path, backend: &'static str, operation_id: &str) -> StoreResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Io {
            backend,
            operation_id: operation_id.to_string(),
            message: format!("Failed to create directory {}: {e}", parent.display()),
        })?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(path))
        .map_err(|e| PersistenceError::Lock {
            backend,
            operation_id: operation_id.to_string(),
            message: format!("Failed to open lock file: {e}"),
        })
}

/// Run `f` while holding the exclusive lock for `path`. Blocks until the
/// lock is available.
pub fn with_exclusive<R>(
    path: &Path,
    backend: &'static str,
    operation_id: &str,
    f: impl FnOnce() -> StoreResult<R>,
) -> StoreResult<R> {
    let file = open_lock_file(path, backend, operation_id)?;
    let mut lock = RwLock::new(file);
    let _guard = lock.write().map_err(|e| PersistenceError::Lock {
        backend,
        operation_id: operation_id.to_string(),
        message: format!("Failed to acquire write lock: {e}"),
    })?;

    f()
}

/// Run `f` while holding the shared lock for `path`
pub fn with_shared<R>(
    path: &Path,
    backend: &'static str,
    operation_id: &str,
    f: impl FnOnce() -> StoreResult<R>,
) -> StoreResult<R> {
    let file = open_lock_file(path, backend, operation_id)?;
    let lock = RwLock::new(file);
    let _guard = lock.read().map_err(|e| PersistenceError::Lock {
        backend,
        operation_id: operation_id.to_string(),
        message: format!("Failed to acquire read lock: {e}"),
    })?;

    f()
}
