//! Filesystem-backed stores
//!
//! One pretty-printed JSON file per operation under a root directory that is
//! created on open. Writes go to a temp file in the same directory, are
//! fsynced and then atomically renamed over the target; an advisory lock per
//! key serializes writers against readers. Blocking filesystem work runs on
//! tokio's blocking pool so saves for different ids never wait on each other.
//!
//! Operation ids are escaped into file names (`[A-Za-z0-9_-]` kept, every
//! other byte written as `%XX`), so any id maps to exactly one file and
//! listing can recover the original id.

use super::lock;
use super::{CheckpointStore, PersistenceError, ProgressStore, StoreResult};
use crate::config::MAX_STATE_FILE_SIZE;
use crate::progress::{CheckpointData, ProgressInfo};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKEND: &str = "file";

/// File name suffix for progress records
pub const PROGRESS_SUFFIX: &str = ".progress.json";

/// File name suffix for checkpoint records
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// JSON-file store for one record type
#[derive(Debug)]
pub struct JsonFileStore<T> {
    root: PathBuf,
    suffix: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonFileStore<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            suffix: self.suffix,
            _record: PhantomData,
        }
    }
}

/// File-backed [`ProgressStore`]
pub type FileProgressStore = JsonFileStore<ProgressInfo>;

/// File-backed [`CheckpointStore`]
pub type FileCheckpointStore = JsonFileStore<CheckpointData>;

impl JsonFileStore<ProgressInfo> {
    /// Open (and create if needed) a progress store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_suffix(root, PROGRESS_SUFFIX)
    }
}

impl JsonFileStore<CheckpointData> {
    /// Open (and create if needed) a checkpoint store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_suffix(root, CHECKPOINT_SUFFIX)
    }
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn with_suffix(root: impl Into<PathBuf>, suffix: &'static str) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| PersistenceError::Io {
            backend: BACKEND,
            operation_id: "*".to_string(),
            message: format!("Failed to create store directory {}: {e}", root.display()),
        })?;

        debug!(root = %root.display(), suffix, "Opened file store");
        Ok(Self {
            root,
            suffix,
            _record: PhantomData,
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that holds the record for `operation_id`
    pub fn path_for(&self, operation_id: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", encode_key(operation_id), self.suffix))
    }

    async fn put(&self, operation_id: &str, value: &T) -> StoreResult<()> {
        // Serialize before touching the filesystem so a bad value never
        // truncates an existing record.
        let json = serde_json::to_vec_pretty(value).map_err(|e| PersistenceError::Serialization {
            backend: BACKEND,
            operation_id: operation_id.to_string(),
            message: e.to_string(),
        })?;

        let path = self.path_for(operation_id);
        let id = operation_id.to_string();
        run_blocking(operation_id, move || write_atomic(&path, &json, &id)).await
    }

    async fn get(&self, operation_id: &str) -> StoreResult<Option<T>> {
        let path = self.path_for(operation_id);
        let id = operation_id.to_string();
        let bytes = run_blocking(operation_id, move || read_locked(&path, &id)).await?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            warn!(operation_id, error = %e, "Failed to deserialize stored record");
            PersistenceError::Corrupt {
                backend: BACKEND,
                operation_id: operation_id.to_string(),
                message: e.to_string(),
            }
        })
    }

    async fn remove(&self, operation_id: &str) -> StoreResult<()> {
        let path = self.path_for(operation_id);
        let id = operation_id.to_string();
        run_blocking(operation_id, move || remove_locked(&path, &id)).await
    }

    async fn keys(&self) -> StoreResult<BTreeSet<String>> {
        let root = self.root.clone();
        let suffix = self.suffix;
        run_blocking("*", move || list_keys(&root, suffix)).await
    }
}

async fn run_blocking<R, F>(operation_id: &str, f: F) -> StoreResult<R>
where
    F: FnOnce() -> StoreResult<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PersistenceError::Io {
            backend: BACKEND,
            operation_id: operation_id.to_string(),
            message: format!("Blocking task failed: {e}"),
        })?
}

fn io_error(operation_id: &str, context: &str, err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Io {
        backend: BACKEND,
        operation_id: operation_id.to_string(),
        message: format!("{context}: {err}"),
    }
}

fn write_atomic(path: &Path, bytes: &[u8], operation_id: &str) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    lock::with_exclusive(path, BACKEND, operation_id, || {
        let mut temp_file = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| io_error(operation_id, "Failed to create temp file", e))?;

        temp_file
            .write_all(bytes)
            .map_err(|e| io_error(operation_id, "Failed to write temp file", e))?;
        temp_file
            .flush()
            .map_err(|e| io_error(operation_id, "Failed to flush temp file", e))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| io_error(operation_id, "Failed to sync temp file", e))?;

        temp_file
            .persist(path)
            .map_err(|e| io_error(operation_id, "Failed to persist temp file", e.error))?;

        // Make the rename itself durable
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        debug!(operation_id, path = %path.display(), bytes = bytes.len(), "Record saved");
        Ok(())
    })
}

fn read_locked(path: &Path, operation_id: &str) -> StoreResult<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }

    lock::with_shared(path, BACKEND, operation_id, || {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(operation_id, "Failed to stat record", e)),
        };

        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(PersistenceError::TooLarge {
                backend: BACKEND,
                operation_id: operation_id.to_string(),
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(operation_id, "Failed to read record", e)),
        }
    })
}

fn remove_locked(path: &Path, operation_id: &str) -> StoreResult<()> {
    if !path.exists() {
        return Ok(());
    }

    lock::with_exclusive(path, BACKEND, operation_id, || {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(operation_id, path = %path.display(), "Record deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(operation_id, "Failed to delete record", e)),
        }
    })
}

fn list_keys(root: &Path, suffix: &str) -> StoreResult<BTreeSet<String>> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| io_error("*", "Failed to read store directory", e))?;

    let mut keys = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error("*", "Failed to read directory entry", e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(encoded) = name.strip_suffix(suffix) else {
            continue;
        };
        match decode_key(encoded) {
            Some(id) => {
                keys.insert(id);
            }
            None => warn!(file = name, "Skipping file with undecodable name"),
        }
    }
    Ok(keys)
}

/// Escape an operation id into a file-name-safe string
pub fn encode_key(operation_id: &str) -> String {
    let mut out = String::with_capacity(operation_id.len());
    for byte in operation_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Reverse of [`encode_key`]; `None` for names this store did not produce
pub fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl ProgressStore for JsonFileStore<ProgressInfo> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn save(&self, operation_id: &str, progress: &ProgressInfo) -> StoreResult<()> {
        self.put(operation_id, progress).await
    }

    async fn load(&self, operation_id: &str) -> StoreResult<Option<ProgressInfo>> {
        self.get(operation_id).await
    }

    async fn delete(&self, operation_id: &str) -> StoreResult<()> {
        self.remove(operation_id).await
    }

    async fn list_operations(&self) -> StoreResult<BTreeSet<String>> {
        self.keys().await
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore<CheckpointData> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn save(&self, operation_id: &str, checkpoint: &CheckpointData) -> StoreResult<()> {
        self.put(operation_id, checkpoint).await
    }

    async fn load(&self, operation_id: &str) -> StoreResult<Option<CheckpointData>> {
        self.get(operation_id).await
    }

    async fn delete(&self, operation_id: &str) -> StoreResult<()> {
        self.remove(operation_id).await
    }
}
