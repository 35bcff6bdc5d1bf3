//! Durable persistence for progress and checkpoint records
//!
//! Both stores are keyed by operation id and share one contract:
//!
//! - `save` overwrites (last writer wins, no optimistic concurrency)
//! - `load` returns `Ok(None)` for an unknown id; errors are reserved for
//!   genuine backend failures
//! - `delete` is idempotent
//!
//! Backends:
//!
//! - [`file`] - one JSON file per operation under a root directory
//! - [`remote`] - Redis key-value store over pooled connections
//! - [`memory`] - in-process map, for tests and throwaway runs
//!
//! Every backend surfaces failures as [`PersistenceError`] so callers never
//! need backend-specific handling.

use crate::progress::{CheckpointData, OperationStatus, ProgressInfo};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::warn;

pub mod file;
pub mod lock;
pub mod memory;
pub mod remote;

pub use file::{FileCheckpointStore, FileProgressStore, JsonFileStore};
pub use memory::{MemoryCheckpointStore, MemoryProgressStore, MemoryStore};
pub use remote::{RedisCheckpointStore, RedisConfig, RedisProgressStore, RedisStore};

/// Result type for store operations
pub type StoreResult<T> = Result<T, PersistenceError>;

/// Store-level failure on save, load, delete or listing
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Filesystem or socket I/O failed
    #[error("{backend} store I/O error for '{operation_id}': {message}")]
    Io {
        /// Backend name
        backend: &'static str,
        /// Operation the call was about
        operation_id: String,
        /// Underlying error
        message: String,
    },

    /// Value could not be serialized; nothing was written
    #[error("{backend} store cannot serialize '{operation_id}': {message}")]
    Serialization {
        /// Backend name
        backend: &'static str,
        /// Operation the call was about
        operation_id: String,
        /// Underlying error
        message: String,
    },

    /// Stored record exists but cannot be parsed
    #[error("{backend} store holds a corrupt record for '{operation_id}': {message}")]
    Corrupt {
        /// Backend name
        backend: &'static str,
        /// Operation the call was about
        operation_id: String,
        /// Underlying error
        message: String,
    },

    /// Stored record exceeds the size guard
    #[error("{backend} store record for '{operation_id}' too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Backend name
        backend: &'static str,
        /// Operation the call was about
        operation_id: String,
        /// Actual size
        size: u64,
        /// Allowed size
        max: u64,
    },

    /// Advisory lock could not be taken
    #[error("{backend} store lock error for '{operation_id}': {message}")]
    Lock {
        /// Backend name
        backend: &'static str,
        /// Operation the call was about
        operation_id: String,
        /// Underlying error
        message: String,
    },

    /// Remote service or connection failure
    #[error("{backend} store remote error for '{operation_id}': {message}")]
    Remote {
        /// Backend name
        backend: &'static str,
        /// Operation the call was about (`*` for listing)
        operation_id: String,
        /// Underlying error
        message: String,
    },
}

impl PersistenceError {
    /// Name of the backend that failed
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Io { backend, .. }
            | Self::Serialization { backend, .. }
            | Self::Corrupt { backend, .. }
            | Self::TooLarge { backend, .. }
            | Self::Lock { backend, .. }
            | Self::Remote { backend, .. } => backend,
        }
    }

    /// Operation id the failing call was about
    pub fn operation_id(&self) -> &str {
        match self {
            Self::Io { operation_id, .. }
            | Self::Serialization { operation_id, .. }
            | Self::Corrupt { operation_id, .. }
            | Self::TooLarge { operation_id, .. }
            | Self::Lock { operation_id, .. }
            | Self::Remote { operation_id, .. } => operation_id,
        }
    }
}

/// Durable storage of [`ProgressInfo`] keyed by operation id
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Backend name used in logs, metrics and errors
    fn backend(&self) -> &'static str;

    /// Persist the snapshot, replacing any previous one
    async fn save(&self, operation_id: &str, progress: &ProgressInfo) -> StoreResult<()>;

    /// Read the snapshot; `None` when the id is unknown
    async fn load(&self, operation_id: &str) -> StoreResult<Option<ProgressInfo>>;

    /// Remove the snapshot; deleting an unknown id is not an error
    async fn delete(&self, operation_id: &str) -> StoreResult<()>;

    /// Every operation id with a stored snapshot
    async fn list_operations(&self) -> StoreResult<BTreeSet<String>>;

    /// Operation ids, optionally restricted to one status.
    ///
    /// Filtering loads each snapshot; ids that disappear between listing and
    /// loading are skipped.
    async fn list_operations_with_status(
        &self,
        status: Option<OperationStatus>,
    ) -> StoreResult<BTreeSet<String>> {
        let ids = self.list_operations().await?;
        let Some(wanted) = status else {
            return Ok(ids);
        };

        let mut matching = BTreeSet::new();
        for id in ids {
            match self.load(&id).await? {
                Some(info) if info.status == wanted => {
                    matching.insert(id);
                }
                Some(_) => {}
                None => warn!(operation_id = %id, "Operation vanished while filtering"),
            }
        }
        Ok(matching)
    }
}

/// Durable storage of [`CheckpointData`] keyed by operation id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Backend name used in logs, metrics and errors
    fn backend(&self) -> &'static str;

    /// Persist the checkpoint, replacing any previous one
    async fn save(&self, operation_id: &str, checkpoint: &CheckpointData) -> StoreResult<()>;

    /// Read the checkpoint; `None` when the id is unknown
    async fn load(&self, operation_id: &str) -> StoreResult<Option<CheckpointData>>;

    /// Remove the checkpoint; deleting an unknown id is not an error
    async fn delete(&self, operation_id: &str) -> StoreResult<()>;
}
