//! Operation progress: snapshots, checkpoints, the live tracker and the
//! scoped lifecycle wrapper.
//!
//! # Lifecycle
//!
//! ```text
//! Pending --initialize--> Running --pause--> Paused --resume--> Running
//! Running --complete--> Completed
//! Running --fail--> Failed
//! Running|Paused --cancel--> Cancelled
//! ```
//!
//! `Completed`, `Failed` and `Cancelled` are terminal. Every transition is
//! checked; an illegal one returns [`ProgressError::InvalidTransition`] and
//! leaves the tracker untouched.

pub mod checkpoint;
pub mod info;
pub mod maintenance;
pub mod resumable;
pub mod tracker;

pub use checkpoint::{CheckpointData, CheckpointState};
pub use info::{OperationStatus, ProgressInfo, ProgressUpdate};
pub use maintenance::{cleanup_old_operations, cleanup_old_operations_with_checkpoints};
pub use resumable::ResumableOperation;
pub use tracker::{ProgressCallback, ProgressTracker, TrackerConfig};

use crate::store::PersistenceError;

/// Tracker and lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// The requested transition is not allowed from the current status
    #[error("operation '{operation_id}' cannot {action} while {from}")]
    InvalidTransition {
        /// Operation id
        operation_id: String,
        /// Status at the time of the call
        from: OperationStatus,
        /// Attempted transition
        action: &'static str,
    },

    /// Update or checkpoint against a tracker that is not Running or Paused
    #[error("operation '{operation_id}' is not live (status: {status})")]
    NotLive {
        /// Operation id
        operation_id: String,
        /// Status at the time of the call
        status: OperationStatus,
    },

    /// A stored snapshot belongs to a different operation
    #[error("stored progress belongs to '{found}', expected '{expected}'")]
    OperationMismatch {
        /// Tracker's operation id
        expected: String,
        /// Id found in the stored record
        found: String,
    },

    /// A stored snapshot is already terminal and cannot be resumed
    #[error("operation '{operation_id}' already finished with status {status}")]
    AlreadyFinished {
        /// Operation id
        operation_id: String,
        /// Terminal status found in the store
        status: OperationStatus,
    },

    /// Store failure while persisting or loading
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
