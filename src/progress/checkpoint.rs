//! Checkpoint snapshots for resumable operations
//!
//! A checkpoint pairs the progress snapshot taken at checkpoint time with an
//! opaque, caller-defined state map (for example the number of input records
//! already consumed). Checkpoints are written explicitly by the operation
//! owner and read back only when resuming.

use super::info::ProgressInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque resumption state
pub type CheckpointState = Map<String, Value>;

/// A progress snapshot plus caller-defined resumption state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointData {
    /// Operation the checkpoint belongs to
    pub operation_id: String,
    /// Progress at checkpoint time
    pub progress: ProgressInfo,
    /// Resumption state, defined by the codec or caller
    #[serde(default)]
    pub state: CheckpointState,
    /// When the checkpoint was taken
    pub timestamp: DateTime<Utc>,
}

impl CheckpointData {
    /// Create a checkpoint stamped with the current time
    pub fn new(progress: ProgressInfo, state: CheckpointState) -> Self {
        Self {
            operation_id: progress.operation_id.clone(),
            progress,
            state,
            timestamp: Utc::now(),
        }
    }

    /// Read an unsigned integer from the state map
    pub fn state_u64(&self, key: &str) -> Option<u64> {
        self.state.get(key).and_then(Value::as_u64)
    }

    /// Read a string from the state map
    pub fn state_str(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(Value::as_str)
    }
}
