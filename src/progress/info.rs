//! Point-in-time progress snapshot of one operation.
//!
//! [`ProgressInfo`] is the persisted shape of an operation's metrics. It is
//! written by the progress stores with camelCase field names and lowercase
//! status strings, and it knows how to derive percentage, success rate and a
//! completion estimate from its own counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Created but not started
    #[default]
    Pending,
    /// Actively processing records
    Running,
    /// Stopped by the owner, can be resumed
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped for good by the owner
    Cancelled,
}

impl OperationStatus {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed and Cancelled admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Running or Paused: the operation still owns live tracker state
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!(
                "Invalid status: {s}. Valid options: pending, running, paused, completed, failed, cancelled"
            )),
        }
    }
}

/// Progress snapshot of one named operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Stable handle for the operation, kept across restarts
    pub operation_id: String,
    /// Known record total, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    /// Records handled successfully
    #[serde(default)]
    pub processed_records: u64,
    /// Records that failed validation, transformation or decoding
    #[serde(default)]
    pub failed_records: u64,
    /// Index of the batch currently being handled
    #[serde(default)]
    pub current_batch: u64,
    /// Known batch total, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_batches: Option<u64>,
    /// Bytes moved through the sink or source
    #[serde(default)]
    pub bytes_processed: u64,
    /// Known byte total, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
    /// Set once when the operation first starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Refreshed on every mutation
    pub last_update: DateTime<Utc>,
    /// Throughput-based completion estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Lifecycle status
    #[serde(default)]
    pub status: OperationStatus,
    /// Set only when the operation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProgressInfo {
    /// Fresh `Pending` snapshot with zeroed counters
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            total_records: None,
            processed_records: 0,
            failed_records: 0,
            current_batch: 0,
            total_batches: None,
            bytes_processed: 0,
            bytes_total: None,
            start_time: None,
            last_update: Utc::now(),
            estimated_completion: None,
            status: OperationStatus::Pending,
            error_message: None,
        }
    }

    /// Completion percentage in `[0, 100]`.
    ///
    /// Record counts take precedence over byte counts; without either total
    /// the percentage is 0. A zero total means there is nothing left to do.
    pub fn progress_percentage(&self) -> f64 {
        let pct = if let Some(total) = self.total_records {
            ratio_percent(self.processed_records, total)
        } else if let Some(total) = self.bytes_total {
            ratio_percent(self.bytes_processed, total)
        } else {
            0.0
        };
        pct.clamp(0.0, 100.0)
    }

    /// Share of handled records that succeeded, 100 when nothing was handled
    pub fn success_rate(&self) -> f64 {
        let handled = self.processed_records.saturating_add(self.failed_records);
        if handled == 0 {
            return 100.0;
        }
        self.processed_records as f64 / handled as f64 * 100.0
    }

    /// Time between `start_time` and `last_update`
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.start_time?;
        (self.last_update - start).to_std().ok()
    }

    /// Processed records per second; `None` until throughput is measurable
    pub fn throughput(&self) -> Option<f64> {
        if self.processed_records == 0 {
            return None;
        }
        let elapsed = self.elapsed()?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(self.processed_records as f64 / elapsed)
    }

    /// Records still expected, when the total is known
    pub fn remaining_records(&self) -> Option<u64> {
        self.total_records
            .map(|total| total.saturating_sub(self.processed_records))
    }

    /// Recompute `estimated_completion` from the current throughput
    pub fn refresh_estimate(&mut self) {
        self.estimated_completion = self.estimate_completion();
    }

    fn estimate_completion(&self) -> Option<DateTime<Utc>> {
        let remaining = self.remaining_records()?;
        let rate = self.throughput()?;
        let millis = (remaining as f64 / rate * 1000.0).round();
        if !millis.is_finite() {
            return None;
        }
        let delta = chrono::Duration::try_milliseconds(millis as i64)?;
        self.last_update.checked_add_signed(delta)
    }

    /// Apply deltas and overwrites carried by `update`
    pub fn apply(&mut self, update: &ProgressUpdate) {
        if let Some(processed) = update.processed {
            self.processed_records = self.processed_records.saturating_add(processed);
        }
        if let Some(failed) = update.failed {
            self.failed_records = self.failed_records.saturating_add(failed);
        }
        if let Some(bytes) = update.bytes {
            self.bytes_processed = self.bytes_processed.saturating_add(bytes);
        }
        if let Some(batch) = update.current_batch {
            self.current_batch = batch;
        }
    }

    /// Mark the snapshot as modified now
    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    /// One-line human summary used by the CLI and logs
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[{}] {} processed, {} failed",
            self.status, self.processed_records, self.failed_records
        )];

        if self.total_records.is_some() || self.bytes_total.is_some() {
            parts.push(format!("- {:.1}% complete", self.progress_percentage()));
        }

        if let Some(rate) = self.throughput() {
            parts.push(format!("at {rate:.0} records/sec"));
        }

        if let Some(eta) = self.estimated_completion {
            parts.push(format!("- ETA {}", eta.format("%Y-%m-%d %H:%M:%S UTC")));
        }

        if let Some(err) = &self.error_message {
            parts.push(format!("- error: {err}"));
        }

        parts.join(" ")
    }
}

fn ratio_percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    done as f64 / total as f64 * 100.0
}

/// Counter changes applied by [`crate::progress::ProgressTracker::update`].
///
/// `processed`, `failed` and `bytes` are added to the running totals;
/// `current_batch` replaces the stored batch index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Records handled successfully since the last update
    pub processed: Option<u64>,
    /// Records that failed since the last update
    pub failed: Option<u64>,
    /// Bytes moved since the last update
    pub bytes: Option<u64>,
    /// Index of the batch now being handled
    pub current_batch: Option<u64>,
}

impl ProgressUpdate {
    /// Empty update (only refreshes timestamps and the estimate)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add processed records
    pub fn processed(mut self, count: u64) -> Self {
        self.processed = Some(count);
        self
    }

    /// Add failed records
    pub fn failed(mut self, count: u64) -> Self {
        self.failed = Some(count);
        self
    }

    /// Add bytes
    pub fn bytes(mut self, count: u64) -> Self {
        self.bytes = Some(count);
        self
    }

    /// Overwrite the current batch index
    pub fn current_batch(mut self, batch: u64) -> Self {
        self.current_batch = Some(batch);
        self
    }
}
