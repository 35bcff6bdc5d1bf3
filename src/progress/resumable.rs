//! Scoped lifecycle around one unit of work.
//!
//! [`ResumableOperation::run`] loads any stored snapshot, resumes or starts
//! the tracker, hands it to the work future and settles the outcome:
//!
//! - `Ok` while still `Running` completes the operation
//! - `Err(e)` fails it with `e.to_string()` and returns `e` unchanged
//! - a panic fails it and then continues unwinding
//! - a start or resume whose save fails is failed before the error returns,
//!   so no `Running` tracker outlives a run whose work never started
//! - a completion whose save fails returns the persistence error; the tracker
//!   is `Completed` in memory while the store still holds `Running`, so the
//!   next run resumes the operation
//!
//! Work that pauses or cancels the tracker itself is left in that state.

use super::{OperationStatus, ProgressError, ProgressTracker};
use crate::panic_message;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

/// Runs work under a tracker and guarantees it ends terminal or paused
#[derive(Debug, Clone)]
pub struct ResumableOperation {
    tracker: ProgressTracker,
}

impl ResumableOperation {
    /// Wrap a Pending tracker
    pub fn new(tracker: ProgressTracker) -> Self {
        Self { tracker }
    }

    /// Tracker driven by this operation
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Enter the lifecycle, run `work`, settle the outcome.
    ///
    /// A stored terminal snapshot yields [`ProgressError::AlreadyFinished`]
    /// without running the work.
    pub async fn run<F, Fut, T, E>(self, work: F) -> Result<T, E>
    where
        F: FnOnce(ProgressTracker) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + From<ProgressError>,
    {
        if let Err(err) = self.enter().await {
            if self.tracker.status() == OperationStatus::Running {
                self.record_failure(err.to_string()).await;
            }
            return Err(err.into());
        }

        let outcome = AssertUnwindSafe(work(self.tracker.clone()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                if self.tracker.status() == OperationStatus::Running {
                    if let Err(err) = self.tracker.complete().await {
                        warn!(
                            operation_id = %self.tracker.operation_id(),
                            error = %err,
                            "Completion not persisted; operation will resume on next run"
                        );
                        return Err(err.into());
                    }
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(err.to_string()).await;
                Err(err)
            }
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                self.record_failure(message).await;
                std::panic::resume_unwind(payload)
            }
        }
    }

    async fn enter(&self) -> Result<(), ProgressError> {
        if !self.tracker.load().await? {
            return self.tracker.initialize().await;
        }

        let status = self.tracker.status();
        match status {
            OperationStatus::Pending => self.tracker.initialize().await,
            OperationStatus::Running | OperationStatus::Paused => {
                info!(
                    operation_id = %self.tracker.operation_id(),
                    status = %status,
                    processed = self.tracker.progress().processed_records,
                    "Resuming operation"
                );
                self.tracker.resume().await
            }
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled => {
                Err(ProgressError::AlreadyFinished {
                    operation_id: self.tracker.operation_id().to_string(),
                    status,
                })
            }
        }
    }

    async fn record_failure(&self, message: String) {
        let status = self.tracker.status();
        if status != OperationStatus::Running {
            warn!(
                operation_id = %self.tracker.operation_id(),
                status = %status,
                error = %message,
                "Work failed after leaving Running; status left unchanged"
            );
            return;
        }

        if let Err(e) = self.tracker.fail(message).await {
            warn!(
                operation_id = %self.tracker.operation_id(),
                error = %e,
                "Failed to record operation failure"
            );
        }
    }
}
