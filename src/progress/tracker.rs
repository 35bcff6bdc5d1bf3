//! Live progress tracking for one operation.
//!
//! A [`ProgressTracker`] is the authoritative, mutable view of an operation:
//! it enforces the lifecycle state machine, applies counter updates, keeps
//! the completion estimate fresh, fans snapshots out to callbacks and
//! persists itself through the configured stores.
//!
//! Trackers are cheap handles; clones share one state. Stream drivers report
//! through a clone while the owner drives transitions through another.
//!
//! While the operation is `Running`, a background task saves the snapshot
//! every [`TrackerConfig::auto_save_interval`]. The task only holds a weak
//! reference and is aborted on pause and on every terminal transition.
//!
//! Every store write of the snapshot holds one save gate, and the loop checks
//! for `Running` while holding it. A transition's save therefore always lands
//! after any background write already in flight, never before it.

use super::{
    CheckpointData, CheckpointState, OperationStatus, ProgressError, ProgressInfo, ProgressUpdate,
};
use crate::config::DEFAULT_AUTO_SAVE_INTERVAL;
use crate::metrics::{self, StoreSaveTimer};
use crate::panic_message;
use crate::store::{CheckpointStore, PersistenceError, ProgressStore};
use chrono::Utc;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Observer invoked with a snapshot after every update and transition
pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Tracker behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Run the background save loop while Running
    pub auto_save: bool,
    /// Period of the background save loop
    pub auto_save_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
        }
    }
}

struct TrackerState {
    info: ProgressInfo,
    /// Set when the snapshot came from a store; allows resuming a `Running`
    /// snapshot left behind by a crashed process.
    adopted: bool,
}

struct Inner {
    operation_id: String,
    state: RwLock<TrackerState>,
    callbacks: RwLock<Vec<ProgressCallback>>,
    auto_save: Mutex<Option<JoinHandle<()>>>,
    save_gate: tokio::sync::Mutex<()>,
    progress_store: Arc<dyn ProgressStore>,
    checkpoint_store: Arc<dyn CheckpointStore>,
    config: TrackerConfig,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let handle = self
            .auto_save
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Shared handle to one operation's progress
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("operation_id", &self.inner.operation_id)
            .field("status", &self.status())
            .field("progress_backend", &self.inner.progress_store.backend())
            .field("checkpoint_backend", &self.inner.checkpoint_store.backend())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ProgressTracker {
    /// Pending tracker with the default configuration
    pub fn new(
        operation_id: impl Into<String>,
        progress_store: Arc<dyn ProgressStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::with_config(
            operation_id,
            progress_store,
            checkpoint_store,
            TrackerConfig::default(),
        )
    }

    /// Pending tracker with an explicit configuration
    pub fn with_config(
        operation_id: impl Into<String>,
        progress_store: Arc<dyn ProgressStore>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        config: TrackerConfig,
    ) -> Self {
        let operation_id = operation_id.into();
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(TrackerState {
                    info: ProgressInfo::new(operation_id.clone()),
                    adopted: false,
                }),
                operation_id,
                callbacks: RwLock::new(Vec::new()),
                auto_save: Mutex::new(None),
                save_gate: tokio::sync::Mutex::new(()),
                progress_store,
                checkpoint_store,
                config,
            }),
        }
    }

    /// Set the expected record total
    pub fn with_total_records(self, total: u64) -> Self {
        self.write_state(|state| state.info.total_records = Some(total));
        self
    }

    /// Set the expected batch total
    pub fn with_total_batches(self, total: u64) -> Self {
        self.write_state(|state| state.info.total_batches = Some(total));
        self
    }

    /// Set the expected byte total
    pub fn with_total_bytes(self, total: u64) -> Self {
        self.write_state(|state| state.info.bytes_total = Some(total));
        self
    }

    /// Operation this tracker owns
    pub fn operation_id(&self) -> &str {
        &self.inner.operation_id
    }

    /// Active configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Copy of the current snapshot
    pub fn progress(&self) -> ProgressInfo {
        self.read_state(|state| state.info.clone())
    }

    /// Current lifecycle status
    pub fn status(&self) -> OperationStatus {
        self.read_state(|state| state.info.status)
    }

    /// Register an observer; registration is additive
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// `Pending -> Running`; stamps `start_time` if unset
    pub async fn initialize(&self) -> Result<(), ProgressError> {
        let snapshot = self.transition(
            "initialize",
            |from, _| from == OperationStatus::Pending,
            OperationStatus::Running,
            |info| {
                let now = Utc::now();
                info.last_update = now;
                info.start_time.get_or_insert(now);
                info.refresh_estimate();
            },
        )?;
        self.start_auto_save();
        self.finish_transition(&snapshot).await
    }

    /// `Running -> Paused`; stops the background save loop
    pub async fn pause(&self) -> Result<(), ProgressError> {
        let snapshot = self.transition(
            "pause",
            |from, _| from == OperationStatus::Running,
            OperationStatus::Paused,
            |_| {},
        )?;
        self.stop_auto_save();
        self.finish_transition(&snapshot).await
    }

    /// `Paused -> Running`, or adopt a `Running` snapshot loaded from a store
    pub async fn resume(&self) -> Result<(), ProgressError> {
        let snapshot = self.transition(
            "resume",
            |from, adopted| {
                from == OperationStatus::Paused || (from == OperationStatus::Running && adopted)
            },
            OperationStatus::Running,
            |info| {
                info.touch();
                info.refresh_estimate();
            },
        )?;
        self.start_auto_save();
        self.finish_transition(&snapshot).await
    }

    /// `Running -> Completed`
    pub async fn complete(&self) -> Result<(), ProgressError> {
        let snapshot = self.transition(
            "complete",
            |from, _| from == OperationStatus::Running,
            OperationStatus::Completed,
            |info| info.touch(),
        )?;
        self.stop_auto_save();
        self.finish_transition(&snapshot).await
    }

    /// `Running -> Failed` with `message` recorded as the error
    pub async fn fail(&self, message: impl Into<String>) -> Result<(), ProgressError> {
        let message = message.into();
        let snapshot = self.transition(
            "fail",
            |from, _| from == OperationStatus::Running,
            OperationStatus::Failed,
            |info| {
                info.touch();
                info.error_message = Some(message);
            },
        )?;
        self.stop_auto_save();
        self.finish_transition(&snapshot).await
    }

    /// `Running|Paused -> Cancelled`
    pub async fn cancel(&self) -> Result<(), ProgressError> {
        let snapshot = self.transition(
            "cancel",
            |from, _| from.is_live(),
            OperationStatus::Cancelled,
            |_| {},
        )?;
        self.stop_auto_save();
        self.finish_transition(&snapshot).await
    }

    /// Apply counter deltas, refresh the estimate and notify callbacks.
    ///
    /// Only a live (Running or Paused) tracker accepts updates.
    pub fn update(&self, update: ProgressUpdate) -> Result<(), ProgressError> {
        let snapshot = self.write_state(|state| {
            if !state.info.status.is_live() {
                return Err(ProgressError::NotLive {
                    operation_id: self.inner.operation_id.clone(),
                    status: state.info.status,
                });
            }
            state.info.apply(&update);
            state.info.touch();
            state.info.refresh_estimate();
            Ok(state.info.clone())
        })?;

        metrics::record_progress(
            update.processed.unwrap_or(0),
            update.failed.unwrap_or(0),
            update.bytes.unwrap_or(0),
        );
        debug!(
            operation_id = %self.inner.operation_id,
            processed = snapshot.processed_records,
            failed = snapshot.failed_records,
            bytes = snapshot.bytes_processed,
            batch = snapshot.current_batch,
            "Progress updated"
        );
        self.notify(&snapshot);
        Ok(())
    }

    /// Persist the current snapshot
    pub async fn save(&self) -> Result<(), ProgressError> {
        let _gate = self.inner.save_gate.lock().await;
        self.write_snapshot(&self.progress()).await
    }

    async fn write_snapshot(&self, snapshot: &ProgressInfo) -> Result<(), ProgressError> {
        let store = &self.inner.progress_store;
        let timer = StoreSaveTimer::start(store.backend());

        store
            .save(&self.inner.operation_id, snapshot)
            .await
            .map_err(|e| self.store_failure("save", e))?;
        timer.finish();

        debug!(
            operation_id = %self.inner.operation_id,
            status = %snapshot.status,
            backend = store.backend(),
            "Progress saved"
        );
        Ok(())
    }

    /// Replace the in-memory snapshot with the stored one.
    ///
    /// Returns `false` when nothing was stored for this operation.
    pub async fn load(&self) -> Result<bool, ProgressError> {
        let store = &self.inner.progress_store;
        let loaded = store
            .load(&self.inner.operation_id)
            .await
            .map_err(|e| self.store_failure("load", e))?;

        let Some(info) = loaded else {
            debug!(operation_id = %self.inner.operation_id, "No stored progress");
            return Ok(false);
        };

        if info.operation_id != self.inner.operation_id {
            return Err(ProgressError::OperationMismatch {
                expected: self.inner.operation_id.clone(),
                found: info.operation_id,
            });
        }

        info!(
            operation_id = %self.inner.operation_id,
            status = %info.status,
            processed = info.processed_records,
            backend = store.backend(),
            "Loaded stored progress"
        );
        self.adopt(info);
        Ok(true)
    }

    /// Save a checkpoint pairing the current snapshot with `state`
    pub async fn save_checkpoint(&self, state: CheckpointState) -> Result<(), ProgressError> {
        let snapshot = self.progress();
        if !snapshot.status.is_live() {
            return Err(ProgressError::NotLive {
                operation_id: self.inner.operation_id.clone(),
                status: snapshot.status,
            });
        }

        let checkpoint = CheckpointData::new(snapshot, state);
        self.inner
            .checkpoint_store
            .save(&self.inner.operation_id, &checkpoint)
            .await
            .map_err(|e| self.store_failure("save_checkpoint", e))?;

        debug!(
            operation_id = %self.inner.operation_id,
            processed = checkpoint.progress.processed_records,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Read the stored checkpoint without applying it
    pub async fn load_checkpoint(&self) -> Result<Option<CheckpointData>, ProgressError> {
        self.inner
            .checkpoint_store
            .load(&self.inner.operation_id)
            .await
            .map_err(|e| self.store_failure("load_checkpoint", e))
    }

    /// Load the stored checkpoint and restore progress from it.
    ///
    /// Returns whether a checkpoint was found and applied.
    pub async fn load_latest_checkpoint(&self) -> Result<bool, ProgressError> {
        match self.load_checkpoint().await? {
            Some(checkpoint) => Ok(self.restore_from_checkpoint(&checkpoint)),
            None => Ok(false),
        }
    }

    /// Adopt the progress embedded in `checkpoint`.
    ///
    /// A checkpoint for another operation is rejected with `false`.
    pub fn restore_from_checkpoint(&self, checkpoint: &CheckpointData) -> bool {
        if checkpoint.operation_id != self.inner.operation_id
            || checkpoint.progress.operation_id != self.inner.operation_id
        {
            warn!(
                operation_id = %self.inner.operation_id,
                checkpoint_operation_id = %checkpoint.operation_id,
                "Rejected checkpoint for a different operation"
            );
            return false;
        }

        info!(
            operation_id = %self.inner.operation_id,
            processed = checkpoint.progress.processed_records,
            checkpoint_time = %checkpoint.timestamp,
            "Restored progress from checkpoint"
        );
        self.adopt(checkpoint.progress.clone());
        true
    }

    /// Delete the stored progress and checkpoint for this operation.
    ///
    /// Idempotent; both deletes are attempted even if the first fails.
    pub async fn cleanup(&self) -> Result<(), ProgressError> {
        self.stop_auto_save();

        let id = &self.inner.operation_id;
        let progress = self.inner.progress_store.delete(id).await;
        let checkpoint = self.inner.checkpoint_store.delete(id).await;

        progress.map_err(|e| self.store_failure("delete", e))?;
        checkpoint.map_err(|e| self.store_failure("delete_checkpoint", e))?;

        info!(operation_id = %id, "Stored progress and checkpoint removed");
        Ok(())
    }

    fn read_state<R>(&self, f: impl FnOnce(&TrackerState) -> R) -> R {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_state<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut guard = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn adopt(&self, info: ProgressInfo) {
        self.write_state(|state| {
            state.info = info;
            state.adopted = true;
        });
    }

    fn transition(
        &self,
        action: &'static str,
        allowed: impl FnOnce(OperationStatus, bool) -> bool,
        to: OperationStatus,
        mutate: impl FnOnce(&mut ProgressInfo),
    ) -> Result<ProgressInfo, ProgressError> {
        self.write_state(|state| {
            let from = state.info.status;
            if !allowed(from, state.adopted) {
                return Err(ProgressError::InvalidTransition {
                    operation_id: self.inner.operation_id.clone(),
                    from,
                    action,
                });
            }
            state.info.status = to;
            state.adopted = false;
            mutate(&mut state.info);

            info!(
                operation_id = %self.inner.operation_id,
                from = %from,
                status = %to,
                "Operation {action}"
            );
            Ok(state.info.clone())
        })
    }

    async fn finish_transition(&self, snapshot: &ProgressInfo) -> Result<(), ProgressError> {
        metrics::record_transition(snapshot.status);
        self.notify(snapshot);
        self.save().await
    }

    fn notify(&self, snapshot: &ProgressInfo) {
        let callbacks: Vec<ProgressCallback> = self
            .inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                error!(
                    operation_id = %self.inner.operation_id,
                    callback = index,
                    panic = %panic_message(payload.as_ref()),
                    "Progress callback panicked"
                );
            }
        }
    }

    fn store_failure(&self, op: &'static str, err: PersistenceError) -> ProgressError {
        metrics::record_store_error(err.backend(), op);
        warn!(
            operation_id = %self.inner.operation_id,
            backend = err.backend(),
            op,
            error = %err,
            "Store call failed"
        );
        ProgressError::Persistence(err)
    }

    fn start_auto_save(&self) {
        if !self.inner.config.auto_save {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.auto_save_interval;
        let handle = tokio::spawn(auto_save_loop(weak, interval));

        let previous = self
            .inner
            .auto_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_auto_save(&self) {
        let handle = self
            .inner
            .auto_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!(operation_id = %self.inner.operation_id, "Auto-save stopped");
        }
    }

    #[cfg(test)]
    fn auto_save_active(&self) -> bool {
        self.inner
            .auto_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn auto_save_loop(weak: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(inner) = weak.upgrade() else {
            break;
        };
        let tracker = ProgressTracker { inner };

        // Detached so aborting the loop cannot drop the gate mid-write
        let write = tokio::spawn(async move {
            let _gate = tracker.inner.save_gate.lock().await;
            if tracker.status() != OperationStatus::Running {
                return false;
            }
            if let Err(e) = tracker.write_snapshot(&tracker.progress()).await {
                warn!(
                    operation_id = %tracker.operation_id(),
                    error = %e,
                    "Auto-save failed"
                );
            }
            true
        });

        if !matches!(write.await, Ok(true)) {
            break;
        }
    }
}
