//! Age-based cleanup of stored operations.
//!
//! Maintenance runs opportunistically (CLI `cleanup`, cron, startup hooks),
//! so it never returns an error. A store failure while listing yields 0.
//! Past the listing, a record that fails to load or delete is logged and
//! skipped while the scan goes on, and the result counts only the records
//! actually removed. Reporting 0 after some deletions already happened would
//! understate what changed in the store.

use crate::store::{CheckpointStore, ProgressStore};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

/// Delete progress records whose `last_update` is older than
/// `max_age_days`. Returns how many were deleted: 0 when the listing fails,
/// otherwise the successful deletions, skipping records whose load or delete
/// failed.
pub async fn cleanup_old_operations(store: &dyn ProgressStore, max_age_days: u32) -> usize {
    cleanup(store, None, max_age_days).await
}

/// Like [`cleanup_old_operations`], also deleting each removed operation's
/// checkpoint.
pub async fn cleanup_old_operations_with_checkpoints(
    progress: &dyn ProgressStore,
    checkpoints: &dyn CheckpointStore,
    max_age_days: u32,
) -> usize {
    cleanup(progress, Some(checkpoints), max_age_days).await
}

fn cutoff(max_age_days: u32) -> Option<DateTime<Utc>> {
    let age = Duration::try_days(i64::from(max_age_days))?;
    Utc::now().checked_sub_signed(age)
}

async fn cleanup(
    progress: &dyn ProgressStore,
    checkpoints: Option<&dyn CheckpointStore>,
    max_age_days: u32,
) -> usize {
    let Some(cutoff) = cutoff(max_age_days) else {
        warn!(max_age_days, "Cleanup cutoff out of range, nothing removed");
        return 0;
    };

    let ids = match progress.list_operations().await {
        Ok(ids) => ids,
        Err(e) => {
            error!(backend = progress.backend(), error = %e, "Cleanup failed to list operations");
            return 0;
        }
    };

    let mut removed = 0;
    for id in ids {
        let info = match progress.load(&id).await {
            Ok(Some(info)) => info,
            Ok(None) => continue,
            Err(e) => {
                warn!(operation_id = %id, error = %e, "Cleanup skipped unreadable operation");
                continue;
            }
        };

        if info.last_update >= cutoff {
            continue;
        }

        if let Err(e) = progress.delete(&id).await {
            warn!(operation_id = %id, error = %e, "Cleanup failed to delete progress");
            continue;
        }
        removed += 1;
        debug!(operation_id = %id, last_update = %info.last_update, "Removed stale operation");

        if let Some(checkpoints) = checkpoints {
            if let Err(e) = checkpoints.delete(&id).await {
                warn!(operation_id = %id, error = %e, "Cleanup failed to delete checkpoint");
            }
        }
    }

    info!(
        backend = progress.backend(),
        max_age_days,
        removed,
        "Cleanup finished"
    );
    removed
}
