//! Resume across tracker instances (simulated process restarts) on the file backend

use resumable_transfer::config::RECORDS_CONSUMED_KEY;
use resumable_transfer::progress::{
    CheckpointState, OperationStatus, ProgressError, ProgressTracker, ProgressUpdate,
    ResumableOperation, TrackerConfig,
};
use resumable_transfer::store::{FileCheckpointStore, FileProgressStore};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn tracker_at(root: &Path, id: &str) -> ProgressTracker {
    ProgressTracker::with_config(
        id,
        Arc::new(FileProgressStore::open(root).unwrap()),
        Arc::new(FileCheckpointStore::open(root).unwrap()),
        TrackerConfig {
            auto_save: false,
            ..TrackerConfig::default()
        },
    )
}

fn consumed(count: u64) -> CheckpointState {
    let mut state = CheckpointState::new();
    state.insert(RECORDS_CONSUMED_KEY.into(), count.into());
    state
}

#[tokio::test]
async fn test_load_restores_mid_flight_progress() {
    let dir = TempDir::new().unwrap();

    let first = tracker_at(dir.path(), "job").with_total_records(1_000);
    first.initialize().await.unwrap();
    first.update(ProgressUpdate::new().processed(250)).unwrap();
    first.save().await.unwrap();
    drop(first);

    let second = tracker_at(dir.path(), "job");
    assert!(second.load().await.unwrap());
    let info = second.progress();
    assert_eq!(info.processed_records, 250);
    assert_eq!(info.total_records, Some(1_000));
    assert_eq!(info.status, OperationStatus::Running);
}

#[tokio::test]
async fn test_crashed_run_is_adopted_and_completed() {
    let dir = TempDir::new().unwrap();

    // First process dies while Running, after a checkpoint
    let first = tracker_at(dir.path(), "crashy");
    first.initialize().await.unwrap();
    first.update(ProgressUpdate::new().processed(40)).unwrap();
    first.save_checkpoint(consumed(40)).await.unwrap();
    first.save().await.unwrap();
    drop(first);

    let resumed_from = ResumableOperation::new(tracker_at(dir.path(), "crashy"))
        .run(|tracker| async move {
            let checkpoint = tracker.load_checkpoint().await?.expect("checkpoint");
            let start = checkpoint.state_u64(RECORDS_CONSUMED_KEY).unwrap_or(0);
            tracker.update(ProgressUpdate::new().processed(60))?;
            Ok::<_, ProgressError>(start)
        })
        .await
        .unwrap();
    assert_eq!(resumed_from, 40);

    let check = tracker_at(dir.path(), "crashy");
    assert!(check.load().await.unwrap());
    assert_eq!(check.status(), OperationStatus::Completed);
    assert_eq!(check.progress().processed_records, 100);
}

#[tokio::test]
async fn test_paused_operation_resumes() {
    let dir = TempDir::new().unwrap();

    ResumableOperation::new(tracker_at(dir.path(), "pausable"))
        .run(|tracker| async move {
            tracker.update(ProgressUpdate::new().processed(10))?;
            tracker.pause().await
        })
        .await
        .unwrap();

    let check = tracker_at(dir.path(), "pausable");
    check.load().await.unwrap();
    assert_eq!(check.status(), OperationStatus::Paused);

    ResumableOperation::new(tracker_at(dir.path(), "pausable"))
        .run(|tracker| async move {
            assert_eq!(tracker.status(), OperationStatus::Running);
            tracker.update(ProgressUpdate::new().processed(5))
        })
        .await
        .unwrap();

    let check = tracker_at(dir.path(), "pausable");
    check.load().await.unwrap();
    assert_eq!(check.status(), OperationStatus::Completed);
    assert_eq!(check.progress().processed_records, 15);
}

#[tokio::test]
async fn test_finished_operation_is_not_rerun() {
    let dir = TempDir::new().unwrap();

    ResumableOperation::new(tracker_at(dir.path(), "done"))
        .run(|_| async { Ok::<_, ProgressError>(()) })
        .await
        .unwrap();

    let mut ran = false;
    let err = ResumableOperation::new(tracker_at(dir.path(), "done"))
        .run(|_| {
            ran = true;
            async { Ok::<_, ProgressError>(()) }
        })
        .await
        .unwrap_err();
    assert!(!ran);
    assert!(matches!(
        err,
        ProgressError::AlreadyFinished { status: OperationStatus::Completed, .. }
    ));

    let tracker = tracker_at(dir.path(), "done");
    tracker.cleanup().await.unwrap();
    tracker.cleanup().await.unwrap();
    assert!(!tracker.load().await.unwrap());
}

#[tokio::test]
async fn test_checkpoint_for_other_operation_is_rejected() {
    let dir = TempDir::new().unwrap();

    let other = tracker_at(dir.path(), "other");
    other.initialize().await.unwrap();
    other.update(ProgressUpdate::new().processed(9)).unwrap();
    other.save_checkpoint(consumed(9)).await.unwrap();
    let foreign = other.load_checkpoint().await.unwrap().unwrap();

    let mine = tracker_at(dir.path(), "mine");
    mine.initialize().await.unwrap();
    assert!(!mine.restore_from_checkpoint(&foreign));
    assert_eq!(mine.progress().processed_records, 0);
}
