//! Tracker state machine, estimates and callbacks driven through the public API

use resumable_transfer::progress::{
    OperationStatus, ProgressError, ProgressInfo, ProgressTracker, ProgressUpdate,
    ResumableOperation, TrackerConfig,
};
use resumable_transfer::store::{MemoryCheckpointStore, MemoryProgressStore, ProgressStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn stores() -> (Arc<MemoryProgressStore>, Arc<MemoryCheckpointStore>) {
    (
        Arc::new(MemoryProgressStore::new()),
        Arc::new(MemoryCheckpointStore::new()),
    )
}

fn tracker(id: &str) -> (ProgressTracker, Arc<MemoryProgressStore>) {
    let (progress, checkpoints) = stores();
    let tracker = ProgressTracker::with_config(
        id,
        progress.clone(),
        checkpoints,
        TrackerConfig {
            auto_save: false,
            ..TrackerConfig::default()
        },
    );
    (tracker, progress)
}

#[tokio::test]
async fn test_fresh_run_to_completion() {
    let (tracker, store) = tracker("fresh");
    let tracker = tracker.with_total_records(1_000);

    tracker.initialize().await.unwrap();
    for _ in 0..10 {
        tracker.update(ProgressUpdate::new().processed(100)).unwrap();
    }

    let info = tracker.progress();
    assert_eq!(info.processed_records, 1_000);
    assert_eq!(info.progress_percentage(), 100.0);

    tracker.complete().await.unwrap();
    assert_eq!(tracker.status(), OperationStatus::Completed);

    let stored = store.load("fresh").await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_percentage_is_monotonic_and_clamped() {
    let (tracker, _) = tracker("clamp");
    let tracker = tracker.with_total_records(10);
    tracker.initialize().await.unwrap();

    let mut last = tracker.progress().progress_percentage();
    for _ in 0..8 {
        tracker.update(ProgressUpdate::new().processed(3)).unwrap();
        let pct = tracker.progress().progress_percentage();
        assert!(pct >= last);
        assert!(pct <= 100.0);
        last = pct;
    }
    assert_eq!(last, 100.0);
}

#[tokio::test]
async fn test_estimate_needs_throughput() {
    let (tracker, _) = tracker("eta");
    let tracker = tracker.with_total_records(100);
    tracker.initialize().await.unwrap();
    assert!(tracker.progress().estimated_completion.is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    tracker.update(ProgressUpdate::new().processed(10)).unwrap();

    let info = tracker.progress();
    let eta = info.estimated_completion.expect("estimate after progress");
    assert!(eta > info.last_update);
}

#[tokio::test]
async fn test_illegal_transitions_leave_state_untouched() {
    let (tracker, _) = tracker("illegal");

    assert!(matches!(
        tracker.complete().await,
        Err(ProgressError::InvalidTransition { from: OperationStatus::Pending, .. })
    ));
    assert!(matches!(
        tracker.update(ProgressUpdate::new().processed(1)),
        Err(ProgressError::NotLive { .. })
    ));

    tracker.initialize().await.unwrap();
    tracker.cancel().await.unwrap();
    assert!(tracker.resume().await.is_err());
    assert!(tracker.fail("late").await.is_err());
    assert_eq!(tracker.status(), OperationStatus::Cancelled);
    assert!(tracker.progress().error_message.is_none());
}

#[tokio::test]
async fn test_callbacks_see_updates_and_terminal_transition() {
    let (tracker, _) = tracker("callbacks");
    let seen: Arc<Mutex<Vec<(OperationStatus, u64)>>> = Arc::default();

    tracker.add_callback(|_: &ProgressInfo| panic!("broken observer"));
    tracker.add_callback({
        let seen = seen.clone();
        move |info: &ProgressInfo| {
            seen.lock()
                .unwrap()
                .push((info.status, info.processed_records))
        }
    });

    tracker.initialize().await.unwrap();
    tracker.update(ProgressUpdate::new().processed(5)).unwrap();
    tracker.complete().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            (OperationStatus::Running, 0),
            (OperationStatus::Running, 5),
            (OperationStatus::Completed, 5),
        ]
    );
}

#[tokio::test]
async fn test_resumable_operation_failure_path() {
    let (tracker, store) = tracker("failing");

    let result: Result<(), ProgressError> = ResumableOperation::new(tracker.clone())
        .run(|tracker| async move {
            tracker.update(ProgressUpdate::new().processed(1))?;
            Err(ProgressError::NotLive {
                operation_id: "x".into(),
                status: OperationStatus::Pending,
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ProgressError::NotLive { .. }));
    assert_eq!(tracker.status(), OperationStatus::Failed);
    assert_eq!(tracker.progress().error_message, Some(err.to_string()));
    assert_eq!(
        store.load("failing").await.unwrap().unwrap().status,
        OperationStatus::Failed
    );
}

#[tokio::test]
async fn test_auto_save_persists_running_progress() {
    let (progress, checkpoints) = stores();
    let tracker = ProgressTracker::with_config(
        "auto",
        progress.clone(),
        checkpoints,
        TrackerConfig {
            auto_save: true,
            auto_save_interval: Duration::from_millis(20),
        },
    );

    tracker.initialize().await.unwrap();
    tracker.update(ProgressUpdate::new().processed(42)).unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    let stored = progress.load("auto").await.unwrap().unwrap();
    assert_eq!(stored.processed_records, 42);
    tracker.complete().await.unwrap();
}
