//! Age-based cleanup against the file backend

use chrono::{Duration, Utc};
use resumable_transfer::progress::{
    cleanup_old_operations, cleanup_old_operations_with_checkpoints, CheckpointData,
    CheckpointState, ProgressInfo,
};
use resumable_transfer::store::{
    CheckpointStore, FileCheckpointStore, FileProgressStore, ProgressStore,
};
use tempfile::TempDir;

fn aged(id: &str, days: i64) -> ProgressInfo {
    let mut info = ProgressInfo::new(id);
    info.last_update = Utc::now() - Duration::days(days);
    info
}

async fn seed(
    progress: &FileProgressStore,
    checkpoints: &FileCheckpointStore,
    id: &str,
    days: i64,
) {
    let info = aged(id, days);
    progress.save(id, &info).await.unwrap();
    checkpoints
        .save(id, &CheckpointData::new(info, CheckpointState::new()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stale_operations_and_checkpoints_removed() {
    let dir = TempDir::new().unwrap();
    let progress = FileProgressStore::open(dir.path()).unwrap();
    let checkpoints = FileCheckpointStore::open(dir.path()).unwrap();

    seed(&progress, &checkpoints, "ten-days", 10).await;
    seed(&progress, &checkpoints, "today", 0).await;

    let removed = cleanup_old_operations_with_checkpoints(&progress, &checkpoints, 7).await;
    assert_eq!(removed, 1);

    assert!(progress.load("ten-days").await.unwrap().is_none());
    assert!(checkpoints.load("ten-days").await.unwrap().is_none());
    assert!(progress.load("today").await.unwrap().is_some());
    assert!(checkpoints.load("today").await.unwrap().is_some());
}

#[tokio::test]
async fn test_zero_days_removes_everything_older_than_now() {
    let dir = TempDir::new().unwrap();
    let progress = FileProgressStore::open(dir.path()).unwrap();
    progress.save("a", &aged("a", 1)).await.unwrap();
    progress.save("b", &aged("b", 2)).await.unwrap();

    assert_eq!(cleanup_old_operations(&progress, 0).await, 2);
    assert!(progress.list_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreadable_record_is_skipped() {
    let dir = TempDir::new().unwrap();
    let progress = FileProgressStore::open(dir.path()).unwrap();
    progress.save("old", &aged("old", 30)).await.unwrap();
    std::fs::write(progress.path_for("broken"), b"not json").unwrap();

    assert_eq!(cleanup_old_operations(&progress, 7).await, 1);
    assert!(progress.path_for("broken").exists());
}

#[tokio::test]
async fn test_empty_store_removes_nothing() {
    let dir = TempDir::new().unwrap();
    let progress = FileProgressStore::open(dir.path()).unwrap();
    assert_eq!(cleanup_old_operations(&progress, 7).await, 0);
}
