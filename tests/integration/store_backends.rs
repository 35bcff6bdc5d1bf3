//! Round-trip and isolation tests run against every local store backend

use chrono::{Duration, Utc};
use resumable_transfer::progress::{CheckpointData, OperationStatus, ProgressInfo};
use resumable_transfer::store::{
    CheckpointStore, FileCheckpointStore, FileProgressStore, MemoryCheckpointStore,
    MemoryProgressStore, PersistenceError, ProgressStore,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn sample_progress(id: &str) -> ProgressInfo {
    let now = Utc::now();
    let mut info = ProgressInfo::new(id);
    info.total_records = Some(1_000);
    info.processed_records = 250;
    info.failed_records = 3;
    info.current_batch = 3;
    info.bytes_processed = 64_000;
    info.start_time = Some(now - Duration::seconds(30));
    info.last_update = now;
    info.status = OperationStatus::Running;
    info.refresh_estimate();
    info
}

fn sample_checkpoint(id: &str) -> CheckpointData {
    let state = json!({"recordsConsumed": 253, "cursor": "abc", "nested": {"page": 4}});
    let serde_json::Value::Object(state) = state else {
        unreachable!()
    };
    CheckpointData::new(sample_progress(id), state)
}

async fn check_progress_contract(store: &dyn ProgressStore) {
    let info = sample_progress("op-1");
    store.save("op-1", &info).await.unwrap();
    assert_eq!(store.load("op-1").await.unwrap(), Some(info.clone()));
    assert_eq!(store.load("unknown").await.unwrap(), None);

    let mut updated = info.clone();
    updated.processed_records = 300;
    store.save("op-1", &updated).await.unwrap();
    assert_eq!(store.load("op-1").await.unwrap().unwrap().processed_records, 300);

    store.delete("op-1").await.unwrap();
    store.delete("op-1").await.unwrap();
    store.delete("never-existed").await.unwrap();
    assert_eq!(store.load("op-1").await.unwrap(), None);
}

async fn check_checkpoint_contract(store: &dyn CheckpointStore) {
    let checkpoint = sample_checkpoint("op-2");
    store.save("op-2", &checkpoint).await.unwrap();
    let loaded = store.load("op-2").await.unwrap().unwrap();
    assert_eq!(loaded, checkpoint);
    assert_eq!(loaded.state_u64("recordsConsumed"), Some(253));

    assert!(store.load("unknown").await.unwrap().is_none());
    store.delete("op-2").await.unwrap();
    store.delete("op-2").await.unwrap();
}

async fn check_listing(store: &dyn ProgressStore) {
    for (id, status) in [
        ("a", OperationStatus::Running),
        ("b", OperationStatus::Completed),
        ("c", OperationStatus::Failed),
    ] {
        let mut info = sample_progress(id);
        info.status = status;
        store.save(id, &info).await.unwrap();
    }

    let all = store.list_operations().await.unwrap();
    assert_eq!(all.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);

    let completed = store
        .list_operations_with_status(Some(OperationStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.into_iter().collect::<Vec<_>>(), vec!["b"]);
}

#[tokio::test]
async fn test_file_backend_contract() {
    let dir = TempDir::new().unwrap();
    check_progress_contract(&FileProgressStore::open(dir.path()).unwrap()).await;
    check_checkpoint_contract(&FileCheckpointStore::open(dir.path()).unwrap()).await;
}

#[tokio::test]
async fn test_memory_backend_contract() {
    check_progress_contract(&MemoryProgressStore::new()).await;
    check_checkpoint_contract(&MemoryCheckpointStore::new()).await;
}

#[tokio::test]
async fn test_file_backend_listing() {
    let dir = TempDir::new().unwrap();
    let progress = FileProgressStore::open(dir.path()).unwrap();
    // Checkpoints in the same directory must not show up as operations
    let checkpoints = FileCheckpointStore::open(dir.path()).unwrap();
    checkpoints.save("z", &sample_checkpoint("z")).await.unwrap();
    check_listing(&progress).await;
}

#[tokio::test]
async fn test_memory_backend_listing() {
    check_listing(&MemoryProgressStore::new()).await;
}

#[tokio::test]
async fn test_file_backend_corrupt_file_is_persistence_error() {
    let dir = TempDir::new().unwrap();
    let store = FileProgressStore::open(dir.path()).unwrap();
    std::fs::write(store.path_for("broken"), b"{ not json").unwrap();

    let err = store.load("broken").await.unwrap_err();
    assert!(matches!(err, PersistenceError::Corrupt { backend: "file", .. }));
    assert_eq!(err.operation_id(), "broken");
}

#[tokio::test]
async fn test_concurrent_saves_for_distinct_ids() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ProgressStore> = Arc::new(FileProgressStore::open(dir.path()).unwrap());

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let id = format!("op-{i}");
                let mut info = sample_progress(&id);
                info.processed_records = i;
                store.save(&id, &info).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    for i in 0..16 {
        let id = format!("op-{i}");
        let info = store.load(&id).await.unwrap().unwrap();
        assert_eq!(info.operation_id, id);
        assert_eq!(info.processed_records, i);
    }
}
