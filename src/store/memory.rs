//! In-process stores
//!
//! Records are kept as serialized JSON so that loads return independent
//! copies and serialization failures surface exactly as they would on a
//! durable backend. Clones share the same map.

use super::{CheckpointStore, PersistenceError, ProgressStore, StoreResult};
use crate::progress::{CheckpointData, ProgressInfo};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;

const BACKEND: &str = "memory";

/// Map-backed store for one record type
#[derive(Debug)]
pub struct MemoryStore<T> {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            _record: PhantomData,
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            _record: PhantomData,
        }
    }
}

/// In-memory [`ProgressStore`]
pub type MemoryProgressStore = MemoryStore<ProgressInfo>;

/// In-memory [`CheckpointStore`]
pub type MemoryCheckpointStore = MemoryStore<CheckpointData>;

impl<T> MemoryStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn put(&self, operation_id: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| PersistenceError::Serialization {
            backend: BACKEND,
            operation_id: operation_id.to_string(),
            message: e.to_string(),
        })?;
        self.entries
            .write()
            .await
            .insert(operation_id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, operation_id: &str) -> StoreResult<Option<T>> {
        let entries = self.entries.read().await;
        let Some(bytes) = entries.get(operation_id) else {
            return Ok(None);
        };
        serde_json::from_slice(bytes)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                backend: BACKEND,
                operation_id: operation_id.to_string(),
                message: e.to_string(),
            })
    }

    async fn remove(&self, operation_id: &str) {
        self.entries.write().await.remove(operation_id);
    }

    async fn keys(&self) -> BTreeSet<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore<ProgressInfo> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn save(&self, operation_id: &str, progress: &ProgressInfo) -> StoreResult<()> {
        self.put(operation_id, progress).await
    }

    async fn load(&self, operation_id: &str) -> StoreResult<Option<ProgressInfo>> {
        self.get(operation_id).await
    }

    async fn delete(&self, operation_id: &str) -> StoreResult<()> {
        self.remove(operation_id).await;
        Ok(())
    }

    async fn list_operations(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.keys().await)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore<CheckpointData> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn save(&self, operation_id: &str, checkpoint: &CheckpointData) -> StoreResult<()> {
        self.put(operation_id, checkpoint).await
    }

    async fn load(&self, operation_id: &str) -> StoreResult<Option<CheckpointData>> {
        self.get(operation_id).await
    }

    async fn delete(&self, operation_id: &str) -> StoreResult<()> {
        self.remove(operation_id).await;
        Ok(())
    }
}
