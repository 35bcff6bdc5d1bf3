//! Redis-backed stores
//!
//! Records are stored as JSON strings under `{key_prefix}{namespace}:{id}`,
//! where the namespace is `progress` or `checkpoint`. Connections come from
//! a deadpool pool sized by [`RedisConfig`]; an optional TTL lets abandoned
//! operations expire on the server side.

use super::{CheckpointStore, PersistenceError, ProgressStore, StoreResult};
use crate::progress::{CheckpointData, ProgressInfo};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

const BACKEND: &str = "redis";

const PROGRESS_NAMESPACE: &str = "progress";
const CHECKPOINT_NAMESPACE: &str = "checkpoint";

/// Connection settings for the Redis backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (e.g. `redis://localhost:6379`)
    pub url: String,
    /// Prefix for every key written by this engine
    pub key_prefix: String,
    /// Maximum pooled connections
    pub max_connections: usize,
    /// How long to wait for a pooled connection
    pub connection_timeout_ms: u64,
    /// Expiry for stored records; `None` keeps them forever
    pub ttl_seconds: Option<u64>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "transfer:".to_string(),
            max_connections: 10,
            connection_timeout_ms: 5000,
            ttl_seconds: None,
        }
    }
}

/// Build a connection pool and verify the server answers `PING`
pub async fn create_pool(config: &RedisConfig) -> StoreResult<Pool> {
    let mut cfg = Config::from_url(&config.url);
    if cfg.pool.is_none() {
        cfg.pool = Some(deadpool_redis::PoolConfig::default());
    }
    if let Some(ref mut pool_config) = cfg.pool {
        pool_config.max_size = config.max_connections;
        pool_config.timeouts.wait = Some(std::time::Duration::from_millis(
            config.connection_timeout_ms,
        ));
    }

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| remote_error("*", format!("Failed to create Redis pool: {e}")))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| remote_error("*", format!("Failed to connect to Redis: {e}")))?;
    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .map_err(|e| remote_error("*", format!("Redis ping failed: {e}")))?;

    info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis");
    Ok(pool)
}

fn remote_error(operation_id: &str, message: String) -> PersistenceError {
    PersistenceError::Remote {
        backend: BACKEND,
        operation_id: operation_id.to_string(),
        message,
    }
}

/// Redis store for one record type
pub struct RedisStore<T> {
    pool: Pool,
    config: RedisConfig,
    namespace: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RedisStore<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
            namespace: self.namespace,
            _record: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for RedisStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Redis-backed [`ProgressStore`]
pub type RedisProgressStore = RedisStore<ProgressInfo>;

/// Redis-backed [`CheckpointStore`]
pub type RedisCheckpointStore = RedisStore<CheckpointData>;

impl RedisStore<ProgressInfo> {
    /// Progress store over an existing pool
    pub fn new(pool: Pool, config: RedisConfig) -> Self {
        Self::with_namespace(pool, config, PROGRESS_NAMESPACE)
    }
}

impl RedisStore<CheckpointData> {
    /// Checkpoint store over an existing pool
    pub fn new(pool: Pool, config: RedisConfig) -> Self {
        Self::with_namespace(pool, config, CHECKPOINT_NAMESPACE)
    }
}

impl<T> RedisStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn with_namespace(pool: Pool, config: RedisConfig, namespace: &'static str) -> Self {
        Self {
            pool,
            config,
            namespace,
            _record: PhantomData,
        }
    }

    /// Full key for `operation_id`
    pub fn make_key(&self, operation_id: &str) -> String {
        format!("{}{}:{}", self.config.key_prefix, self.namespace, operation_id)
    }

    fn key_prefix(&self) -> String {
        format!("{}{}:", self.config.key_prefix, self.namespace)
    }

    /// Check that the server is reachable
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection("*").await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| remote_error("*", format!("Redis ping failed: {e}")))
    }

    async fn connection(&self, operation_id: &str) -> StoreResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| remote_error(operation_id, format!("Failed to get Redis connection: {e}")))
    }

    async fn put(&self, operation_id: &str, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string(value).map_err(|e| PersistenceError::Serialization {
            backend: BACKEND,
            operation_id: operation_id.to_string(),
            message: e.to_string(),
        })?;

        let key = self.make_key(operation_id);
        let mut conn = self.connection(operation_id).await?;
        let result = match self.config.ttl_seconds {
            Some(ttl) => conn.set_ex::<_, _, ()>(&key, json, ttl).await,
            None => conn.set::<_, _, ()>(&key, json).await,
        };
        result.map_err(|e| remote_error(operation_id, format!("Redis SET failed: {e}")))?;

        debug!(operation_id, key = %key, "Record saved");
        Ok(())
    }

    async fn get(&self, operation_id: &str) -> StoreResult<Option<T>> {
        let key = self.make_key(operation_id);
        let mut conn = self.connection(operation_id).await?;
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| remote_error(operation_id, format!("Redis GET failed: {e}")))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        serde_json::from_str(&raw).map(Some).map_err(|e| {
            warn!(operation_id, key = %key, error = %e, "Failed to deserialize stored record");
            PersistenceError::Corrupt {
                backend: BACKEND,
                operation_id: operation_id.to_string(),
                message: e.to_string(),
            }
        })
    }

    async fn remove(&self, operation_id: &str) -> StoreResult<()> {
        let key = self.make_key(operation_id);
        let mut conn = self.connection(operation_id).await?;
        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| remote_error(operation_id, format!("Redis DEL failed: {e}")))
    }

    /// Incremental SCAN over the namespace so large keyspaces never block
    /// the server
    async fn keys(&self) -> StoreResult<BTreeSet<String>> {
        let prefix = self.key_prefix();
        let pattern = format!("{}*", glob_escape(&prefix));
        let mut conn = self.connection("*").await?;
        let mut iter = conn
            .scan_match::<_, String>(&pattern)
            .await
            .map_err(|e| remote_error("*", format!("Redis SCAN failed: {e}")))?;

        let mut ids = BTreeSet::new();
        while let Some(key) = iter.next_item().await {
            if let Some(id) = key.strip_prefix(&prefix) {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ProgressStore for RedisStore<ProgressInfo> {
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
        self.remove(operation_id).await
    }

    async fn list_operations(&self) -> StoreResult<BTreeSet<String>> {
        self.keys().await
    }
}

#[async_trait]
impl CheckpointStore for RedisStore<CheckpointData> {
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
        self.remove(operation_id).await
    }
}

/// Escape glob metacharacters so `raw` matches only itself in a MATCH pattern
fn glob_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
