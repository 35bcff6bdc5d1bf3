//! Engine configuration: constants, backend selection and the store factory

use crate::store::{
    remote, CheckpointStore, FileCheckpointStore, FileProgressStore, MemoryCheckpointStore,
    MemoryProgressStore, ProgressStore, RedisCheckpointStore, RedisConfig, RedisProgressStore,
    StoreResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Records per exported/imported batch.
/// 1,000 keeps per-batch progress updates cheap while bounding memory per
/// chunk for wide records.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Period of the tracker's background save loop
pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Largest progress or checkpoint file the file store will read (10MB)
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Directory used by the file store when none is configured
pub const DEFAULT_STATE_DIR: &str = ".transfer-state";

/// Most input lines one logical unit may span before its first line is
/// rejected and reading restarts at the line after it
pub const MAX_UNIT_LINES: usize = 1_000;

/// Checkpoint key holding the number of input records already consumed
pub const RECORDS_CONSUMED_KEY: &str = "recordsConsumed";

/// Persistence backend for progress and checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per operation
    #[default]
    File,
    /// Redis key-value store
    Redis,
    /// Process memory; nothing survives exit
    Memory,
}

impl StoreBackend {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            _ => Err(format!(
                "Invalid backend: {s}. Valid options: file, redis, memory"
            )),
        }
    }
}

/// Where and how operation state is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Selected backend
    pub backend: StoreBackend,
    /// Root directory for the file backend
    pub state_dir: PathBuf,
    /// Settings for the Redis backend
    pub redis: RedisConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            redis: RedisConfig::default(),
        }
    }
}

/// Progress and checkpoint stores opened from one [`EngineConfig`]
#[derive(Clone)]
pub struct Stores {
    /// Progress snapshots
    pub progress: Arc<dyn ProgressStore>,
    /// Checkpoints
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores")
            .field("progress", &self.progress.backend())
            .field("checkpoints", &self.checkpoints.backend())
            .finish()
    }
}

impl EngineConfig {
    /// Open both stores for the configured backend
    pub async fn open_stores(&self) -> StoreResult<Stores> {
        let stores = match self.backend {
            StoreBackend::File => Stores {
                progress: Arc::new(FileProgressStore::open(&self.state_dir)?),
                checkpoints: Arc::new(FileCheckpointStore::open(&self.state_dir)?),
            },
            StoreBackend::Redis => {
                let pool = remote::create_pool(&self.redis).await?;
                Stores {
                    progress: Arc::new(RedisProgressStore::new(pool.clone(), self.redis.clone())),
                    checkpoints: Arc::new(RedisCheckpointStore::new(pool, self.redis.clone())),
                }
            }
            StoreBackend::Memory => Stores {
                progress: Arc::new(MemoryProgressStore::new()),
                checkpoints: Arc::new(MemoryCheckpointStore::new()),
            },
        };

        info!(
            backend = %self.backend,
            path = %self.state_dir.display(),
            "Opened operation stores"
        );
        Ok(stores)
    }
}
