//! CLI command implementations

pub mod cleanup;
pub mod error;
pub mod inspect;
pub mod status;
pub mod transfer;

pub use cleanup::CleanupArgs;
pub use error::CliError;
pub use inspect::InspectArgs;
pub use status::StatusArgs;
pub use transfer::TransferArgs;

use crate::config::{EngineConfig, StoreBackend, DEFAULT_STATE_DIR};
use crate::shutdown::SharedShutdown;
use crate::store::RedisConfig;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Resumable record transfer CLI
#[derive(Parser, Debug)]
#[command(name = "resumable-transfer")]
#[command(about = "Move records between CSV and JSON lines files with resumable progress", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Report format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Persistence backend: file, redis or memory
    #[arg(long, global = true, env = "TRANSFER_BACKEND", default_value = "file")]
    pub backend: StoreBackend,

    /// Directory for progress and checkpoint files (file backend)
    #[arg(long, global = true, env = "TRANSFER_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Redis connection URL (redis backend)
    #[arg(long, global = true, env = "TRANSFER_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy records from one file to another, resuming an earlier run
    Transfer(TransferArgs),

    /// List stored operations
    Status(StatusArgs),

    /// Show one operation's progress and latest checkpoint
    Inspect(InspectArgs),

    /// Delete operations that have not been updated recently
    Cleanup(CleanupArgs),
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl Cli {
    /// Engine configuration assembled from the global flags
    pub fn engine_config(&self) -> EngineConfig {
        let mut redis = RedisConfig::default();
        if let Some(url) = &self.redis_url {
            redis.url = url.clone();
        }
        EngineConfig {
            backend: self.backend,
            state_dir: self.state_dir.clone(),
            redis,
        }
    }

    /// Run the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::Metrics(e.to_string()))?;
        }

        let engine = self.engine_config();
        match &self.command {
            Commands::Transfer(args) => args.execute(&engine, self.output_format, shutdown).await,
            Commands::Status(args) => args.execute(&engine, self.output_format).await,
            Commands::Inspect(args) => args.execute(&engine, self.output_format).await,
            Commands::Cleanup(args) => args.execute(&engine, self.output_format).await,
        }
    }
}
