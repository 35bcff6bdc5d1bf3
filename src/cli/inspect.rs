//! Inspect command: one operation's progress and latest checkpoint

use super::{CliError, OutputFormat};
use crate::config::EngineConfig;
use clap::Parser;

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Operation to show
    pub operation_id: String,
}

impl InspectArgs {
    /// Execute the inspection
    pub async fn execute(
        &self,
        engine: &EngineConfig,
        format: OutputFormat,
    ) -> Result<(), CliError> {
        let stores = engine.open_stores().await?;
        let progress = stores
            .progress
            .load(&self.operation_id)
            .await?
            .ok_or_else(|| CliError::NotFound(self.operation_id.clone()))?;
        let checkpoint = stores.checkpoints.load(&self.operation_id).await?;

        match format {
            OutputFormat::Json => {
                let report = serde_json::json!({
                    "progress": progress,
                    "checkpoint": checkpoint,
                });
                println!("{}", serde_json::to_string(&report)?);
            }
            OutputFormat::Human => {
                println!("Operation: {}", progress.operation_id);
                println!("Status: {}", progress.status);
                println!("{}", progress.format_progress());
                if let Some(start) = progress.start_time {
                    println!("Started: {}", start.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                println!(
                    "Last update: {}",
                    progress.last_update.format("%Y-%m-%d %H:%M:%S UTC")
                );
                match checkpoint {
                    Some(checkpoint) => {
                        println!(
                            "Checkpoint: {} ({} processed)",
                            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                            checkpoint.progress.processed_records
                        );
                        println!("Checkpoint state: {}", serde_json::to_string(&checkpoint.state)?);
                    }
                    None => println!("Checkpoint: none"),
                }
            }
        }
        Ok(())
    }
}
