//! Cleanup command: age-based removal of stored operations

use super::{CliError, OutputFormat};
use crate::config::EngineConfig;
use crate::progress::cleanup_old_operations_with_checkpoints;
use clap::Parser;

/// Arguments for the cleanup command
#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Remove operations not updated for this many days
    #[arg(long, default_value_t = 7)]
    pub max_age_days: u32,
}

impl CleanupArgs {
    /// Execute the cleanup
    pub async fn execute(
        &self,
        engine: &EngineConfig,
        format: OutputFormat,
    ) -> Result<(), CliError> {
        let stores = engine.open_stores().await?;
        let removed = cleanup_old_operations_with_checkpoints(
            stores.progress.as_ref(),
            stores.checkpoints.as_ref(),
            self.max_age_days,
        )
        .await;

        match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "removed": removed, "maxAgeDays": self.max_age_days })
            ),
            OutputFormat::Human => println!(
                "Removed {removed} operation(s) older than {} day(s)",
                self.max_age_days
            ),
        }
        Ok(())
    }
}
