//! Status command: list stored operations

use super::{CliError, OutputFormat};
use crate::config::EngineConfig;
use crate::progress::{OperationStatus, ProgressInfo};
use crate::store::ProgressStore;
use clap::Parser;

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Only list operations with this status
    #[arg(long)]
    pub status: Option<OperationStatus>,
}

impl StatusArgs {
    /// Execute the status listing
    pub async fn execute(
        &self,
        engine: &EngineConfig,
        format: OutputFormat,
    ) -> Result<(), CliError> {
        let stores = engine.open_stores().await?;
        let operations = collect(stores.progress.as_ref(), self.status).await?;

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&operations)?),
            OutputFormat::Human => {
                if operations.is_empty() {
                    println!("No operations found.");
                }
                for info in &operations {
                    println!("{}: {}", info.operation_id, info.format_progress());
                }
            }
        }
        Ok(())
    }
}

/// Snapshots of every stored operation matching `status`, ordered by id
pub async fn collect(
    store: &dyn ProgressStore,
    status: Option<OperationStatus>,
) -> Result<Vec<ProgressInfo>, CliError> {
    let ids = store.list_operations_with_status(status).await?;
    let mut operations = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(info) = store.load(&id).await? {
            operations.push(info);
        }
    }
    Ok(operations)
}
