//! Main entry point for the resumable-transfer CLI

use clap::Parser;
use resumable_transfer::cli::Cli;
use resumable_transfer::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("resumable_transfer=info"));

    // Logs go to stderr so reports on stdout stay machine-readable
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    shutdown::listen_for_ctrl_c(shutdown.clone());

    if let Err(e) = cli.execute(shutdown).await {
        error!("Command failed: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("hint: {hint}");
        }
        return Err(anyhow::Error::new(e));
    }
    Ok(())
}
