//! CLI error types and conversions

use crate::progress::ProgressError;
use crate::store::PersistenceError;
use crate::stream::TransferError;
use std::path::PathBuf;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Store failure outside a tracker
    #[error("store error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Tracker or lifecycle failure
    #[error("progress error: {0}")]
    Progress(#[from] ProgressError),

    /// Stream failure during a transfer
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Input or output file could not be used
    #[error("cannot access {path:?}: {source}")]
    File {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Report rendering failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unknown operation id
    #[error("no stored progress for operation '{0}'")]
    NotFound(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl CliError {
    /// Wrap an I/O error with the path it concerns
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }

    /// Extra guidance printed after the error, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Progress(ProgressError::AlreadyFinished { .. }) => {
                Some("pass --restart to discard the stored state and run again")
            }
            Self::Progress(ProgressError::InvalidTransition { .. }) => {
                Some("inspect the operation to see its stored status")
            }
            _ => None,
        }
    }
}
