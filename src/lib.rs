//! # Resumable Transfer Library
//!
//! Streaming import/export of record data with durable progress tracking.
//! A long-running transfer can be paused, interrupted or crash, and a later
//! run of the same named operation picks up where the last one stopped.
//!
//! ## Features
//!
//! - **Streaming**: records move in bounded batches between byte sources and
//!   sinks; input is never materialized in memory
//! - **Fault isolation**: validator and transformer failures mark single
//!   records invalid instead of aborting the stream
//! - **Progress tracking**: counters, throughput and completion estimates with
//!   a strict lifecycle state machine
//! - **Resume**: snapshots and checkpoints persisted to the filesystem,
//!   Redis, or memory
//!
//! ## Quick Start
//!
//! ```no_run
//! use resumable_transfer::progress::{ProgressTracker, ResumableOperation};
//! use resumable_transfer::store::{FileCheckpointStore, FileProgressStore};
//! use resumable_transfer::stream::{JsonLinesEncoder, ProcessorConfig, StreamExporter};
//! use std::sync::Arc;
//!
//! # async fn example(batches: Vec<resumable_transfer::DataBatch>) -> anyhow::Result<()> {
//! let tracker = ProgressTracker::new(
//!     "nightly-export",
//!     Arc::new(FileProgressStore::open(".transfer-state")?),
//!     Arc::new(FileCheckpointStore::open(".transfer-state")?),
//! );
//!
//! let summary = ResumableOperation::new(tracker)
//!     .run(|tracker| async move {
//!         let mut out = tokio::fs::File::create("out.jsonl").await?;
//!         let mut exporter = StreamExporter::new(JsonLinesEncoder::new(), ProcessorConfig::default())
//!             .with_tracker(tracker);
//!         Ok::<_, anyhow::Error>(exporter.export_batches(batches, &mut out).await?)
//!     })
//!     .await?;
//! println!("{} records written", summary.records);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`record`] - records and batches
//! - [`progress`] - progress snapshots, the tracker state machine, resumable
//!   operations and maintenance
//! - [`store`] - persistence backends for snapshots and checkpoints
//! - [`stream`] - exporters, importers and the CSV / JSON lines codecs
//! - [`config`] - engine constants and store selection
//! - [`cli`] - command line front end

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::any::Any;

/// CLI command implementations
pub mod cli;

/// Engine constants and store selection
pub mod config;

/// Prometheus metrics
pub mod metrics;

/// Progress tracking and resumable operations
pub mod progress;

/// Records and batches
pub mod record;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Persistence backends
pub mod store;

/// Streaming export and import
pub mod stream;

pub use progress::{
    CheckpointData, OperationStatus, ProgressError, ProgressInfo, ProgressTracker,
    ResumableOperation,
};
pub use record::{DataBatch, DataRecord, RecordError};
pub use store::{CheckpointStore, PersistenceError, ProgressStore};
pub use stream::{ProcessorConfig, StreamExporter, StreamImporter, TransferError};

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
