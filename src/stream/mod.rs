//! Record streaming between [`DataBatch`](crate::record::DataBatch)es and byte sinks/sources
//!
//! The drivers ([`StreamExporter`], [`StreamImporter`]) own batching, the
//! validate/transform pipeline and progress reporting; format specifics live
//! behind the [`RecordEncoder`] / [`RecordDecoder`] seams so every format
//! gets identical record handling.
//!
//! Failure classes:
//! - per-record problems (validator rejection, transformer error, one
//!   undecodable line) become validation errors on the record and the
//!   stream continues
//! - sink/source I/O failures and unrecoverable format errors abort the
//!   stream with a [`TransferError`]; output written so far is kept

use crate::progress::ProgressError;
use crate::record::DataRecord;
use std::sync::Arc;

pub mod csv;
pub mod exporter;
pub mod importer;
pub mod jsonl;
pub mod pipeline;

pub use self::csv::{CsvDecoder, CsvEncoder};
pub use exporter::StreamExporter;
pub use importer::StreamImporter;
pub use jsonl::{JsonLinesDecoder, JsonLinesEncoder};
pub use pipeline::RecordPipeline;

use crate::config::DEFAULT_BATCH_SIZE;

/// Error type returned by validators and transformers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Record predicate; `Err` counts as a failed validation
pub type Validator = Arc<dyn Fn(&DataRecord) -> Result<bool, BoxError> + Send + Sync>;

/// In-place record mapper; `Err` marks the record invalid
pub type Transformer = Arc<dyn Fn(&mut DataRecord) -> Result<(), BoxError> + Send + Sync>;

/// Batching and validation switches shared by exporters and importers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Records per chunk, at least 1
    pub batch_size: usize,
    /// Run the validator on each record
    pub validate: bool,
    /// Leave invalid records out of export output
    pub skip_invalid: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            validate: true,
            skip_invalid: false,
        }
    }
}

impl ProcessorConfig {
    /// Set the batch size; zero is raised to one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enable or disable validation
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Enable or disable skipping invalid records on export
    pub fn with_skip_invalid(mut self, skip_invalid: bool) -> Self {
        self.skip_invalid = skip_invalid;
        self
    }

    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Totals of one export run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Valid records written
    pub records: u64,
    /// Invalid records seen (written or skipped)
    pub failed: u64,
    /// Bytes written to the sink
    pub bytes: u64,
    /// Chunks written
    pub batches: u64,
}

/// Per-unit or whole-stream decode failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// This unit is bad; it becomes an invalid record
    #[error("{0}")]
    Malformed(String),
    /// The input cannot be decoded any further
    #[error("{0}")]
    Fatal(String),
}

/// Per-record or whole-stream encode failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// This record cannot be represented; it is counted as failed
    #[error("{0}")]
    Record(String),
    /// The encoder cannot continue
    #[error("{0}")]
    Fatal(String),
}

/// Stream-level failure
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Writing to the sink failed
    #[error("{format} sink write failed: {source}")]
    Sink {
        /// Codec format name
        format: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Reading from the source failed
    #[error("{format} source read failed: {source}")]
    Source {
        /// Codec format name
        format: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Input cannot be decoded any further
    #[error("{format} decode failed at row {row}: {message}")]
    Decode {
        /// Codec format name
        format: &'static str,
        /// 1-based row where the failing unit starts
        row: u64,
        /// Decoder message
        message: String,
    },

    /// Encoder cannot continue
    #[error("{format} encode failed: {message}")]
    Encode {
        /// Codec format name
        format: &'static str,
        /// Encoder message
        message: String,
    },

    /// Progress reporting failed
    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Writes records of one format into a byte buffer
pub trait RecordEncoder: Send {
    /// Format name used in errors and logs
    fn format(&self) -> &'static str;

    /// Bytes to emit before the first record
    fn begin(&mut self, _out: &mut Vec<u8>) -> Result<(), EncodeError> {
        Ok(())
    }

    /// Append one record to `out`
    fn encode_record(&mut self, record: &DataRecord, out: &mut Vec<u8>) -> Result<(), EncodeError>;

    /// Bytes to emit after the last record
    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// Reads records of one format from text units
pub trait RecordDecoder: Send {
    /// Format name used in errors and logs
    fn format(&self) -> &'static str;

    /// Whether `unit` is a complete logical unit or needs the next line
    fn unit_complete(&self, _unit: &str) -> bool {
        true
    }

    /// Decode one unit starting at 1-based `row`; `Ok(None)` for units that
    /// carry no record (headers, blank lines)
    fn decode_unit(&mut self, unit: &str, row: u64) -> Result<Option<DataRecord>, DecodeError>;

    /// Error for a line that could not be read as a unit (bad encoding, or a
    /// unit that never completed)
    fn reject_unit(&self, reason: &str) -> DecodeError {
        DecodeError::Malformed(reason.to_string())
    }
}
