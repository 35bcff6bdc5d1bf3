//! Transfer command: copy records between files as one resumable operation
//!
//! After every batch the output is synced and a checkpoint records how many
//! input records were consumed and how long the output was. A later run of
//! the same operation truncates the output back to that length, skips the
//! consumed input and appends, so an interrupted transfer never duplicates
//! or loses records.

use super::{CliError, OutputFormat};
use crate::config::{EngineConfig, DEFAULT_BATCH_SIZE, RECORDS_CONSUMED_KEY};
use crate::progress::{CheckpointData, CheckpointState, OperationStatus, ProgressInfo};
use crate::progress::{ProgressTracker, ResumableOperation};
use crate::record::DataRecord;
use crate::shutdown::SharedShutdown;
use crate::stream::{
    CsvDecoder, CsvEncoder, DecodeError, EncodeError, JsonLinesDecoder, JsonLinesEncoder,
    ProcessorConfig, RecordDecoder, RecordEncoder, RecordPipeline, StreamExporter,
    StreamImporter, TransferSummary,
};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, BufReader};
use tracing::info;

/// Checkpoint key holding the output length at checkpoint time
pub const OUTPUT_BYTES_KEY: &str = "outputBytes";

/// Checkpoint key holding the CSV columns already written as header
pub const COLUMNS_KEY: &str = "columns";

/// File format on either side of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Comma-separated values with a header row
    Csv,
    /// One JSON object per line
    Jsonl,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "jsonl" | "ndjson" => Ok(Format::Jsonl),
            _ => Err(format!("Invalid format: {s}. Valid options: csv, jsonl")),
        }
    }
}

fn parse_batch_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("batch size must be at least 1".to_string());
    }
    Ok(value)
}

/// Arguments for the transfer command
#[derive(Parser, Debug)]
pub struct TransferArgs {
    /// File to read records from
    #[arg(long)]
    pub input: PathBuf,

    /// Input format: csv or jsonl
    #[arg(long = "from")]
    pub from: Format,

    /// File to write records to
    #[arg(long)]
    pub output: PathBuf,

    /// Output format: csv or jsonl
    #[arg(long = "to")]
    pub to: Format,

    /// Operation name used for progress and resume (default: derived from
    /// the input and output paths)
    #[arg(long)]
    pub operation_id: Option<String>,

    /// Records per batch and per checkpoint
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
    pub batch_size: usize,

    /// Leave invalid records out of the output
    #[arg(long, default_value_t = false)]
    pub skip_invalid: bool,

    /// Do not validate records
    #[arg(long, default_value_t = false)]
    pub no_validate: bool,

    /// Field every record must carry with a non-empty value (repeatable)
    #[arg(long = "require")]
    pub required_fields: Vec<String>,

    /// Expected number of input records, for percentage and ETA
    #[arg(long)]
    pub total_records: Option<u64>,

    /// Discard stored progress and start over
    #[arg(long, default_value_t = false)]
    pub restart: bool,
}

/// How a transfer run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Totals of this run (not of earlier runs)
    pub summary: TransferSummary,
    /// Input records consumed across all runs
    pub consumed: u64,
    /// Stopped early by a shutdown request
    pub paused: bool,
}

/// Where an earlier run of the operation stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ResumePoint {
    consumed: u64,
    output_bytes: u64,
    columns: Option<Vec<String>>,
}

impl ResumePoint {
    fn from_checkpoint(checkpoint: &CheckpointData) -> Self {
        Self {
            consumed: checkpoint.state_u64(RECORDS_CONSUMED_KEY).unwrap_or(0),
            output_bytes: checkpoint.state_u64(OUTPUT_BYTES_KEY).unwrap_or(0),
            columns: checkpoint
                .state
                .get(COLUMNS_KEY)
                .and_then(Value::as_array)
                .map(|columns| {
                    columns
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                }),
        }
    }

    fn to_state(&self) -> CheckpointState {
        let mut state = CheckpointState::new();
        state.insert(RECORDS_CONSUMED_KEY.into(), self.consumed.into());
        state.insert(OUTPUT_BYTES_KEY.into(), self.output_bytes.into());
        if let Some(columns) = &self.columns {
            state.insert(COLUMNS_KEY.into(), columns.clone().into());
        }
        state
    }
}

/// Encoder chosen at runtime
enum OutputCodec {
    Csv(CsvEncoder),
    Jsonl(JsonLinesEncoder),
}

impl OutputCodec {
    fn new(format: Format, resume: &ResumePoint) -> Self {
        match (format, &resume.columns) {
            (Format::Csv, Some(columns)) if resume.output_bytes > 0 => {
                OutputCodec::Csv(CsvEncoder::appending(columns.clone()))
            }
            (Format::Csv, _) => OutputCodec::Csv(CsvEncoder::new()),
            (Format::Jsonl, _) => OutputCodec::Jsonl(JsonLinesEncoder::new()),
        }
    }

    fn columns(&self) -> Option<Vec<String>> {
        match self {
            OutputCodec::Csv(encoder) => encoder.columns().map(<[String]>::to_vec),
            OutputCodec::Jsonl(_) => None,
        }
    }
}

impl RecordEncoder for OutputCodec {
    fn format(&self) -> &'static str {
        match self {
            OutputCodec::Csv(encoder) => encoder.format(),
            OutputCodec::Jsonl(encoder) => encoder.format(),
        }
    }

    fn begin(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            OutputCodec::Csv(encoder) => encoder.begin(out),
            OutputCodec::Jsonl(encoder) => encoder.begin(out),
        }
    }

    fn encode_record(&mut self, record: &DataRecord, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            OutputCodec::Csv(encoder) => encoder.encode_record(record, out),
            OutputCodec::Jsonl(encoder) => encoder.encode_record(record, out),
        }
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            OutputCodec::Csv(encoder) => encoder.finish(out),
            OutputCodec::Jsonl(encoder) => encoder.finish(out),
        }
    }
}

/// Decoder chosen at runtime
enum InputCodec {
    Csv(CsvDecoder),
    Jsonl(JsonLinesDecoder),
}

impl InputCodec {
    fn new(format: Format) -> Self {
        match format {
            Format::Csv => InputCodec::Csv(CsvDecoder::new()),
            Format::Jsonl => InputCodec::Jsonl(JsonLinesDecoder::new()),
        }
    }
}

impl RecordDecoder for InputCodec {
    fn format(&self) -> &'static str {
        match self {
            InputCodec::Csv(decoder) => decoder.format(),
            InputCodec::Jsonl(decoder) => decoder.format(),
        }
    }

    fn unit_complete(&self, unit: &str) -> bool {
        match self {
            InputCodec::Csv(decoder) => decoder.unit_complete(unit),
            InputCodec::Jsonl(decoder) => decoder.unit_complete(unit),
        }
    }

    fn decode_unit(&mut self, unit: &str, row: u64) -> Result<Option<DataRecord>, DecodeError> {
        match self {
            InputCodec::Csv(decoder) => decoder.decode_unit(unit, row),
            InputCodec::Jsonl(decoder) => decoder.decode_unit(unit, row),
        }
    }
}

fn has_value(record: &DataRecord, field: &str) -> bool {
    match record.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

impl TransferArgs {
    /// Operation id given on the command line or derived from the paths
    pub fn operation_id(&self) -> String {
        self.operation_id.clone().unwrap_or_else(|| {
            format!("{}->{}", self.input.display(), self.output.display())
        })
    }

    fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::default()
            .with_batch_size(self.batch_size)
            .with_validation(!self.no_validate)
            .with_skip_invalid(self.skip_invalid)
    }

    fn pipeline(&self, config: &ProcessorConfig) -> RecordPipeline {
        let pipeline = RecordPipeline::new(config);
        if self.required_fields.is_empty() {
            return pipeline;
        }

        let required = self.required_fields.clone();
        pipeline.with_validator(move |record| {
            let missing: Vec<&str> = required
                .iter()
                .filter(|field| !has_value(record, field))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                Ok(true)
            } else {
                Err(format!("missing required field(s): {}", missing.join(", ")).into())
            }
        })
    }

    /// Execute the transfer
    pub async fn execute(
        &self,
        engine: &EngineConfig,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<(), CliError> {
        if self.input == self.output {
            return Err(CliError::InvalidArgument(
                "input and output must be different files".to_string(),
            ));
        }

        let (progress, outcome) = self.run(engine, shutdown).await?;
        report(format, &progress, &outcome, &self.output)
    }

    /// Run the transfer and return the final progress with the outcome
    pub async fn run(
        &self,
        engine: &EngineConfig,
        shutdown: SharedShutdown,
    ) -> Result<(ProgressInfo, TransferOutcome), CliError> {
        let stores = engine.open_stores().await?;
        let operation_id = self.operation_id();
        let mut tracker = ProgressTracker::new(&operation_id, stores.progress, stores.checkpoints);
        if let Some(total) = self.total_records {
            tracker = tracker.with_total_records(total);
        }

        if self.restart {
            tracker.cleanup().await?;
            info!(operation_id = %operation_id, "Discarded stored state for restart");
        }

        let bar = progress_bar(self.total_records);
        tracker.add_callback({
            let bar = bar.clone();
            move |info: &ProgressInfo| {
                bar.set_position(info.processed_records + info.failed_records);
                bar.set_message(format!("{} failed", info.failed_records));
            }
        });

        let result = ResumableOperation::new(tracker.clone())
            .run(|tracker| self.copy(tracker, shutdown))
            .await;
        bar.finish_and_clear();

        let outcome = result?;
        Ok((tracker.progress(), outcome))
    }

    async fn copy(
        &self,
        tracker: ProgressTracker,
        shutdown: SharedShutdown,
    ) -> Result<TransferOutcome, CliError> {
        let mut point = self.resume_point(&tracker).await?;
        let mut output = open_output(&self.output, point.output_bytes).await?;
        let input = File::open(&self.input)
            .await
            .map_err(|e| CliError::file(&self.input, e))?;

        let config = self.processor_config();
        let importer = StreamImporter::new(InputCodec::new(self.from), config)
            .skip_records(point.consumed);
        let mut exporter = StreamExporter::new(OutputCodec::new(self.to, &point), config)
            .with_pipeline(self.pipeline(&config))
            .with_tracker(tracker.clone());

        let batches = importer.import(BufReader::new(input));
        futures::pin_mut!(batches);

        point.output_bytes += exporter.begin(&mut output).await?;
        let mut paused = false;
        while let Some(batch) = batches.next().await {
            let chunk = exporter.write_chunk(batch?.into_records(), &mut output).await?;
            point.consumed += chunk.consumed;
            point.output_bytes += chunk.bytes;
            if point.columns.is_none() {
                point.columns = exporter.encoder().columns();
            }

            output
                .sync_data()
                .await
                .map_err(|e| CliError::file(&self.output, e))?;
            tracker.save_checkpoint(point.to_state()).await?;

            if shutdown.is_shutdown_requested() {
                info!(
                    operation_id = tracker.operation_id(),
                    consumed = point.consumed,
                    "Pausing transfer on shutdown request"
                );
                tracker.pause().await?;
                paused = true;
                break;
            }
        }

        if !paused {
            exporter.finish(&mut output).await?;
        }

        Ok(TransferOutcome {
            summary: exporter.summary(),
            consumed: point.consumed,
            paused,
        })
    }

    /// Read the last checkpoint, or write the starting one for a fresh run.
    ///
    /// Restoring from the checkpoint rolls the counters back to the last
    /// batch that is known to be in the output.
    async fn resume_point(&self, tracker: &ProgressTracker) -> Result<ResumePoint, CliError> {
        let Some(checkpoint) = tracker.load_checkpoint().await? else {
            let point = ResumePoint::default();
            tracker.save_checkpoint(point.to_state()).await?;
            return Ok(point);
        };

        let point = ResumePoint::from_checkpoint(&checkpoint);
        if checkpoint.progress.status == OperationStatus::Running {
            tracker.restore_from_checkpoint(&checkpoint);
        }
        info!(
            operation_id = tracker.operation_id(),
            consumed = point.consumed,
            output_bytes = point.output_bytes,
            "Resuming transfer from checkpoint"
        );
        Ok(point)
    }
}

/// Open `path` for writing at `offset`, dropping anything past it
async fn open_output(path: &Path, offset: u64) -> Result<File, CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CliError::file(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| CliError::file(path, e))?;

    let len = file
        .metadata()
        .await
        .map_err(|e| CliError::file(path, e))?
        .len();
    if len < offset {
        return Err(CliError::InvalidArgument(format!(
            "{path:?} holds {len} bytes but the checkpoint expects {offset}; pass --restart to start over"
        )));
    }

    file.set_len(offset)
        .await
        .map_err(|e| CliError::file(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| CliError::file(path, e))?;
    Ok(file)
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
            {
                bar.set_style(style);
            }
            bar
        }
    }
}

fn report(
    format: OutputFormat,
    progress: &ProgressInfo,
    outcome: &TransferOutcome,
    output: &Path,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "operationId": progress.operation_id,
                "status": progress.status,
                "paused": outcome.paused,
                "output": output.display().to_string(),
                "recordsWritten": outcome.summary.records,
                "recordsFailed": outcome.summary.failed,
                "bytesWritten": outcome.summary.bytes,
                "recordsConsumed": outcome.consumed,
                "progress": progress,
            });
            println!("{}", serde_json::to_string(&report)?);
        }
        OutputFormat::Human => {
            if outcome.paused {
                println!("\nTransfer paused; run the same command again to resume.");
            } else {
                println!("\nTransfer completed successfully!");
            }
            println!("Operation: {}", progress.operation_id);
            println!("Output: {}", output.display());
            println!("Records written: {}", outcome.summary.records);
            println!("Records failed: {}", outcome.summary.failed);
            println!("Input records consumed: {}", outcome.consumed);
            println!("{}", progress.format_progress());
        }
    }
    Ok(())
}
