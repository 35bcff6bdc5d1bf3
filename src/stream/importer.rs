//! Byte source -> lazy batch sequence
//!
//! The source is read line by line; a decoder may ask for more lines to
//! complete one logical unit (quoted CSV fields spanning newlines). A unit
//! that never completes, within [`MAX_UNIT_LINES`] lines or before the end of
//! input, gives up only its first line as an invalid record and reading
//! resumes at the line after it. Lines that are not UTF-8 become invalid
//! records too. Every decoded unit goes through the pipeline and lands in the
//! current batch, invalid ones included, so callers see exactly what the
//! input held.

use super::{DecodeError, ProcessorConfig, RecordDecoder, RecordPipeline, TransferError};
use crate::config::MAX_UNIT_LINES;
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::record::{DataBatch, DataRecord};
use futures::Stream;
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Drives a decoder over a byte source
pub struct StreamImporter<D: RecordDecoder> {
    decoder: D,
    pipeline: RecordPipeline,
    config: ProcessorConfig,
    tracker: Option<ProgressTracker>,
    skip: u64,
}

impl<D: RecordDecoder + 'static> StreamImporter<D> {
    /// Importer with a pass-through pipeline
    pub fn new(decoder: D, config: ProcessorConfig) -> Self {
        Self {
            pipeline: RecordPipeline::new(&config),
            decoder,
            config,
            tracker: None,
            skip: 0,
        }
    }

    /// Replace the pipeline
    pub fn with_pipeline(mut self, pipeline: RecordPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Report every yielded batch to `tracker`
    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Drop the first `count` decoded records (already handled by an earlier
    /// run of the same operation)
    pub fn skip_records(mut self, count: u64) -> Self {
        self.skip = count;
        self
    }

    /// Lazily decode `source` into batches of at most `batch_size` records
    pub fn import<R>(
        self,
        source: R,
    ) -> impl Stream<Item = Result<DataBatch, TransferError>> + Send
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let state = ImportState {
            importer: self,
            reader: source,
            pending: VecDeque::new(),
            row: 0,
            batches: 0,
            exhausted: false,
        };

        futures::stream::try_unfold(state, |mut state| async move {
            let batch = state.next_batch().await?;
            Ok::<_, TransferError>(batch.map(|batch| (batch, state)))
        })
    }
}

struct ImportState<D: RecordDecoder, R> {
    importer: StreamImporter<D>,
    reader: R,
    /// Lines read past a unit that was given up on, replayed before the reader
    pending: VecDeque<Line>,
    row: u64,
    batches: u64,
    exhausted: bool,
}

struct Line {
    bytes: Vec<u8>,
    row: u64,
}

struct Unit {
    text: String,
    row: u64,
    bytes: u64,
    rejected: Option<DecodeError>,
}

impl<D, R> ImportState<D, R>
where
    D: RecordDecoder,
    R: AsyncBufRead + Unpin,
{
    async fn next_batch(&mut self) -> Result<Option<DataBatch>, TransferError> {
        let batch_size = self.importer.config.effective_batch_size();
        let mut batch = DataBatch::default();
        let mut bytes = 0u64;

        while !self.exhausted && batch.len() < batch_size {
            let Some(unit) = self.read_unit().await? else {
                self.exhausted = true;
                break;
            };
            bytes += unit.bytes;

            let Some(mut record) = self.decode(unit)? else {
                continue;
            };
            if self.importer.skip > 0 {
                self.importer.skip -= 1;
                continue;
            }
            self.importer.pipeline.process(&mut record);
            batch.push(record);
        }

        if batch.is_empty() {
            return Ok(None);
        }

        self.batches += 1;
        let valid = batch.valid_count() as u64;
        let invalid = batch.invalid_count() as u64;
        if let Some(tracker) = &self.importer.tracker {
            tracker.update(
                ProgressUpdate::new()
                    .processed(valid)
                    .failed(invalid)
                    .bytes(bytes)
                    .current_batch(self.batches),
            )?;
        }

        debug!(
            format = self.importer.decoder.format(),
            batch = self.batches,
            valid,
            invalid,
            bytes,
            "Batch imported"
        );
        Ok(Some(batch))
    }

    fn decode(&mut self, unit: Unit) -> Result<Option<DataRecord>, TransferError> {
        let decoder = &mut self.importer.decoder;
        let decoded = match unit.rejected {
            Some(err) => Err(err),
            None => decoder.decode_unit(&unit.text, unit.row),
        };
        match decoded {
            Ok(Some(record)) => Ok(Some(record.with_source_row(unit.row))),
            Ok(None) => Ok(None),
            Err(DecodeError::Malformed(message)) => {
                debug!(row = unit.row, error = %message, "Malformed input unit");
                Ok(Some(DataRecord::invalid(
                    format!("row-{}", unit.row),
                    Some(unit.row),
                    unit.text,
                    message,
                )))
            }
            Err(DecodeError::Fatal(message)) => Err(TransferError::Decode {
                format: decoder.format(),
                row: unit.row,
                message,
            }),
        }
    }

    async fn next_line(&mut self) -> Result<Option<Line>, TransferError> {
        if let Some(line) = self.pending.pop_front() {
            return Ok(Some(line));
        }

        let mut bytes = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut bytes)
            .await
            .map_err(|source| TransferError::Source {
                format: self.importer.decoder.format(),
                source,
            })?;
        if read == 0 {
            return Ok(None);
        }
        self.row += 1;
        Ok(Some(Line {
            bytes,
            row: self.row,
        }))
    }

    async fn read_unit(&mut self) -> Result<Option<Unit>, TransferError> {
        let Some(first) = self.next_line().await? else {
            return Ok(None);
        };
        let row = first.row;
        let mut text = match String::from_utf8(first.bytes) {
            Ok(text) => text,
            Err(err) => {
                let bytes = err.as_bytes().len() as u64;
                let text = String::from_utf8_lossy(err.as_bytes()).into_owned();
                return Ok(Some(Unit {
                    text: trim_line_end(text),
                    row,
                    bytes,
                    rejected: Some(self.importer.decoder.reject_unit("invalid UTF-8")),
                }));
            }
        };

        let first_len = text.len();
        let mut continued = Vec::new();
        while !self.importer.decoder.unit_complete(&text) {
            let next = if continued.len() + 1 < MAX_UNIT_LINES {
                self.next_line().await?
            } else {
                None
            };
            let appended = match next {
                Some(line) => {
                    let ok = match std::str::from_utf8(&line.bytes) {
                        Ok(more) => {
                            text.push_str(more);
                            true
                        }
                        Err(_) => false,
                    };
                    continued.push(line);
                    ok
                }
                None => false,
            };
            if appended {
                continue;
            }

            debug!(row, lines = continued.len() + 1, "Unit never completed");
            for line in continued.into_iter().rev() {
                self.pending.push_front(line);
            }
            text.truncate(first_len);
            return Ok(Some(Unit {
                text: trim_line_end(text),
                row,
                bytes: first_len as u64,
                rejected: Some(self.importer.decoder.reject_unit("unterminated quoted field")),
            }));
        }

        let bytes = text.len() as u64;
        Ok(Some(Unit {
            text: trim_line_end(text),
            row,
            bytes,
            rejected: None,
        }))
    }
}

fn trim_line_end(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
