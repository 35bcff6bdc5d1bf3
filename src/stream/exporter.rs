//! Batch sequence -> byte sink
//!
//! Incoming batches are re-chunked to the configured batch size. Each chunk
//! is run through the pipeline, encoded into one buffer, written and flushed,
//! and only then reported to the tracker, so reported progress never runs
//! ahead of the sink.

use super::{
    EncodeError, ProcessorConfig, RecordEncoder, RecordPipeline, TransferError, TransferSummary,
};
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::record::{DataBatch, DataRecord};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Result of writing one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Records taken from the input
    pub consumed: u64,
    /// Valid records written
    pub written: u64,
    /// Invalid records (written or skipped)
    pub failed: u64,
    /// Bytes written
    pub bytes: u64,
}

/// Drives an encoder over a batch sequence
pub struct StreamExporter<E: RecordEncoder> {
    encoder: E,
    pipeline: RecordPipeline,
    config: ProcessorConfig,
    tracker: Option<ProgressTracker>,
    summary: TransferSummary,
    started: bool,
}

impl<E: RecordEncoder> StreamExporter<E> {
    /// Exporter with a pass-through pipeline
    pub fn new(encoder: E, config: ProcessorConfig) -> Self {
        Self {
            pipeline: RecordPipeline::new(&config),
            encoder,
            config,
            tracker: None,
            summary: TransferSummary::default(),
            started: false,
        }
    }

    /// Replace the pipeline
    pub fn with_pipeline(mut self, pipeline: RecordPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Report progress to `tracker` after every chunk
    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Totals so far
    pub fn summary(&self) -> TransferSummary {
        self.summary
    }

    /// The encoder, e.g. to read columns it settled on
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Export a lazy batch sequence, then finish the output
    pub async fn export<S, W>(
        &mut self,
        batches: S,
        sink: &mut W,
    ) -> Result<TransferSummary, TransferError>
    where
        S: Stream<Item = Result<DataBatch, TransferError>>,
        W: AsyncWrite + Unpin,
    {
        let batch_size = self.config.effective_batch_size();
        futures::pin_mut!(batches);

        self.begin(sink).await?;
        let mut pending: Vec<DataRecord> = Vec::with_capacity(batch_size);
        while let Some(batch) = batches.next().await {
            for record in batch? {
                pending.push(record);
                if pending.len() == batch_size {
                    let chunk = std::mem::replace(&mut pending, Vec::with_capacity(batch_size));
                    self.write_chunk(chunk, sink).await?;
                }
            }
        }
        if !pending.is_empty() {
            self.write_chunk(pending, sink).await?;
        }
        self.finish(sink).await?;

        info!(
            format = self.encoder.format(),
            records = self.summary.records,
            failed = self.summary.failed,
            bytes = self.summary.bytes,
            batches = self.summary.batches,
            "Export finished"
        );
        Ok(self.summary)
    }

    /// Export already-materialized batches
    pub async fn export_batches<I, W>(
        &mut self,
        batches: I,
        sink: &mut W,
    ) -> Result<TransferSummary, TransferError>
    where
        I: IntoIterator<Item = DataBatch>,
        W: AsyncWrite + Unpin,
    {
        let stream = futures::stream::iter(batches.into_iter().map(Ok));
        self.export(stream, sink).await
    }

    /// Emit the encoder preamble once
    pub async fn begin<W>(&mut self, sink: &mut W) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        if self.started {
            return Ok(0);
        }
        self.started = true;

        let mut buf = Vec::new();
        self.encoder
            .begin(&mut buf)
            .map_err(|e| self.encode_failure(e))?;
        let bytes = self.write_out(&buf, sink).await?;
        self.report_bytes(bytes)?;
        Ok(bytes)
    }

    /// Process, encode and write one chunk as given (no re-chunking)
    pub async fn write_chunk<W>(
        &mut self,
        mut records: Vec<DataRecord>,
        sink: &mut W,
    ) -> Result<ChunkOutcome, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        self.begin(sink).await?;

        let mut outcome = ChunkOutcome {
            consumed: records.len() as u64,
            ..ChunkOutcome::default()
        };
        let mut buf = Vec::new();

        for record in records.iter_mut() {
            let valid = self.pipeline.process(record);
            if !valid && self.config.skip_invalid {
                outcome.failed += 1;
                continue;
            }

            match self.encoder.encode_record(record, &mut buf) {
                Ok(()) if valid => outcome.written += 1,
                Ok(()) => outcome.failed += 1,
                Err(EncodeError::Record(message)) => {
                    debug!(record_id = record.id(), error = %message, "Record not encodable");
                    record.add_error(format!("Encode error: {message}"));
                    outcome.failed += 1;
                }
                Err(e @ EncodeError::Fatal(_)) => return Err(self.encode_failure(e)),
            }
        }

        outcome.bytes = self.write_out(&buf, sink).await?;
        self.summary.records += outcome.written;
        self.summary.failed += outcome.failed;
        self.summary.batches += 1;

        if let Some(tracker) = &self.tracker {
            tracker.update(
                ProgressUpdate::new()
                    .processed(outcome.written)
                    .failed(outcome.failed)
                    .bytes(outcome.bytes)
                    .current_batch(self.summary.batches),
            )?;
        }

        debug!(
            format = self.encoder.format(),
            batch = self.summary.batches,
            written = outcome.written,
            failed = outcome.failed,
            bytes = outcome.bytes,
            "Chunk exported"
        );
        Ok(outcome)
    }

    /// Emit the encoder epilogue and flush the sink
    pub async fn finish<W>(&mut self, sink: &mut W) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        self.begin(sink).await?;
        let mut buf = Vec::new();
        self.encoder
            .finish(&mut buf)
            .map_err(|e| self.encode_failure(e))?;
        let bytes = self.write_out(&buf, sink).await?;
        self.report_bytes(bytes)?;
        Ok(bytes)
    }

    fn report_bytes(&self, bytes: u64) -> Result<(), TransferError> {
        if bytes == 0 {
            return Ok(());
        }
        if let Some(tracker) = &self.tracker {
            tracker.update(ProgressUpdate::new().bytes(bytes))?;
        }
        Ok(())
    }

    async fn write_out<W>(&mut self, buf: &[u8], sink: &mut W) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        if buf.is_empty() {
            return Ok(0);
        }
        let format = self.encoder.format();
        sink.write_all(buf)
            .await
            .map_err(|source| TransferError::Sink { format, source })?;
        sink.flush()
            .await
            .map_err(|source| TransferError::Sink { format, source })?;

        let bytes = buf.len() as u64;
        self.summary.bytes += bytes;
        Ok(bytes)
    }

    fn encode_failure(&self, err: EncodeError) -> TransferError {
        TransferError::Encode {
            format: self.encoder.format(),
            message: err.to_string(),
        }
    }
}
