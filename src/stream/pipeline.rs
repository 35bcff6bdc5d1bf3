//! Per-record transform and validate with fault isolation.
//!
//! Validators and transformers are caller code. Whatever they do (return an
//! error, panic) ends up as a message in the record's `validation_errors`;
//! it never aborts the stream.

use super::{BoxError, ProcessorConfig, Transformer, Validator};
use crate::panic_message;
use crate::record::{DataBatch, DataRecord};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// Message recorded when a validator rejects a record without erroring
pub const VALIDATION_FAILED: &str = "Validation failed";

/// Validator and transformer applied to every record
#[derive(Clone)]
pub struct RecordPipeline {
    validate: bool,
    validator: Option<Validator>,
    transformer: Option<Transformer>,
}

impl fmt::Debug for RecordPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPipeline")
            .field("validate", &self.validate)
            .field("validator", &self.validator.is_some())
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

impl Default for RecordPipeline {
    fn default() -> Self {
        Self::new(&ProcessorConfig::default())
    }
}

impl RecordPipeline {
    /// Pipeline with no validator or transformer
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            validate: config.validate,
            validator: None,
            transformer: None,
        }
    }

    /// Set the validator
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&DataRecord) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Set the transformer
    pub fn with_transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(&mut DataRecord) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    /// Run the validator against `record`.
    ///
    /// With validation disabled the record is marked valid. Without a
    /// validator every record passes.
    pub fn validate_record(&self, record: &mut DataRecord) -> bool {
        if !self.validate {
            record.set_valid(true);
            return true;
        }
        let Some(validator) = &self.validator else {
            return true;
        };

        match catch_unwind(AssertUnwindSafe(|| validator(record))) {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                if record.validation_errors().is_empty() {
                    record.add_error(VALIDATION_FAILED);
                } else {
                    record.set_valid(false);
                }
                false
            }
            Ok(Err(e)) => {
                record.add_error(format!("Validation error: {e}"));
                false
            }
            Err(payload) => {
                record.add_error(format!(
                    "Validation error: {}",
                    panic_message(payload.as_ref())
                ));
                false
            }
        }
    }

    /// Apply the transformer in place. A failing transformer marks the
    /// record invalid; the record is kept either way.
    pub fn transform_record(&self, record: &mut DataRecord) {
        let Some(transformer) = &self.transformer else {
            return;
        };

        let message = match catch_unwind(AssertUnwindSafe(|| transformer(record))) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        debug!(record_id = record.id(), error = %message, "Transformer failed");
        record.add_error(format!("Transformation error: {message}"));
    }

    /// Transform, then validate. Records that already carry errors (decode
    /// or transform failures) skip validation and stay invalid.
    pub fn process(&self, record: &mut DataRecord) -> bool {
        self.transform_record(record);
        if !record.validation_errors().is_empty() {
            record.set_valid(false);
            return false;
        }
        self.validate_record(record)
    }

    /// [`RecordPipeline::process`] every record of `batch` in order
    pub fn process_batch(&self, batch: &mut DataBatch) {
        for record in batch.records_mut() {
            self.process(record);
        }
    }
}
