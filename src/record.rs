//! Record model shared by every codec
//!
//! A [`DataRecord`] is one logical unit of transferred data. Records travel in
//! ordered [`DataBatch`]es; the valid/invalid views of a batch are computed on
//! demand so they always partition the batch exactly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered field map carried by a record
pub type Payload = Map<String, Value>;

/// Field name used for the raw text of a unit that could not be decoded
pub const RAW_FIELD: &str = "_raw";

/// Record construction errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    /// Payload has no fields
    #[error("record '{id}' has an empty payload")]
    EmptyPayload {
        /// Record identifier
        id: String,
    },
}

/// One logical unit of transferred data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    id: String,
    payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_row_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    validation_errors: Vec<String>,
    #[serde(default = "default_valid")]
    is_valid: bool,
}

fn default_valid() -> bool {
    true
}

impl DataRecord {
    /// Create a valid record. Fails when the payload is empty.
    pub fn new(id: impl Into<String>, payload: Payload) -> Result<Self, RecordError> {
        let id = id.into();
        if payload.is_empty() {
            return Err(RecordError::EmptyPayload { id });
        }
        Ok(Self {
            id,
            payload,
            source_row_number: None,
            validation_errors: Vec::new(),
            is_valid: true,
        })
    }

    /// Build the diagnostic record for an input unit that failed to decode.
    ///
    /// The raw text is kept under [`RAW_FIELD`] so the payload is never empty.
    pub fn invalid(
        id: impl Into<String>,
        source_row_number: Option<u64>,
        raw: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut payload = Payload::new();
        payload.insert(RAW_FIELD.to_string(), Value::String(raw.into()));
        Self {
            id: id.into(),
            payload,
            source_row_number,
            validation_errors: vec![message.into()],
            is_valid: false,
        }
    }

    /// Attach a positional hint for diagnostics
    pub fn with_source_row(mut self, row: u64) -> Self {
        self.source_row_number = Some(row);
        self
    }

    /// Record identifier (unique within its batch)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Field map
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Mutable field map, used by transformers
    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Look up a single field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Positional hint from the source, if any
    pub fn source_row_number(&self) -> Option<u64> {
        self.source_row_number
    }

    /// Accumulated validation messages, in the order they were raised
    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }

    /// Whether the record passed validation and transformation
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Append a validation message and mark the record invalid
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.validation_errors.push(message.into());
        self.is_valid = false;
    }

    /// Override the validity flag without touching the messages
    pub fn set_valid(&mut self, valid: bool) {
        self.is_valid = valid;
    }

    /// Consume the record and return its payload
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// An ordered group of records moved as one unit of I/O
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    records: Vec<DataRecord>,
}

impl DataBatch {
    /// Create a batch from records, keeping their order
    pub fn new(records: Vec<DataRecord>) -> Self {
        Self { records }
    }

    /// All records in production order
    pub fn records(&self) -> &[DataRecord] {
        &self.records
    }

    /// Mutable access for in-place validation and transformation
    pub fn records_mut(&mut self) -> &mut [DataRecord] {
        &mut self.records
    }

    /// Records whose `is_valid` flag is set
    pub fn valid_records(&self) -> impl Iterator<Item = &DataRecord> {
        self.records.iter().filter(|r| r.is_valid())
    }

    /// Complement of [`DataBatch::valid_records`]
    pub fn invalid_records(&self) -> impl Iterator<Item = &DataRecord> {
        self.records.iter().filter(|r| !r.is_valid())
    }

    /// Number of valid records
    pub fn valid_count(&self) -> usize {
        self.valid_records().count()
    }

    /// Number of invalid records
    pub fn invalid_count(&self) -> usize {
        self.invalid_records().count()
    }

    /// Append a record at the end of the batch
    pub fn push(&mut self, record: DataRecord) {
        self.records.push(record);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the batch and return its records
    pub fn into_records(self) -> Vec<DataRecord> {
        self.records
    }
}

impl FromIterator<DataRecord> for DataBatch {
    fn from_iter<I: IntoIterator<Item = DataRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DataBatch {
    type Item = DataRecord;
    type IntoIter = std::vec::IntoIter<DataRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
