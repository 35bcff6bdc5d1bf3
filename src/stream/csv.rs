//! Tabular text codec
//!
//! The first row is the header and defines the columns. Scalar values are
//! written as plain text, nested values (arrays, objects) as compact JSON,
//! null as an empty field. Decoded values are always strings: CSV carries no
//! types, and guessing would make round trips lossy.

use super::{DecodeError, EncodeError, RecordDecoder, RecordEncoder};
use crate::record::{DataRecord, Payload};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde_json::Value;
use std::collections::HashSet;

const FORMAT: &str = "csv";

/// Column used for record ids when present
pub const ID_COLUMN: &str = "id";

/// Writes records as CSV rows under a header
#[derive(Debug, Clone, Default)]
pub struct CsvEncoder {
    columns: Option<Vec<String>>,
    header_written: bool,
}

impl CsvEncoder {
    /// Columns are taken from the first record
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue output whose header is already written
    pub fn appending(columns: Vec<String>) -> Self {
        Self {
            columns: Some(columns),
            header_written: true,
        }
    }

    /// Columns in output order, once known
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn write_header(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.header_written {
            return Ok(());
        }
        if let Some(columns) = &self.columns {
            write_row(columns.iter().map(String::as_str), out)?;
            self.header_written = true;
        }
        Ok(())
    }
}

impl RecordEncoder for CsvEncoder {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn begin(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.write_header(out)
    }

    fn encode_record(&mut self, record: &DataRecord, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let payload = record.payload();
        if self.columns.is_none() {
            self.columns = Some(payload.keys().cloned().collect());
        }
        self.write_header(out)?;

        let columns = self.columns.as_deref().unwrap_or_default();
        if let Some(unknown) = payload.keys().find(|key| !columns.contains(key)) {
            return Err(EncodeError::Record(format!(
                "field '{unknown}' is not a column of this output"
            )));
        }

        let fields: Vec<String> = columns
            .iter()
            .map(|column| payload.get(column).map(field_text).unwrap_or_default())
            .collect();
        write_row(fields.iter().map(String::as_str), out)
    }
}

fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn write_row<'a>(
    fields: impl Iterator<Item = &'a str>,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);
    writer
        .write_record(fields)
        .map_err(|e| EncodeError::Fatal(format!("Failed to write row: {e}")))?;
    writer
        .flush()
        .map_err(|e| EncodeError::Fatal(format!("Failed to flush row: {e}")))
}

/// Reads CSV rows into records keyed by the header
#[derive(Debug, Clone, Default)]
pub struct CsvDecoder {
    columns: Option<Vec<String>>,
}

impl CsvDecoder {
    /// Decoder that reads the header from the first row
    pub fn new() -> Self {
        Self::default()
    }

    /// Header read so far
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    fn parse(unit: &str) -> Result<StringRecord, String> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(unit.as_bytes());
        let mut record = StringRecord::new();
        match reader.read_record(&mut record) {
            Ok(true) => Ok(record),
            Ok(false) => Err("empty row".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn read_header(&mut self, unit: &str) -> Result<(), DecodeError> {
        let header = Self::parse(unit)
            .map_err(|e| DecodeError::Fatal(format!("unreadable header: {e}")))?;

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(header.len());
        for (index, name) in header.iter().enumerate() {
            let name = if index == 0 {
                name.trim_start_matches('\u{feff}')
            } else {
                name
            };
            if name.is_empty() {
                return Err(DecodeError::Fatal(format!("header column {} is empty", index + 1)));
            }
            if !seen.insert(name.to_string()) {
                return Err(DecodeError::Fatal(format!("duplicate header column '{name}'")));
            }
            columns.push(name.to_string());
        }

        self.columns = Some(columns);
        Ok(())
    }
}

/// Quote state while scanning a unit. Only a quote at the start of a field
/// opens a quoted field; anywhere else it is literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

impl RecordDecoder for CsvDecoder {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn unit_complete(&self, unit: &str) -> bool {
        let mut state = Scan::FieldStart;
        for b in unit.bytes() {
            state = match (state, b) {
                (Scan::Quoted, b'"') => Scan::QuoteInQuoted,
                (Scan::Quoted, _) => Scan::Quoted,
                (Scan::QuoteInQuoted, b'"') => Scan::Quoted,
                (_, b',' | b'\n' | b'\r') => Scan::FieldStart,
                (Scan::FieldStart, b'"') => Scan::Quoted,
                _ => Scan::Unquoted,
            };
        }
        state != Scan::Quoted
    }

    fn reject_unit(&self, reason: &str) -> DecodeError {
        match self.columns {
            None => DecodeError::Fatal(format!("{reason} in header")),
            Some(_) => DecodeError::Malformed(reason.to_string()),
        }
    }

    fn decode_unit(&mut self, unit: &str, row: u64) -> Result<Option<DataRecord>, DecodeError> {
        if unit.trim().is_empty() {
            return Ok(None);
        }

        let Some(columns) = &self.columns else {
            self.read_header(unit)?;
            return Ok(None);
        };

        let fields = Self::parse(unit).map_err(DecodeError::Malformed)?;
        if fields.len() != columns.len() {
            return Err(DecodeError::Malformed(format!(
                "expected {} fields, found {}",
                columns.len(),
                fields.len()
            )));
        }

        let payload: Payload = columns
            .iter()
            .zip(fields.iter())
            .map(|(column, field)| (column.clone(), Value::String(field.to_string())))
            .collect();

        let id = payload
            .get(ID_COLUMN)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| row.to_string());

        DataRecord::new(id, payload)
            .map(Some)
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}
