//! Line-delimited JSON codec: one object per line

use super::{DecodeError, EncodeError, RecordDecoder, RecordEncoder};
use crate::record::DataRecord;
use serde_json::Value;

const FORMAT: &str = "jsonl";

/// Field used for record ids when present
pub const ID_FIELD: &str = "id";

/// Writes each record's payload as one compact JSON line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesEncoder;

impl JsonLinesEncoder {
    /// Create an encoder
    pub fn new() -> Self {
        Self
    }
}

impl RecordEncoder for JsonLinesEncoder {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn encode_record(&mut self, record: &DataRecord, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        serde_json::to_writer(&mut *out, record.payload())
            .map_err(|e| EncodeError::Record(e.to_string()))?;
        out.push(b'\n');
        Ok(())
    }
}

/// Reads one JSON object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesDecoder;

impl JsonLinesDecoder {
    /// Create a decoder
    pub fn new() -> Self {
        Self
    }
}

impl RecordDecoder for JsonLinesDecoder {
    fn format(&self) -> &'static str {
        FORMAT
    }

    fn decode_unit(&mut self, unit: &str, row: u64) -> Result<Option<DataRecord>, DecodeError> {
        let line = unit.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let payload = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(DecodeError::Malformed(format!(
                    "expected a JSON object, found {}",
                    kind(&other)
                )))
            }
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        };

        let id = match payload.get(ID_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => row.to_string(),
        };

        DataRecord::new(id, payload)
            .map(Some)
            .map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
