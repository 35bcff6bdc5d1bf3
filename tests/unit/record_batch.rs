//! Record construction and batch partitioning

use resumable_transfer::record::{DataBatch, DataRecord, Payload, RecordError};
use serde_json::json;

fn record(id: &str, amount: i64) -> DataRecord {
    let mut payload = Payload::new();
    payload.insert("amount".into(), json!(amount));
    DataRecord::new(id, payload).unwrap()
}

#[test]
fn test_empty_payload_rejected() {
    assert_eq!(
        DataRecord::new("x", Payload::new()),
        Err(RecordError::EmptyPayload { id: "x".into() })
    );
}

#[test]
fn test_partition_of_mixed_batch() {
    let mut batch: DataBatch = (0..10).map(|i| record(&i.to_string(), i - 5)).collect();
    for rec in batch.records_mut() {
        if rec.get("amount").and_then(|v| v.as_i64()).unwrap_or(0) < 0 {
            rec.add_error("negative amount");
        }
    }

    assert_eq!(batch.valid_count(), 5);
    assert_eq!(batch.invalid_count(), 5);
    assert_eq!(batch.valid_count() + batch.invalid_count(), batch.len());

    let mut ids: Vec<&str> = batch
        .valid_records()
        .chain(batch.invalid_records())
        .map(DataRecord::id)
        .collect();
    ids.sort_unstable();
    let mut expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    expected.sort_unstable();
    assert_eq!(ids, expected);
}

#[test]
fn test_partition_of_empty_batch() {
    let batch = DataBatch::new(Vec::new());
    assert!(batch.is_empty());
    assert_eq!(batch.valid_records().count(), 0);
    assert_eq!(batch.invalid_records().count(), 0);
}

#[test]
fn test_partition_of_all_invalid_batch() {
    let mut batch = DataBatch::new(vec![record("a", 1), record("b", 2)]);
    for rec in batch.records_mut() {
        rec.add_error("rejected");
    }
    assert_eq!(batch.valid_count(), 0);
    assert_eq!(batch.invalid_count(), 2);
}

#[test]
fn test_set_valid_keeps_messages() {
    let mut rec = record("a", 1);
    rec.add_error("first");
    rec.add_error("second");
    rec.set_valid(true);
    assert!(rec.is_valid());
    assert_eq!(rec.validation_errors(), ["first", "second"]);
}

#[test]
fn test_record_serializes_without_empty_diagnostics() {
    let value = serde_json::to_value(record("a", 1).with_source_row(4)).unwrap();
    assert_eq!(value["id"], json!("a"));
    assert_eq!(value["source_row_number"], json!(4));
    assert!(value.get("validation_errors").is_none());
    assert_eq!(value["is_valid"], json!(true));
}
