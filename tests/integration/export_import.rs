//! Import/export drivers wired together across codecs

use futures::TryStreamExt;
use resumable_transfer::progress::{ProgressTracker, TrackerConfig};
use resumable_transfer::record::RAW_FIELD;
use resumable_transfer::store::{MemoryCheckpointStore, MemoryProgressStore};
use resumable_transfer::stream::{
    CsvDecoder, CsvEncoder, JsonLinesDecoder, JsonLinesEncoder, ProcessorConfig, RecordPipeline,
    StreamExporter, StreamImporter, TransferError,
};
use serde_json::{json, Value};
use std::sync::Arc;

const ORDERS_CSV: &str = "id,customer,amount\n\
1,alice,10\n\
2,bob,-4\n\
3,\"carol, jr\",7\n\
4,dave,0\n\
5,erin,12\n";

async fn tracker(id: &str) -> ProgressTracker {
    let tracker = ProgressTracker::with_config(
        id,
        Arc::new(MemoryProgressStore::new()),
        Arc::new(MemoryCheckpointStore::new()),
        TrackerConfig {
            auto_save: false,
            ..TrackerConfig::default()
        },
    );
    tracker.initialize().await.unwrap();
    tracker
}

fn positive_amount(config: &ProcessorConfig) -> RecordPipeline {
    RecordPipeline::new(config).with_validator(|record| {
        let amount: i64 = record
            .get("amount")
            .and_then(Value::as_str)
            .ok_or("amount missing")?
            .parse()?;
        Ok(amount > 0)
    })
}

#[tokio::test]
async fn test_csv_to_jsonl_with_tracker() {
    let tracker = tracker("csv-to-jsonl").await;
    let config = ProcessorConfig::default().with_batch_size(2);

    let batches = StreamImporter::new(CsvDecoder::new(), config).import(ORDERS_CSV.as_bytes());
    let mut exporter =
        StreamExporter::new(JsonLinesEncoder::new(), config).with_tracker(tracker.clone());

    let mut sink = Vec::new();
    let summary = exporter.export(batches, &mut sink).await.unwrap();
    assert_eq!(summary.records, 5);
    assert_eq!(summary.batches, 3);

    let text = String::from_utf8(sink).unwrap();
    let rows: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 5);
    assert_eq!(
        rows[2],
        json!({"id": "3", "customer": "carol, jr", "amount": "7"})
    );

    let info = tracker.progress();
    assert_eq!(info.processed_records, 5);
    assert_eq!(info.bytes_processed, text.len() as u64);
    assert_eq!(info.current_batch, 3);
}

#[tokio::test]
async fn test_skip_invalid_counts_rejected_records() {
    let tracker = tracker("skip-invalid").await;
    let config = ProcessorConfig::default().with_skip_invalid(true);

    let batches = StreamImporter::new(CsvDecoder::new(), config).import(ORDERS_CSV.as_bytes());
    let mut exporter = StreamExporter::new(CsvEncoder::new(), config)
        .with_pipeline(positive_amount(&config))
        .with_tracker(tracker.clone());

    let mut sink = Vec::new();
    let summary = exporter.export(batches, &mut sink).await.unwrap();
    assert_eq!(summary.records, 3);
    assert_eq!(summary.failed, 2);

    let text = String::from_utf8(sink).unwrap();
    assert_eq!(
        text,
        "id,customer,amount\n1,alice,10\n3,\"carol, jr\",7\n5,erin,12\n"
    );
    assert_eq!(tracker.progress().failed_records, 2);
    assert!((tracker.progress().success_rate() - 60.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_import_keeps_invalid_records_in_batches() {
    let config = ProcessorConfig::default();
    let input = "{\"id\": 1}\nnot json\n\n[1, 2]\n{\"id\": \"x\"}\n";

    let batches: Vec<_> = StreamImporter::new(JsonLinesDecoder::new(), config)
        .import(input.as_bytes())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(batches.len(), 1);

    let batch = &batches[0];
    assert_eq!(batch.len(), 4);
    assert_eq!(batch.valid_count(), 2);
    let invalid: Vec<_> = batch.invalid_records().collect();
    assert_eq!(invalid[0].get(RAW_FIELD), Some(&json!("not json")));
    assert_eq!(invalid[0].source_row_number(), Some(2));
    assert_eq!(invalid[1].source_row_number(), Some(4));
}

#[tokio::test]
async fn test_import_skip_records_resumes_mid_input() {
    let config = ProcessorConfig::default().with_batch_size(10);
    let batches: Vec<_> = StreamImporter::new(CsvDecoder::new(), config)
        .skip_records(3)
        .import(ORDERS_CSV.as_bytes())
        .try_collect()
        .await
        .unwrap();

    let ids: Vec<&str> = batches
        .iter()
        .flat_map(|b| b.records().iter().map(|r| r.id()))
        .collect();
    assert_eq!(ids, vec!["4", "5"]);
}

#[tokio::test]
async fn test_transformer_runs_before_export() {
    let config = ProcessorConfig::default();
    let pipeline = RecordPipeline::new(&config).with_transformer(|record| {
        let upper = record
            .get("customer")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .ok_or("customer missing")?;
        record.payload_mut().insert("customer".into(), json!(upper));
        Ok(())
    });

    let batches = StreamImporter::new(CsvDecoder::new(), config).import(ORDERS_CSV.as_bytes());
    let mut exporter = StreamExporter::new(JsonLinesEncoder::new(), config).with_pipeline(pipeline);

    let mut sink = Vec::new();
    exporter.export(batches, &mut sink).await.unwrap();
    let first: Value = serde_json::from_str(
        String::from_utf8(sink).unwrap().lines().next().unwrap(),
    )
    .unwrap();
    assert_eq!(first["customer"], json!("ALICE"));
}

#[tokio::test]
async fn test_fatal_header_error_aborts_import() {
    let config = ProcessorConfig::default();
    let result: Result<Vec<_>, _> = StreamImporter::new(CsvDecoder::new(), config)
        .import("id,id\n1,2\n".as_bytes())
        .try_collect()
        .await;

    assert!(matches!(
        result,
        Err(TransferError::Decode { format: "csv", row: 1, .. })
    ));
}
