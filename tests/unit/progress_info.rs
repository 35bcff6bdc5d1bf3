//! Derived metrics and wire shape of progress snapshots

use chrono::{Duration, TimeZone, Utc};
use resumable_transfer::progress::{OperationStatus, ProgressInfo, ProgressUpdate};
use serde_json::json;

fn info(processed: u64, failed: u64) -> ProgressInfo {
    let mut info = ProgressInfo::new("op");
    info.processed_records = processed;
    info.failed_records = failed;
    info
}

#[test]
fn test_percentage_without_totals_is_zero() {
    assert_eq!(info(500, 0).progress_percentage(), 0.0);
}

#[test]
fn test_percentage_prefers_records_over_bytes() {
    let mut p = info(25, 0);
    p.total_records = Some(100);
    p.bytes_processed = 90;
    p.bytes_total = Some(100);
    assert_eq!(p.progress_percentage(), 25.0);

    p.total_records = None;
    assert_eq!(p.progress_percentage(), 90.0);
}

#[test]
fn test_percentage_is_clamped() {
    let mut p = info(150, 0);
    p.total_records = Some(100);
    assert_eq!(p.progress_percentage(), 100.0);

    p.total_records = Some(0);
    assert_eq!(p.progress_percentage(), 100.0);
}

#[test]
fn test_success_rate_boundaries() {
    assert_eq!(info(0, 0).success_rate(), 100.0);
    assert_eq!(info(10, 0).success_rate(), 100.0);
    assert_eq!(info(0, 10).success_rate(), 0.0);
    assert_eq!(info(3, 1).success_rate(), 75.0);
}

#[test]
fn test_estimate_requires_total_and_throughput() {
    let now = Utc::now();
    let mut p = info(50, 0);
    p.start_time = Some(now - Duration::seconds(10));
    p.last_update = now;

    p.refresh_estimate();
    assert!(p.estimated_completion.is_none(), "no total, no estimate");

    p.total_records = Some(100);
    p.refresh_estimate();
    let eta = p.estimated_completion.unwrap();
    let remaining = (eta - now).num_milliseconds();
    assert!((9_900..=10_100).contains(&remaining), "eta in {remaining}ms");

    p.processed_records = 0;
    p.refresh_estimate();
    assert!(p.estimated_completion.is_none(), "no throughput, no estimate");
}

#[test]
fn test_update_accumulates_and_overwrites_batch() {
    let mut p = info(0, 0);
    p.apply(&ProgressUpdate::new().processed(5).failed(1).bytes(64).current_batch(1));
    p.apply(&ProgressUpdate::new().processed(5).bytes(64).current_batch(2));

    assert_eq!(p.processed_records, 10);
    assert_eq!(p.failed_records, 1);
    assert_eq!(p.bytes_processed, 128);
    assert_eq!(p.current_batch, 2);
}

#[test]
fn test_wire_shape_is_camel_case() {
    let mut p = info(7, 2);
    p.last_update = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    p.status = OperationStatus::Running;
    p.total_records = Some(10);

    let value = serde_json::to_value(&p).unwrap();
    assert_eq!(value["operationId"], json!("op"));
    assert_eq!(value["processedRecords"], json!(7));
    assert_eq!(value["failedRecords"], json!(2));
    assert_eq!(value["totalRecords"], json!(10));
    assert_eq!(value["status"], json!("running"));
    assert!(value.get("errorMessage").is_none());
    assert!(value.get("startTime").is_none());

    let back: ProgressInfo = serde_json::from_value(value).unwrap();
    assert_eq!(back, p);
}

#[test]
fn test_minimal_document_fills_defaults() {
    let doc = json!({ "operationId": "legacy", "lastUpdate": "2024-01-01T00:00:00Z" });
    let p: ProgressInfo = serde_json::from_value(doc).unwrap();
    assert_eq!(p.status, OperationStatus::Pending);
    assert_eq!(p.processed_records, 0);
    assert!(p.total_records.is_none());
}

#[test]
fn test_status_parsing_and_classes() {
    assert_eq!("Completed".parse::<OperationStatus>().unwrap(), OperationStatus::Completed);
    assert!("done".parse::<OperationStatus>().is_err());

    assert!(OperationStatus::Cancelled.is_terminal());
    assert!(!OperationStatus::Paused.is_terminal());
    assert!(OperationStatus::Paused.is_live());
    assert!(!OperationStatus::Pending.is_live());
}

#[test]
fn test_format_progress_mentions_error() {
    let mut p = info(1, 1);
    p.status = OperationStatus::Failed;
    p.error_message = Some("disk full".into());
    let line = p.format_progress();
    assert!(line.starts_with("[failed] 1 processed, 1 failed"));
    assert!(line.ends_with("- error: disk full"));
}
