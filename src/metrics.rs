//! Operational metrics for transfers and progress persistence
//!
//! Counters and histograms are emitted through the `metrics` facade, so they
//! cost next to nothing until a recorder is installed. The CLI installs the
//! Prometheus exporter with [`init_metrics`] when `--metrics-addr` is given;
//! library users can install any recorder of their own.
//!
//! ## Metrics
//!
//! - `transfer_records_processed_total` / `transfer_records_failed_total`
//! - `transfer_bytes_total`
//! - `transfer_operations_total{status}` - lifecycle transitions
//! - `transfer_store_errors_total{backend,op}`
//! - `transfer_store_save_duration_seconds{backend}`

use crate::progress::OperationStatus;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize the Prometheus exporter and register metric descriptions.
///
/// Idempotent: later calls return `Ok(())` without rebinding.
pub async fn init_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!(%addr, "Initializing metrics system");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "transfer_records_processed_total",
        Unit::Count,
        "Records written or read successfully"
    );

    describe_counter!(
        "transfer_records_failed_total",
        Unit::Count,
        "Records that failed decoding, transformation or validation"
    );

    describe_counter!(
        "transfer_bytes_total",
        Unit::Bytes,
        "Bytes moved through sinks and sources"
    );

    describe_counter!(
        "transfer_operations_total",
        Unit::Count,
        "Operation lifecycle transitions by resulting status"
    );

    describe_counter!(
        "transfer_store_errors_total",
        Unit::Count,
        "Failed progress or checkpoint store calls"
    );

    describe_histogram!(
        "transfer_store_save_duration_seconds",
        Unit::Seconds,
        "Time spent persisting a progress snapshot"
    );

    *initialized = true;
    info!(%addr, "Metrics system initialized successfully");
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record counter deltas from one progress update
pub fn record_progress(processed: u64, failed: u64, bytes: u64) {
    if processed > 0 {
        counter!("transfer_records_processed_total").increment(processed);
    }
    if failed > 0 {
        counter!("transfer_records_failed_total").increment(failed);
    }
    if bytes > 0 {
        counter!("transfer_bytes_total").increment(bytes);
    }
}

/// Record a lifecycle transition into `status`
pub fn record_transition(status: OperationStatus) {
    counter!("transfer_operations_total", "status" => status.as_str()).increment(1);
}

/// Record a failed store call
pub fn record_store_error(backend: &'static str, op: &'static str) {
    counter!(
        "transfer_store_errors_total",
        "backend" => backend,
        "op" => op,
    )
    .increment(1);
}

/// Times one snapshot save against a backend
pub struct StoreSaveTimer {
    backend: &'static str,
    start_time: Instant,
}

impl StoreSaveTimer {
    /// Start timing a save
    pub fn start(backend: &'static str) -> Self {
        Self {
            backend,
            start_time: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub fn finish(self) {
        let duration = self.start_time.elapsed();
        histogram!(
            "transfer_store_save_duration_seconds",
            "backend" => self.backend,
        )
        .record(duration.as_secs_f64());
    }
}
