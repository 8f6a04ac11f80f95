//! Prometheus metrics for persistence gateway operations
//!
//! - Operation latencies by store type
//! - Error rates by error kind
//! - Records written by record kind

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Once;
use tracing::info;

use crate::error::StateStoreError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Store operation latency
    pub static ref STORE_OP_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("op_workflow_store_operation_seconds", "Store operation duration")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation", "store_type"]
    ).expect("valid store latency histogram");

    /// Store operation errors
    pub static ref STORE_OP_ERRORS: CounterVec = CounterVec::new(
        Opts::new("op_workflow_store_errors_total", "Store operation errors"),
        &["operation", "store_type", "error_type"]
    ).expect("valid store error counter");

    /// Records written inside committed or pending transactions
    pub static ref RECORDS_WRITTEN: CounterVec = CounterVec::new(
        Opts::new("op_workflow_store_records_written_total", "Records written"),
        &["record", "store_type"]
    ).expect("valid record counter");
}

static INIT: Once = Once::new();

/// Register all metrics with the global registry
pub fn register_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(STORE_OP_DURATION.clone())).ok();
        REGISTRY.register(Box::new(STORE_OP_ERRORS.clone())).ok();
        REGISTRY.register(Box::new(RECORDS_WRITTEN.clone())).ok();
        info!("Persistence gateway metrics registered");
    });
}

/// Observes the elapsed time of a store operation when dropped
pub struct OperationTimer {
    operation: &'static str,
    store_type: &'static str,
    start: std::time::Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str, store_type: &'static str) -> Self {
        Self {
            operation,
            store_type,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        STORE_OP_DURATION
            .with_label_values(&[self.operation, self.store_type])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

/// Record a store error
pub fn record_store_error(operation: &str, store_type: &str, error: &StateStoreError) {
    STORE_OP_ERRORS
        .with_label_values(&[operation, store_type, error.kind()])
        .inc();
}

/// Record one persisted record
pub fn record_written(record: &str, store_type: &str) {
    RECORDS_WRITTEN.with_label_values(&[record, store_type]).inc();
}

/// Pass `result` through, counting it if it is an error
pub fn observe<T>(
    operation: &'static str,
    store_type: &'static str,
    result: Result<T, StateStoreError>,
) -> Result<T, StateStoreError> {
    if let Err(e) = &result {
        // NotFound is an expected answer, not a store fault
        if !matches!(e, StateStoreError::NotFound(_)) {
            record_store_error(operation, store_type, e);
        }
    }
    result
}

/// Get metrics as text for Prometheus scraping
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
