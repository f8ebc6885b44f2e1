//! Prometheus metrics for documents-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Document operations by type and action.
pub static DOCUMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "documents_operations_total",
        "Total number of document operations by type and action",
        &["document_type", "action"] // create, finalize, send, pay, cancel, ...
    )
    .expect("Failed to register documents_operations_total")
});

/// Sequence number collisions between concurrent writers.
pub static NUMBER_COLLISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "documents_number_collisions_total",
        "Total number of sequence number collisions by document type",
        &["document_type"]
    )
    .expect("Failed to register number_collisions_total")
});

/// Compliance operations by outcome.
pub static COMPLIANCE_SUBMISSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "documents_compliance_operations_total",
        "Total number of compliance authority operations by outcome",
        &["operation", "outcome"] // submitted, rejected, failed
    )
    .expect("Failed to register compliance_operations_total")
});

/// Compliance authority request duration histogram.
pub static COMPLIANCE_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "documents_compliance_request_duration_seconds",
        "Compliance authority request duration in seconds",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register compliance_request_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "documents_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Audit entries that could not be written.
pub static AUDIT_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "documents_audit_failures_total",
        "Total number of audit entries dropped by action",
        &["action"]
    )
    .expect("Failed to register audit_failures_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "documents_payment_amount_total",
        "Total payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DOCUMENTS_TOTAL);
    Lazy::force(&NUMBER_COLLISIONS_TOTAL);
    Lazy::force(&COMPLIANCE_SUBMISSIONS_TOTAL);
    Lazy::force(&COMPLIANCE_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&AUDIT_FAILURES_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
