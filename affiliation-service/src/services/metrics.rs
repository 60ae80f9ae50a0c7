//! Prometheus metrics for affiliation-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec, TextEncoder,
};

/// Affiliation operations by operation and outcome.
pub static OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "affiliation_operations_total",
        "Total number of affiliation operations",
        &["operation", "status"]
    )
    .expect("Failed to register operations_total")
});

/// Affiliation operation duration histogram by operation.
pub static OPERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "affiliation_operation_duration_seconds",
        "Affiliation operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_duration")
});

/// Identities removed or reassigned by committed cascades.
pub static CASCADE_IDENTITIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "affiliation_cascade_identities_total",
        "Total number of identities affected by affiliation cascades",
        &["operation"]
    )
    .expect("Failed to register cascade_identities_total")
});

pub static CERTIFICATES_REVOKED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "affiliation_certificates_revoked_total",
        "Total number of certificates revoked because their affiliation changed"
    )
    .expect("Failed to register certificates_revoked_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "affiliation_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "affiliation_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&OPERATIONS_TOTAL);
    Lazy::force(&OPERATION_DURATION);
    Lazy::force(&CASCADE_IDENTITIES_TOTAL);
    Lazy::force(&CERTIFICATES_REVOKED_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
