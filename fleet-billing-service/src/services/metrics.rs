//! Prometheus metrics for fleet-billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for gRPC requests by method and status.
pub static GRPC_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fleetbilling_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register GRPC_REQUESTS")
});

/// Histogram for gRPC request duration by method.
pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fleetbilling_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register GRPC_REQUEST_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fleetbilling_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for recorded meter readings by method.
pub static READINGS_RECORDED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fleetbilling_readings_recorded_total",
        "Total number of meter readings recorded",
        &["method"]
    )
    .expect("Failed to register READINGS_RECORDED")
});

/// Counter for counter-rollover anomalies flagged at reading time.
pub static ROLLOVER_ANOMALIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fleetbilling_rollover_anomalies_total",
        "Total number of readings flagged with a rollover anomaly",
        &["method"]
    )
    .expect("Failed to register ROLLOVER_ANOMALIES")
});

/// Counter for invoice builds by outcome (created / idempotent / preview).
pub static INVOICES_BUILT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fleetbilling_invoices_built_total",
        "Total number of invoice build requests",
        &["outcome"]
    )
    .expect("Failed to register INVOICES_BUILT")
});

/// Counter for billing period lifecycle transitions.
pub static PERIOD_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fleetbilling_period_transitions_total",
        "Total number of billing period lifecycle transitions",
        &["to_status"]
    )
    .expect("Failed to register PERIOD_TRANSITIONS")
});

/// Counter for errors by type.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fleetbilling_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&READINGS_RECORDED);
    Lazy::force(&ROLLOVER_ANOMALIES);
    Lazy::force(&INVOICES_BUILT);
    Lazy::force(&PERIOD_TRANSITIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record a gRPC request.
pub fn record_grpc_request(method: &str, status: &str) {
    GRPC_REQUESTS.with_label_values(&[method, status]).inc();
}

/// Record gRPC request duration.
pub fn record_grpc_request_duration(method: &str, duration_secs: f64) {
    GRPC_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Record a recorded meter reading.
pub fn record_reading_recorded(method: &str) {
    READINGS_RECORDED.with_label_values(&[method]).inc();
}

/// Record a rollover anomaly.
pub fn record_anomaly(method: &str) {
    ROLLOVER_ANOMALIES.with_label_values(&[method]).inc();
}

/// Record an invoice build outcome.
pub fn record_invoice_build(outcome: &str) {
    INVOICES_BUILT.with_label_values(&[outcome]).inc();
}

/// Record a period lifecycle transition.
pub fn record_period_transition(to_status: &str) {
    PERIOD_TRANSITIONS.with_label_values(&[to_status]).inc();
}
