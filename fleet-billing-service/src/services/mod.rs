//! Services module for fleet-billing-service.

pub mod database;
pub mod metrics;
pub mod rates;

pub use database::{Database, StoreError};
pub use metrics::{
    get_metrics, init_metrics, record_anomaly, record_error, record_grpc_request,
    record_grpc_request_duration, record_invoice_build, record_period_transition,
    record_reading_recorded,
};
pub use rates::{ExchangeRates, FixedRates};
