//! Configuration module for fleet-billing-service.

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct FleetBillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// External billing inputs: the applicable tax rate, the reporting currency
/// of the console, and the conversion rate into it for foreign-currency
/// contracts. The engine never reads these from the environment itself.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub tax_rate: Decimal,
    pub reporting_currency: String,
    pub exchange_rate: Decimal,
}

fn decimal_var(name: &str, default: &str) -> Result<Decimal, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw)
        .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is not a valid decimal", name)))
}

impl FleetBillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "fleet-billing-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            },
            billing: BillingConfig {
                tax_rate: decimal_var("TAX_RATE", "0.19")?,
                reporting_currency: env::var("REPORTING_CURRENCY")
                    .unwrap_or_else(|_| "EUR".to_string()),
                exchange_rate: decimal_var("EXCHANGE_RATE", "1")?,
            },
        })
    }
}
