//! Exchange-rate provider boundary.
//!
//! The engine consumes a single numeric rate per invoice build. How rates
//! are obtained is a deployment concern; the default implementation serves
//! the rate configured for the reporting currency.

use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;

/// Supplies one exchange-rate snapshot at invoice-build time.
#[async_trait]
pub trait ExchangeRates: Send + Sync {
    async fn rate(&self, from_currency: &str, to_currency: &str) -> Result<Decimal, AppError>;
}

/// Config-backed provider: identity for same-currency pairs, otherwise the
/// single configured conversion rate into the reporting currency.
pub struct FixedRates {
    reporting_currency: String,
    rate_to_reporting: Decimal,
}

impl FixedRates {
    pub fn new(reporting_currency: impl Into<String>, rate_to_reporting: Decimal) -> Self {
        Self {
            reporting_currency: reporting_currency.into(),
            rate_to_reporting,
        }
    }
}

#[async_trait]
impl ExchangeRates for FixedRates {
    async fn rate(&self, from_currency: &str, to_currency: &str) -> Result<Decimal, AppError> {
        if from_currency == to_currency {
            return Ok(Decimal::ONE);
        }
        if to_currency != self.reporting_currency {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "no exchange rate configured for {} -> {}",
                from_currency,
                to_currency
            )));
        }
        Ok(self.rate_to_reporting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_currency_is_identity() {
        let rates = FixedRates::new("EUR", "1.10".parse().unwrap());
        assert_eq!(rates.rate("EUR", "EUR").await.unwrap(), Decimal::ONE);
    }

    #[tokio::test]
    async fn conversion_into_reporting_currency_uses_configured_rate() {
        let rates = FixedRates::new("USD", "1.10".parse().unwrap());
        assert_eq!(
            rates.rate("EUR", "USD").await.unwrap(),
            "1.10".parse::<Decimal>().unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_target_currency_is_rejected() {
        let rates = FixedRates::new("USD", "1.10".parse().unwrap());
        assert!(rates.rate("EUR", "GBP").await.is_err());
    }
}
