//! Billing period lifecycle state machine.
//!
//! `open -> closed -> billed`, strictly forward. Closing a period freezes
//! its snapshot set; a closed period can be invoiced; a billed period is
//! terminal. There is no reopen transition.

use crate::billing::error::BillingError;
use crate::models::PeriodStatus;

/// Whether new meter readings may be written against a period.
pub fn accepts_readings(status: PeriodStatus) -> bool {
    status == PeriodStatus::Open
}

/// Whether invoices may be generated for a period.
pub fn accepts_invoicing(status: PeriodStatus) -> bool {
    status == PeriodStatus::Closed
}

/// Transition `open -> closed`.
pub fn close(status: PeriodStatus) -> Result<PeriodStatus, BillingError> {
    match status {
        PeriodStatus::Open => Ok(PeriodStatus::Closed),
        other => Err(BillingError::PeriodAlreadyClosed(
            other.as_str().to_string(),
        )),
    }
}

/// Transition `closed -> billed`. The caller is responsible for verifying
/// that every billable contract has an invoice before requesting this.
pub fn mark_billed(status: PeriodStatus) -> Result<PeriodStatus, BillingError> {
    match status {
        PeriodStatus::Closed => Ok(PeriodStatus::Billed),
        PeriodStatus::Open => Err(BillingError::PeriodNotClosed("open".to_string())),
        PeriodStatus::Billed => Err(BillingError::PeriodAlreadyClosed("billed".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_period_accepts_readings() {
        assert!(accepts_readings(PeriodStatus::Open));
        assert!(!accepts_readings(PeriodStatus::Closed));
        assert!(!accepts_readings(PeriodStatus::Billed));
    }

    #[test]
    fn only_closed_period_accepts_invoicing() {
        assert!(!accepts_invoicing(PeriodStatus::Open));
        assert!(accepts_invoicing(PeriodStatus::Closed));
        assert!(!accepts_invoicing(PeriodStatus::Billed));
    }

    #[test]
    fn close_is_one_way() {
        assert_eq!(close(PeriodStatus::Open).unwrap(), PeriodStatus::Closed);
        assert!(close(PeriodStatus::Closed).is_err());
        assert!(close(PeriodStatus::Billed).is_err());
    }

    #[test]
    fn billed_requires_closed_first() {
        assert!(mark_billed(PeriodStatus::Open).is_err());
        assert_eq!(
            mark_billed(PeriodStatus::Closed).unwrap(),
            PeriodStatus::Billed
        );
        assert!(mark_billed(PeriodStatus::Billed).is_err());
    }
}
