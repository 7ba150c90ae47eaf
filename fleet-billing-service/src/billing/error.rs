//! Domain errors of the billing engine.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the billing engine and its persistence flows.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// Malformed counters: negative values or mismatched channel arity.
    #[error("invalid reading: {0}")]
    InvalidReading(String),

    /// Write attempted against a locked snapshot.
    #[error("snapshot is locked and must be unlocked before writing")]
    SnapshotLocked,

    /// Reading write attempted against a period that no longer accepts them.
    #[error("billing period is {0} and no longer accepts readings")]
    PeriodClosed(String),

    /// Close requested on a period that is not open.
    #[error("billing period is already {0}")]
    PeriodAlreadyClosed(String),

    /// Invoice generation requires a closed period.
    #[error("billing period must be closed before invoicing (currently {0})")]
    PeriodNotClosed(String),

    /// Invoice generation requires an active contract.
    #[error("contract is {0} and cannot be invoiced")]
    ContractNotBillable(String),

    /// One or more assigned active devices lack a snapshot for the period.
    /// Partial invoicing is not allowed; the ids identify what is missing.
    #[error("missing meter readings for {} device(s)", .0.len())]
    IncompleteReadings(Vec<Uuid>),

    /// A non-draft invoice already exists for this (contract, period).
    #[error("an invoice has already been issued for this contract and period")]
    InvoiceAlreadyExists,

    /// Another invoice build holds the per-(contract, period) lock.
    #[error("invoice generation is already in progress for this contract and period")]
    InvoiceGenerationInProgress,

    /// Send requested on an invoice that is not a draft.
    #[error("invoice is {0} and can no longer be sent")]
    InvoiceNotDraft(String),

    /// Period cannot be marked billed while contracts remain uninvoiced.
    #[error("{} contract(s) have no invoice for this period", .0.len())]
    ContractsNotInvoiced(Vec<Uuid>),
}
