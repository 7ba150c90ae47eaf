//! The billing computation core.
//!
//! Pure, storage-free logic: delta calculation between successive meter
//! snapshots, per-device pricing under the contract's pricing model,
//! invoice aggregation, the period lifecycle state machine, and the
//! invoicing wizard sequencer. The services layer feeds it data and
//! persists its results.

pub mod aggregate;
pub mod error;
pub mod lifecycle;
pub mod pricing;
pub mod usage;
pub mod wizard;

pub use aggregate::{build_invoice, InvoiceDraft, RateContext};
pub use error::BillingError;
pub use pricing::{contract_fixed_fee, price_device, Allowance, DeviceCharge, PricingTerms};
pub use usage::{compute_usage, CounterSet, PeriodUsage, UsageSet};
pub use wizard::{WizardAction, WizardError, WizardState, WizardStep};
