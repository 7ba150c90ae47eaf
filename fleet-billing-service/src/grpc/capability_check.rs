//! Capability definitions for fleet-billing-service.
//!
//! Re-exports the shared capability infrastructure from service-core and
//! provides service-specific capability constants.

pub use service_core::grpc::{AuthContext, CapabilityChecker};

/// Fleet billing service capabilities.
pub mod capabilities {
    /// Register devices in the fleet inventory.
    pub const FLEETBILLING_DEVICE_CREATE: &str = "fleetbilling.device:create";

    /// View devices.
    pub const FLEETBILLING_DEVICE_READ: &str = "fleetbilling.device:read";

    /// Assign devices to contracts and change device status.
    pub const FLEETBILLING_DEVICE_UPDATE: &str = "fleetbilling.device:update";

    /// Create billing periods.
    pub const FLEETBILLING_PERIOD_CREATE: &str = "fleetbilling.period:create";

    /// View billing periods.
    pub const FLEETBILLING_PERIOD_READ: &str = "fleetbilling.period:read";

    /// Close billing periods and mark them billed.
    pub const FLEETBILLING_PERIOD_TRANSITION: &str = "fleetbilling.period:transition";

    /// Record and import meter readings.
    pub const FLEETBILLING_READING_WRITE: &str = "fleetbilling.reading:write";

    /// View meter readings.
    pub const FLEETBILLING_READING_READ: &str = "fleetbilling.reading:read";

    /// Lock and unlock meter snapshots.
    pub const FLEETBILLING_READING_LOCK: &str = "fleetbilling.reading:lock";

    /// Create lease contracts.
    pub const FLEETBILLING_CONTRACT_CREATE: &str = "fleetbilling.contract:create";

    /// View lease contracts.
    pub const FLEETBILLING_CONTRACT_READ: &str = "fleetbilling.contract:read";

    /// Update contract status.
    pub const FLEETBILLING_CONTRACT_UPDATE: &str = "fleetbilling.contract:update";

    /// Build and preview invoices.
    pub const FLEETBILLING_INVOICE_BUILD: &str = "fleetbilling.invoice:build";

    /// View invoices.
    pub const FLEETBILLING_INVOICE_READ: &str = "fleetbilling.invoice:read";

    /// Send draft invoices.
    pub const FLEETBILLING_INVOICE_SEND: &str = "fleetbilling.invoice:send";

    /// Drive the invoicing wizard.
    pub const FLEETBILLING_WIZARD: &str = "fleetbilling.wizard:advance";
}
