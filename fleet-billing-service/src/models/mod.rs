//! Domain models for fleet-billing-service.

mod contract;
mod device;
mod invoice;
mod period;
mod snapshot;

pub use contract::{
    ContractStatus, ContractType, CreateContract, LeaseContract, ListContractsFilter,
};
pub use device::{Device, DeviceStatus, ListDevicesFilter, RegisterDevice};
pub use invoice::{Invoice, InvoiceLine, InvoiceStatus, ListInvoicesFilter, NewInvoiceLine};
pub use period::{BillingPeriod, CreateBillingPeriod, ListPeriodsFilter, PeriodStatus};
pub use snapshot::{ListReadingsFilter, MeterSnapshot, ReadingMethod, RecordReading};
