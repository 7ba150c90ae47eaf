//! Invoice model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. An invoice is immutable once sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            InvoiceStatus::Draft => 1,
            InvoiceStatus::Sent => 2,
            InvoiceStatus::Paid => 3,
            InvoiceStatus::Overdue => 4,
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => InvoiceStatus::Sent,
            3 => InvoiceStatus::Paid,
            4 => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }
}

/// One invoice for one (contract, period) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub contract_id: Uuid,
    pub period_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub status: String,
    pub anomaly_count: i32,
    pub created_utc: DateTime<Utc>,
    pub sent_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// One line on an invoice: a device's priced usage, or the contract-level
/// fixed fee (device_id absent).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLine {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub device_id: Option<Uuid>,
    pub description: String,
    pub usage_bw: i64,
    pub usage_color: i64,
    pub usage_total: i64,
    pub allowance_bw_consumed: i64,
    pub allowance_color_consumed: i64,
    pub amount: Decimal,
    pub anomaly: bool,
    pub created_utc: DateTime<Utc>,
}

/// Line content produced by the aggregator, before persistence.
#[derive(Debug, Clone)]
pub struct NewInvoiceLine {
    pub device_id: Option<Uuid>,
    pub description: String,
    pub usage_bw: i64,
    pub usage_color: i64,
    pub usage_total: i64,
    pub allowance_bw_consumed: i64,
    pub allowance_color_consumed: i64,
    pub amount: Decimal,
    pub anomaly: bool,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub contract_id: Option<Uuid>,
    pub period_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
