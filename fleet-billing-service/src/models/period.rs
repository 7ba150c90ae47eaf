//! Billing period model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing period lifecycle status.
///
/// Transitions are strictly `open -> closed -> billed`; closing is
/// irreversible and no state may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    Closed,
    Billed,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Open => "open",
            PeriodStatus::Closed => "closed",
            PeriodStatus::Billed => "billed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "closed" => PeriodStatus::Closed,
            "billed" => PeriodStatus::Billed,
            _ => PeriodStatus::Open,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            PeriodStatus::Open => 1,
            PeriodStatus::Closed => 2,
            PeriodStatus::Billed => 3,
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => PeriodStatus::Closed,
            3 => PeriodStatus::Billed,
            _ => PeriodStatus::Open,
        }
    }
}

/// A billing window with an open/closed/billed lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub period_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cut_off_date: NaiveDate,
    pub status: String,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn status(&self) -> PeriodStatus {
        PeriodStatus::from_string(&self.status)
    }
}

/// Input for creating a billing period.
#[derive(Debug, Clone)]
pub struct CreateBillingPeriod {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cut_off_date: NaiveDate,
    pub description: Option<String>,
}

/// Filter parameters for listing billing periods.
#[derive(Debug, Clone, Default)]
pub struct ListPeriodsFilter {
    pub status: Option<PeriodStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
