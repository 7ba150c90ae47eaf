//! Lease contract model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Pricing model of a lease contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    CostPerCopy,
    FixedCostPerQuantity,
    MonthlyFixed,
    AnnualFixed,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::CostPerCopy => "cost_per_copy",
            ContractType::FixedCostPerQuantity => "fixed_cost_per_quantity",
            ContractType::MonthlyFixed => "monthly_fixed",
            ContractType::AnnualFixed => "annual_fixed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "fixed_cost_per_quantity" => ContractType::FixedCostPerQuantity,
            "monthly_fixed" => ContractType::MonthlyFixed,
            "annual_fixed" => ContractType::AnnualFixed,
            _ => ContractType::CostPerCopy,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            ContractType::CostPerCopy => 1,
            ContractType::FixedCostPerQuantity => 2,
            ContractType::MonthlyFixed => 3,
            ContractType::AnnualFixed => 4,
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => ContractType::FixedCostPerQuantity,
            3 => ContractType::MonthlyFixed,
            4 => ContractType::AnnualFixed,
            _ => ContractType::CostPerCopy,
        }
    }
}

/// Contract lifecycle status. Only active contracts are billable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Expired,
    Cancelled,
    Suspended,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Expired => "expired",
            ContractStatus::Cancelled => "cancelled",
            ContractStatus::Suspended => "suspended",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "expired" => ContractStatus::Expired,
            "cancelled" => ContractStatus::Cancelled,
            "suspended" => ContractStatus::Suspended,
            _ => ContractStatus::Active,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            ContractStatus::Active => 1,
            ContractStatus::Expired => 2,
            ContractStatus::Cancelled => 3,
            ContractStatus::Suspended => 4,
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => ContractStatus::Expired,
            3 => ContractStatus::Cancelled,
            4 => ContractStatus::Suspended,
            _ => ContractStatus::Active,
        }
    }
}

/// A supplier lease contract covering one or more devices.
///
/// `fixed_monthly_cost * 12 == fixed_annual_cost` is a console convenience,
/// not an enforced invariant; the two may diverge when edited independently.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaseContract {
    pub contract_id: Uuid,
    pub tenant_id: Uuid,
    pub contract_number: String,
    pub name: String,
    pub supplier: Option<String>,
    pub contract_type: String,
    pub cost_bw_per_copy: Decimal,
    pub cost_color_per_copy: Decimal,
    pub fixed_monthly_cost: Decimal,
    pub fixed_annual_cost: Decimal,
    pub included_copies_bw: i64,
    pub included_copies_color: i64,
    pub currency: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LeaseContract {
    pub fn contract_type(&self) -> ContractType {
        ContractType::from_string(&self.contract_type)
    }

    pub fn status(&self) -> ContractStatus {
        ContractStatus::from_string(&self.status)
    }
}

/// Input for creating a contract.
#[derive(Debug, Clone)]
pub struct CreateContract {
    pub contract_number: String,
    pub name: String,
    pub supplier: Option<String>,
    pub contract_type: ContractType,
    pub cost_bw_per_copy: Decimal,
    pub cost_color_per_copy: Decimal,
    pub fixed_monthly_cost: Decimal,
    pub fixed_annual_cost: Decimal,
    pub included_copies_bw: i64,
    pub included_copies_color: i64,
    pub currency: String,
}

/// Filter parameters for listing contracts.
#[derive(Debug, Clone, Default)]
pub struct ListContractsFilter {
    pub status: Option<ContractStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
