//! Printer device model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Device lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "inactive" => DeviceStatus::Inactive,
            _ => DeviceStatus::Active,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            DeviceStatus::Active => 1,
            DeviceStatus::Inactive => 2,
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => DeviceStatus::Inactive,
            _ => DeviceStatus::Active,
        }
    }
}

/// A physical printer in the fleet inventory.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub device_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub network_address: Option<String>,
    pub serial_number: Option<String>,
    pub color_capable: bool,
    pub multifunction: bool,
    pub contract_id: Option<Uuid>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for registering a device.
#[derive(Debug, Clone)]
pub struct RegisterDevice {
    pub name: String,
    pub network_address: Option<String>,
    pub serial_number: Option<String>,
    pub color_capable: bool,
    pub multifunction: bool,
    pub contract_id: Option<Uuid>,
}

/// Filter parameters for listing devices.
#[derive(Debug, Clone, Default)]
pub struct ListDevicesFilter {
    pub contract_id: Option<Uuid>,
    pub status: Option<DeviceStatus>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
