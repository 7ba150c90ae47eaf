//! Meter snapshot model.
//!
//! One row per (device, billing period) holding the absolute counter values
//! at reading time, the previous period's counters copied at write time, and
//! the derived clamped deltas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a reading was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMethod {
    Manual,
    Snmp,
    Automatic,
}

impl ReadingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingMethod::Manual => "manual",
            ReadingMethod::Snmp => "snmp",
            ReadingMethod::Automatic => "automatic",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "snmp" => ReadingMethod::Snmp,
            "automatic" => ReadingMethod::Automatic,
            _ => ReadingMethod::Manual,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            ReadingMethod::Manual => 1,
            ReadingMethod::Snmp => 2,
            ReadingMethod::Automatic => 3,
        }
    }

    pub fn from_proto(value: i32) -> Self {
        match value {
            2 => ReadingMethod::Snmp,
            3 => ReadingMethod::Automatic,
            _ => ReadingMethod::Manual,
        }
    }
}

/// One device's absolute meter reading for one billing period.
///
/// Invariant: `prints_x = max(0, current_x - previous_x)` for every channel,
/// recomputed on every write. A locked snapshot rejects writes until it is
/// explicitly unlocked.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MeterSnapshot {
    pub snapshot_id: Uuid,
    pub device_id: Uuid,
    pub period_id: Uuid,
    pub tenant_id: Uuid,
    pub bw_count: i64,
    pub color_count: Option<i64>,
    pub total_count: i64,
    pub previous_bw: i64,
    pub previous_color: Option<i64>,
    pub previous_total: i64,
    pub prints_bw: i64,
    pub prints_color: i64,
    pub prints_total: i64,
    pub anomaly: bool,
    pub method: String,
    pub locked: bool,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for recording a meter reading.
#[derive(Debug, Clone)]
pub struct RecordReading {
    pub device_id: Uuid,
    pub period_id: Uuid,
    pub bw_count: i64,
    pub color_count: Option<i64>,
    pub total_count: i64,
    pub method: ReadingMethod,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Filter parameters for listing meter readings.
#[derive(Debug, Clone, Default)]
pub struct ListReadingsFilter {
    pub period_id: Option<Uuid>,
    pub device_id: Option<Uuid>,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
