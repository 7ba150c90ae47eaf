//! Database service for fleet-billing-service.

use crate::billing::{self, BillingError, InvoiceDraft, RateContext};
use crate::models::{
    BillingPeriod, ContractStatus, CreateBillingPeriod, CreateContract, Device, DeviceStatus,
    Invoice, InvoiceLine, LeaseContract, ListContractsFilter, ListDevicesFilter,
    ListInvoicesFilter, ListPeriodsFilter, ListReadingsFilter, MeterSnapshot, RecordReading,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// Errors surfaced by storage-backed billing flows: either a domain rule
/// violation or an infrastructure failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] BillingError),
    #[error(transparent)]
    Infra(#[from] AppError),
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Stable advisory-lock key for a (contract, period) pair. FNV-1a over both
/// ids so every caller derives the same key for the same pair.
fn invoice_lock_key(contract_id: Uuid, period_id: Uuid) -> i64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in contract_id
        .as_bytes()
        .iter()
        .chain(period_id.as_bytes().iter())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash as i64
}

const DEVICE_COLUMNS: &str = "device_id, tenant_id, name, network_address, serial_number, \
     color_capable, multifunction, contract_id, status, created_utc, updated_utc";

const PERIOD_COLUMNS: &str = "period_id, tenant_id, name, start_date, end_date, cut_off_date, \
     status, description, created_utc, updated_utc";

const SNAPSHOT_COLUMNS: &str = "snapshot_id, device_id, period_id, tenant_id, bw_count, \
     color_count, total_count, previous_bw, previous_color, previous_total, prints_bw, \
     prints_color, prints_total, anomaly, method, locked, notes, recorded_at, created_utc, \
     updated_utc";

const CONTRACT_COLUMNS: &str = "contract_id, tenant_id, contract_number, name, supplier, \
     contract_type, cost_bw_per_copy, cost_color_per_copy, fixed_monthly_cost, \
     fixed_annual_cost, included_copies_bw, included_copies_color, currency, status, \
     created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "invoice_id, tenant_id, invoice_number, contract_id, period_id, \
     period_start, period_end, subtotal, tax_rate, tax_amount, total_amount, currency, \
     exchange_rate, status, anomaly_count, created_utc, sent_utc";

const LINE_COLUMNS: &str = "line_id, invoice_id, device_id, description, usage_bw, usage_color, \
     usage_total, allowance_bw_consumed, allowance_color_consumed, amount, anomaly, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "fleet-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("Health check failed"))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Device Operations
    // =========================================================================

    /// Register a new device.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id))]
    pub async fn register_device(
        &self,
        tenant_id: Uuid,
        input: &crate::models::RegisterDevice,
    ) -> Result<Device, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["register_device"])
            .start_timer();

        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            INSERT INTO devices (device_id, tenant_id, name, network_address, serial_number, color_capable, multifunction, contract_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {DEVICE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&input.name)
        .bind(&input.network_address)
        .bind(&input.serial_number)
        .bind(input.color_capable)
        .bind(input.multifunction)
        .bind(input.contract_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to register device"))?;

        timer.observe_duration();
        info!(device_id = %device.device_id, name = %device.name, "Device registered");

        Ok(device)
    }

    /// Get a device by id.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, device_id = %device_id))]
    pub async fn get_device(
        &self,
        tenant_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<Device>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_device"])
            .start_timer();

        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = $1 AND device_id = $2",
        ))
        .bind(tenant_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get device"))?;

        timer.observe_duration();

        Ok(device)
    }

    /// List devices with optional contract and status filters.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_devices(
        &self,
        tenant_id: Uuid,
        filter: &ListDevicesFilter,
    ) -> Result<Vec<Device>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_devices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let devices = sqlx::query_as::<_, Device>(&format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR contract_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR device_id > $4)
            ORDER BY device_id
            LIMIT $5
            "#,
        ))
        .bind(tenant_id)
        .bind(filter.contract_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list devices"))?;

        timer.observe_duration();

        Ok(devices)
    }

    /// All devices assigned to a contract.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, contract_id = %contract_id))]
    pub async fn contract_devices(
        &self,
        tenant_id: Uuid,
        contract_id: Uuid,
    ) -> Result<Vec<Device>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["contract_devices"])
            .start_timer();

        let devices = sqlx::query_as::<_, Device>(&format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices
            WHERE tenant_id = $1 AND contract_id = $2
            ORDER BY device_id
            "#,
        ))
        .bind(tenant_id)
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list contract devices"))?;

        timer.observe_duration();

        Ok(devices)
    }

    /// Assign a device to a contract, or unassign it with `None`.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, device_id = %device_id))]
    pub async fn assign_device(
        &self,
        tenant_id: Uuid,
        device_id: Uuid,
        contract_id: Option<Uuid>,
    ) -> Result<Option<Device>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_device"])
            .start_timer();

        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            UPDATE devices
            SET contract_id = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND device_id = $2
            RETURNING {DEVICE_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(device_id)
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to assign device"))?;

        timer.observe_duration();

        Ok(device)
    }

    /// Set a device's lifecycle status.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, device_id = %device_id))]
    pub async fn set_device_status(
        &self,
        tenant_id: Uuid,
        device_id: Uuid,
        status: DeviceStatus,
    ) -> Result<Option<Device>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_device_status"])
            .start_timer();

        let device = sqlx::query_as::<_, Device>(&format!(
            r#"
            UPDATE devices
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND device_id = $2
            RETURNING {DEVICE_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(device_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to set device status"))?;

        timer.observe_duration();

        Ok(device)
    }

    // =========================================================================
    // Billing Period Operations
    // =========================================================================

    /// Create a new billing period (always created open).
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id))]
    pub async fn create_period(
        &self,
        tenant_id: Uuid,
        input: &CreateBillingPeriod,
    ) -> Result<BillingPeriod, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            INSERT INTO billing_periods (period_id, tenant_id, name, start_date, end_date, cut_off_date, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&input.name)
        .bind(input.start_date)
        .bind(input.end_date)
        .bind(input.cut_off_date)
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create billing period"))?;

        timer.observe_duration();
        info!(period_id = %period.period_id, name = %period.name, "Billing period created");

        Ok(period)
    }

    /// Get a billing period by id.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, period_id = %period_id))]
    pub async fn get_period(
        &self,
        tenant_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods WHERE tenant_id = $1 AND period_id = $2",
        ))
        .bind(tenant_id)
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get billing period"))?;

        timer.observe_duration();

        Ok(period)
    }

    /// List billing periods, newest first.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_periods(
        &self,
        tenant_id: Uuid,
        filter: &ListPeriodsFilter,
    ) -> Result<Vec<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_periods"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let periods = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            SELECT {PERIOD_COLUMNS}
            FROM billing_periods
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR period_id > $3)
            ORDER BY period_id
            LIMIT $4
            "#,
        ))
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list billing periods"))?;

        timer.observe_duration();

        Ok(periods)
    }

    /// Close an open period. Irreversible; freezes its snapshot set.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, period_id = %period_id))]
    pub async fn close_period(
        &self,
        tenant_id: Uuid,
        period_id: Uuid,
    ) -> Result<BillingPeriod, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["close_period"])
            .start_timer();

        let period = self
            .get_period(tenant_id, period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing period not found")))?;

        let next = billing::lifecycle::close(period.status())?;

        let updated = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            UPDATE billing_periods
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND period_id = $2 AND status = 'open'
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(period_id)
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to close billing period"))?
        .ok_or(BillingError::PeriodAlreadyClosed("closed".to_string()))?;

        timer.observe_duration();
        info!(period_id = %period_id, "Billing period closed");

        Ok(updated)
    }

    /// Mark a closed period billed once every billable contract is invoiced.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, period_id = %period_id))]
    pub async fn mark_period_billed(
        &self,
        tenant_id: Uuid,
        period_id: Uuid,
    ) -> Result<BillingPeriod, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_period_billed"])
            .start_timer();

        let period = self
            .get_period(tenant_id, period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing period not found")))?;

        let next = billing::lifecycle::mark_billed(period.status())?;

        // Active contracts with active devices that produced snapshots in the
        // period, but no invoice yet.
        let uninvoiced: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT c.contract_id
            FROM lease_contracts c
            WHERE c.tenant_id = $1
              AND c.status = 'active'
              AND EXISTS (
                    SELECT 1
                    FROM devices d
                    JOIN meter_snapshots s ON s.device_id = d.device_id AND s.period_id = $2
                    WHERE d.contract_id = c.contract_id AND d.status = 'active'
              )
              AND NOT EXISTS (
                    SELECT 1 FROM invoices i
                    WHERE i.contract_id = c.contract_id AND i.period_id = $2
              )
            ORDER BY c.contract_id
            "#,
        )
        .bind(tenant_id)
        .bind(period_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to check contract invoices"))?;

        if !uninvoiced.is_empty() {
            return Err(BillingError::ContractsNotInvoiced(uninvoiced).into());
        }

        let updated = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            UPDATE billing_periods
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND period_id = $2 AND status = 'closed'
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(period_id)
        .bind(next.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to mark period billed"))?
        .ok_or(BillingError::PeriodAlreadyClosed("billed".to_string()))?;

        timer.observe_duration();
        info!(period_id = %period_id, "Billing period marked billed");

        Ok(updated)
    }

    // =========================================================================
    // Meter Reading Operations
    // =========================================================================

    /// Record a meter reading: an idempotent upsert keyed by (device, period).
    ///
    /// Copies the prior period's counters as the delta baseline, recomputes
    /// the clamped per-channel prints and the rollover flag, and rejects
    /// writes against closed periods or locked snapshots.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id, device_id = %input.device_id, period_id = %input.period_id))]
    pub async fn upsert_meter_reading(
        &self,
        tenant_id: Uuid,
        input: &RecordReading,
    ) -> Result<MeterSnapshot, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_meter_reading"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods WHERE tenant_id = $1 AND period_id = $2",
        ))
        .bind(tenant_id)
        .bind(input.period_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to load billing period"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing period not found")))?;

        if !billing::lifecycle::accepts_readings(period.status()) {
            return Err(BillingError::PeriodClosed(period.status.clone()).into());
        }

        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = $1 AND device_id = $2",
        ))
        .bind(tenant_id)
        .bind(input.device_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to load device"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Device not found")))?;

        let existing_locked: Option<bool> = sqlx::query_scalar(
            "SELECT locked FROM meter_snapshots WHERE device_id = $1 AND period_id = $2",
        )
        .bind(input.device_id)
        .bind(input.period_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to check snapshot lock"))?;

        if existing_locked == Some(true) {
            return Err(BillingError::SnapshotLocked.into());
        }

        // Baseline: the device's snapshot from the most recent earlier period.
        let prior = sqlx::query_as::<_, MeterSnapshot>(&format!(
            r#"
            SELECT s.{}
            FROM meter_snapshots s
            JOIN billing_periods p ON p.period_id = s.period_id
            WHERE s.tenant_id = $1 AND s.device_id = $2 AND p.end_date < $3
            ORDER BY p.end_date DESC
            LIMIT 1
            "#,
            SNAPSHOT_COLUMNS.replace(", ", ", s."),
        ))
        .bind(tenant_id)
        .bind(input.device_id)
        .bind(period.start_date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to load prior snapshot"))?;

        let current = billing::CounterSet {
            bw: input.bw_count,
            color: input.color_count,
            total: input.total_count,
        };
        let previous = match &prior {
            Some(p) => billing::CounterSet {
                bw: p.bw_count,
                // A channel appearing for the first time starts from zero.
                color: match (input.color_count, p.color_count) {
                    (Some(_), None) => Some(0),
                    (_, prior_color) => prior_color,
                },
                total: p.total_count,
            },
            None => billing::CounterSet::zero_like(&current),
        };

        let computed = billing::compute_usage(&current, &previous)?;

        let snapshot = sqlx::query_as::<_, MeterSnapshot>(&format!(
            r#"
            INSERT INTO meter_snapshots (
                snapshot_id, device_id, period_id, tenant_id,
                bw_count, color_count, total_count,
                previous_bw, previous_color, previous_total,
                prints_bw, prints_color, prints_total,
                anomaly, method, notes, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (device_id, period_id) DO UPDATE SET
                bw_count = EXCLUDED.bw_count,
                color_count = EXCLUDED.color_count,
                total_count = EXCLUDED.total_count,
                previous_bw = EXCLUDED.previous_bw,
                previous_color = EXCLUDED.previous_color,
                previous_total = EXCLUDED.previous_total,
                prints_bw = EXCLUDED.prints_bw,
                prints_color = EXCLUDED.prints_color,
                prints_total = EXCLUDED.prints_total,
                anomaly = EXCLUDED.anomaly,
                method = EXCLUDED.method,
                notes = EXCLUDED.notes,
                recorded_at = EXCLUDED.recorded_at,
                updated_utc = NOW()
            WHERE meter_snapshots.locked = FALSE
            RETURNING {SNAPSHOT_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(device.device_id)
        .bind(input.period_id)
        .bind(tenant_id)
        .bind(input.bw_count)
        .bind(input.color_count)
        .bind(input.total_count)
        .bind(previous.bw)
        .bind(previous.color)
        .bind(previous.total)
        .bind(computed.usage.bw)
        .bind(computed.usage.color)
        .bind(computed.usage.total)
        .bind(computed.anomaly)
        .bind(input.method.as_str())
        .bind(&input.notes)
        .bind(input.recorded_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to upsert meter reading"))?
        .ok_or(BillingError::SnapshotLocked)?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit meter reading"))?;

        timer.observe_duration();

        Ok(snapshot)
    }

    /// Get the snapshot for one (device, period).
    #[instrument(skip(self), fields(tenant_id = %tenant_id, device_id = %device_id, period_id = %period_id))]
    pub async fn get_meter_reading(
        &self,
        tenant_id: Uuid,
        device_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<MeterSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_meter_reading"])
            .start_timer();

        let snapshot = sqlx::query_as::<_, MeterSnapshot>(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS}
            FROM meter_snapshots
            WHERE tenant_id = $1 AND device_id = $2 AND period_id = $3
            "#,
        ))
        .bind(tenant_id)
        .bind(device_id)
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get meter reading"))?;

        timer.observe_duration();

        Ok(snapshot)
    }

    /// Get a snapshot by id.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, snapshot_id = %snapshot_id))]
    pub async fn get_snapshot(
        &self,
        tenant_id: Uuid,
        snapshot_id: Uuid,
    ) -> Result<Option<MeterSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_snapshot"])
            .start_timer();

        let snapshot = sqlx::query_as::<_, MeterSnapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM meter_snapshots WHERE tenant_id = $1 AND snapshot_id = $2",
        ))
        .bind(tenant_id)
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get snapshot"))?;

        timer.observe_duration();

        Ok(snapshot)
    }

    /// List meter readings with optional period/device filters.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_meter_readings(
        &self,
        tenant_id: Uuid,
        filter: &ListReadingsFilter,
    ) -> Result<Vec<MeterSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_meter_readings"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let snapshots = sqlx::query_as::<_, MeterSnapshot>(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS}
            FROM meter_snapshots
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR period_id = $2)
              AND ($3::uuid IS NULL OR device_id = $3)
              AND ($4::uuid IS NULL OR snapshot_id > $4)
            ORDER BY snapshot_id
            LIMIT $5
            "#,
        ))
        .bind(tenant_id)
        .bind(filter.period_id)
        .bind(filter.device_id)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list meter readings"))?;

        timer.observe_duration();

        Ok(snapshots)
    }

    /// All snapshots for a period.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, period_id = %period_id))]
    pub async fn period_snapshots(
        &self,
        tenant_id: Uuid,
        period_id: Uuid,
    ) -> Result<Vec<MeterSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["period_snapshots"])
            .start_timer();

        let snapshots = sqlx::query_as::<_, MeterSnapshot>(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS}
            FROM meter_snapshots
            WHERE tenant_id = $1 AND period_id = $2
            ORDER BY device_id
            "#,
        ))
        .bind(tenant_id)
        .bind(period_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to load period snapshots"))?;

        timer.observe_duration();

        Ok(snapshots)
    }

    /// Lock or unlock a snapshot.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, snapshot_id = %snapshot_id, locked = locked))]
    pub async fn set_snapshot_locked(
        &self,
        tenant_id: Uuid,
        snapshot_id: Uuid,
        locked: bool,
    ) -> Result<Option<MeterSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_snapshot_locked"])
            .start_timer();

        let snapshot = sqlx::query_as::<_, MeterSnapshot>(&format!(
            r#"
            UPDATE meter_snapshots
            SET locked = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND snapshot_id = $2
            RETURNING {SNAPSHOT_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(snapshot_id)
        .bind(locked)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to update snapshot lock"))?;

        timer.observe_duration();

        Ok(snapshot)
    }

    // =========================================================================
    // Contract Operations
    // =========================================================================

    /// Create a lease contract.
    #[instrument(skip(self, input), fields(tenant_id = %tenant_id))]
    pub async fn create_contract(
        &self,
        tenant_id: Uuid,
        input: &CreateContract,
    ) -> Result<LeaseContract, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_contract"])
            .start_timer();

        let contract = sqlx::query_as::<_, LeaseContract>(&format!(
            r#"
            INSERT INTO lease_contracts (
                contract_id, tenant_id, contract_number, name, supplier, contract_type,
                cost_bw_per_copy, cost_color_per_copy, fixed_monthly_cost, fixed_annual_cost,
                included_copies_bw, included_copies_color, currency
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {CONTRACT_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&input.contract_number)
        .bind(&input.name)
        .bind(&input.supplier)
        .bind(input.contract_type.as_str())
        .bind(input.cost_bw_per_copy)
        .bind(input.cost_color_per_copy)
        .bind(input.fixed_monthly_cost)
        .bind(input.fixed_annual_cost)
        .bind(input.included_copies_bw)
        .bind(input.included_copies_color)
        .bind(&input.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("Failed to create contract"))?;

        timer.observe_duration();
        info!(contract_id = %contract.contract_id, number = %contract.contract_number, "Contract created");

        Ok(contract)
    }

    /// Get a contract by id.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, contract_id = %contract_id))]
    pub async fn get_contract(
        &self,
        tenant_id: Uuid,
        contract_id: Uuid,
    ) -> Result<Option<LeaseContract>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_contract"])
            .start_timer();

        let contract = sqlx::query_as::<_, LeaseContract>(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM lease_contracts WHERE tenant_id = $1 AND contract_id = $2",
        ))
        .bind(tenant_id)
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get contract"))?;

        timer.observe_duration();

        Ok(contract)
    }

    /// List contracts with an optional status filter.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_contracts(
        &self,
        tenant_id: Uuid,
        filter: &ListContractsFilter,
    ) -> Result<Vec<LeaseContract>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_contracts"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let contracts = sqlx::query_as::<_, LeaseContract>(&format!(
            r#"
            SELECT {CONTRACT_COLUMNS}
            FROM lease_contracts
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR contract_id > $3)
            ORDER BY contract_id
            LIMIT $4
            "#,
        ))
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list contracts"))?;

        timer.observe_duration();

        Ok(contracts)
    }

    /// Update a contract's lifecycle status.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, contract_id = %contract_id))]
    pub async fn update_contract_status(
        &self,
        tenant_id: Uuid,
        contract_id: Uuid,
        status: ContractStatus,
    ) -> Result<Option<LeaseContract>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_contract_status"])
            .start_timer();

        let contract = sqlx::query_as::<_, LeaseContract>(&format!(
            r#"
            UPDATE lease_contracts
            SET status = $3, updated_utc = NOW()
            WHERE tenant_id = $1 AND contract_id = $2
            RETURNING {CONTRACT_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(contract_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to update contract status"))?;

        timer.observe_duration();

        Ok(contract)
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    /// Compute an invoice draft without persisting anything.
    #[instrument(skip(self, rates), fields(tenant_id = %tenant_id, contract_id = %contract_id, period_id = %period_id))]
    pub async fn preview_invoice(
        &self,
        tenant_id: Uuid,
        contract_id: Uuid,
        period_id: Uuid,
        rates: &RateContext,
    ) -> Result<InvoiceDraft, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["preview_invoice"])
            .start_timer();

        let contract = self
            .get_contract(tenant_id, contract_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Contract not found")))?;
        let period = self
            .get_period(tenant_id, period_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing period not found")))?;
        let devices = self.contract_devices(tenant_id, contract_id).await?;
        let snapshots = self.period_snapshots(tenant_id, period_id).await?;

        let draft = billing::build_invoice(&contract, &period, &devices, &snapshots, rates)
            ?;

        timer.observe_duration();

        Ok(draft)
    }

    /// Build and persist the draft invoice for one (contract, period).
    ///
    /// Runs under a per-(contract, period) advisory transaction lock so at
    /// most one build runs at a time; a concurrent caller fails fast. If a
    /// draft already exists it is returned unchanged; a sent invoice makes
    /// the pair permanently built.
    ///
    /// Returns the invoice, its lines, and whether it already existed.
    #[instrument(skip(self, rates), fields(tenant_id = %tenant_id, contract_id = %contract_id, period_id = %period_id))]
    pub async fn build_invoice(
        &self,
        tenant_id: Uuid,
        contract_id: Uuid,
        period_id: Uuid,
        rates: &RateContext,
    ) -> Result<(Invoice, Vec<InvoiceLine>, bool), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["build_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(invoice_lock_key(contract_id, period_id))
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to acquire invoice lock"))?;
        if !acquired {
            return Err(BillingError::InvoiceGenerationInProgress.into());
        }

        let existing = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE tenant_id = $1 AND contract_id = $2 AND period_id = $3
            "#,
        ))
        .bind(tenant_id)
        .bind(contract_id)
        .bind(period_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to check existing invoice"))?;

        if let Some(invoice) = existing {
            if invoice.status() != crate::models::InvoiceStatus::Draft {
                return Err(BillingError::InvoiceAlreadyExists.into());
            }
            let lines = Self::invoice_lines(&mut tx, invoice.invoice_id).await?;
            tx.commit()
                .await
                .map_err(db_err("Failed to commit invoice read"))?;
            timer.observe_duration();
            return Ok((invoice, lines, true));
        }

        let contract = sqlx::query_as::<_, LeaseContract>(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM lease_contracts WHERE tenant_id = $1 AND contract_id = $2",
        ))
        .bind(tenant_id)
        .bind(contract_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to load contract"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Contract not found")))?;

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods WHERE tenant_id = $1 AND period_id = $2",
        ))
        .bind(tenant_id)
        .bind(period_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to load billing period"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Billing period not found")))?;

        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE tenant_id = $1 AND contract_id = $2 ORDER BY device_id",
        ))
        .bind(tenant_id)
        .bind(contract_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("Failed to load contract devices"))?;

        let snapshots = sqlx::query_as::<_, MeterSnapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM meter_snapshots WHERE tenant_id = $1 AND period_id = $2",
        ))
        .bind(tenant_id)
        .bind(period_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err("Failed to load period snapshots"))?;

        let draft = billing::build_invoice(&contract, &period, &devices, &snapshots, rates)
            ?;

        let number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_counters (tenant_id, last_number)
            VALUES ($1, 1)
            ON CONFLICT (tenant_id) DO UPDATE SET last_number = invoice_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to allocate invoice number"))?;

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, tenant_id, invoice_number, contract_id, period_id,
                period_start, period_end, subtotal, tax_rate, tax_amount,
                total_amount, currency, exchange_rate, anomaly_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(format!("INV-{:06}", number))
        .bind(contract_id)
        .bind(period_id)
        .bind(draft.period_start)
        .bind(draft.period_end)
        .bind(draft.subtotal)
        .bind(draft.tax_rate)
        .bind(draft.tax_amount)
        .bind(draft.total_amount)
        .bind(&draft.currency)
        .bind(draft.exchange_rate)
        .bind(draft.anomaly_count)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err("Failed to insert invoice"))?;

        let mut lines = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let inserted = sqlx::query_as::<_, InvoiceLine>(&format!(
                r#"
                INSERT INTO invoice_lines (
                    line_id, invoice_id, device_id, description,
                    usage_bw, usage_color, usage_total,
                    allowance_bw_consumed, allowance_color_consumed, amount, anomaly
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING {LINE_COLUMNS}
                "#,
            ))
            .bind(Uuid::new_v4())
            .bind(invoice.invoice_id)
            .bind(line.device_id)
            .bind(&line.description)
            .bind(line.usage_bw)
            .bind(line.usage_color)
            .bind(line.usage_total)
            .bind(line.allowance_bw_consumed)
            .bind(line.allowance_color_consumed)
            .bind(line.amount)
            .bind(line.anomaly)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to insert invoice line"))?;
            lines.push(inserted);
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit invoice"))?;

        timer.observe_duration();
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total_amount,
            "Invoice draft created"
        );

        Ok((invoice, lines, false))
    }

    async fn invoice_lines(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLine>, AppError> {
        sqlx::query_as::<_, InvoiceLine>(&format!(
            "SELECT {LINE_COLUMNS} FROM invoice_lines WHERE invoice_id = $1 ORDER BY line_id",
        ))
        .bind(invoice_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_err("Failed to load invoice lines"))
    }

    /// Get an invoice and its lines.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<(Invoice, Vec<InvoiceLine>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2",
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to get invoice"))?;

        let result = match invoice {
            Some(invoice) => {
                let lines = sqlx::query_as::<_, InvoiceLine>(&format!(
                    "SELECT {LINE_COLUMNS} FROM invoice_lines WHERE invoice_id = $1 ORDER BY line_id",
                ))
                .bind(invoice.invoice_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err("Failed to load invoice lines"))?;
                Some((invoice, lines))
            }
            None => None,
        };

        timer.observe_duration();

        Ok(result)
    }

    /// List invoices with optional filters (lines omitted).
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id))]
    pub async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;
        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR contract_id = $2)
              AND ($3::uuid IS NULL OR period_id = $3)
              AND ($4::text IS NULL OR status = $4)
              AND ($5::uuid IS NULL OR invoice_id > $5)
            ORDER BY invoice_id
            LIMIT $6
            "#,
        ))
        .bind(tenant_id)
        .bind(filter.contract_id)
        .bind(filter.period_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list invoices"))?;

        timer.observe_duration();

        Ok(invoices)
    }

    /// Transition a draft invoice to sent and lock its contributing
    /// snapshots so they can no longer be rewritten.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn send_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Invoice, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["send_invoice"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))?;

        let sent = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'sent', sent_utc = $3
            WHERE tenant_id = $1 AND invoice_id = $2 AND status = 'draft'
            RETURNING {INVOICE_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("Failed to send invoice"))?;

        let invoice = match sent {
            Some(invoice) => invoice,
            None => {
                let existing = sqlx::query_as::<_, Invoice>(&format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = $1 AND invoice_id = $2",
                ))
                .bind(tenant_id)
                .bind(invoice_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err("Failed to get invoice"))?;
                return match existing {
                    Some(invoice) => {
                        Err(BillingError::InvoiceNotDraft(invoice.status.clone()).into())
                    }
                    None => {
                        Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")).into())
                    }
                };
            }
        };

        sqlx::query(
            r#"
            UPDATE meter_snapshots
            SET locked = TRUE, updated_utc = NOW()
            WHERE tenant_id = $1
              AND period_id = $2
              AND device_id IN (
                    SELECT device_id FROM invoice_lines
                    WHERE invoice_id = $3 AND device_id IS NOT NULL
              )
            "#,
        )
        .bind(tenant_id)
        .bind(invoice.period_id)
        .bind(invoice.invoice_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("Failed to lock contributing snapshots"))?;

        tx.commit()
            .await
            .map_err(db_err("Failed to commit invoice send"))?;

        timer.observe_duration();
        info!(invoice_id = %invoice.invoice_id, "Invoice sent");

        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_lock_key_is_stable_and_pair_sensitive() {
        let contract = Uuid::from_u128(0x1111_2222_3333_4444_5555_6666_7777_8888);
        let period = Uuid::from_u128(0x9999_aaaa_bbbb_cccc_dddd_eeee_ffff_0000);

        assert_eq!(
            invoice_lock_key(contract, period),
            invoice_lock_key(contract, period)
        );
        assert_ne!(
            invoice_lock_key(contract, period),
            invoice_lock_key(period, contract)
        );
    }
}
