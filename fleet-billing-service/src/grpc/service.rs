//! FleetBillingService gRPC implementation.

#![allow(clippy::result_large_err)]

use crate::billing::{self, BillingError, RateContext};
use crate::grpc::capability_check::{capabilities, CapabilityChecker};
use crate::grpc::proto::fleet_billing_service_server::FleetBillingService;
use crate::grpc::proto::*;
use crate::models;
use crate::services::{
    record_anomaly, record_error, record_invoice_build, record_period_transition,
    record_reading_recorded, Database, ExchangeRates, StoreError,
};
use chrono::{NaiveDate, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use service_core::grpc::IntoStatus;
use std::str::FromStr;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use uuid::Uuid;

/// Billing configuration injected from startup: the external tax rate and
/// the reporting currency the console operates in.
#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub tax_rate: Decimal,
    pub reporting_currency: String,
}

/// FleetBillingService implementation.
pub struct FleetBillingServiceImpl {
    db: Arc<Database>,
    capability_checker: Arc<CapabilityChecker>,
    rates: Arc<dyn ExchangeRates>,
    settings: BillingSettings,
}

impl FleetBillingServiceImpl {
    pub fn new(
        db: Arc<Database>,
        capability_checker: Arc<CapabilityChecker>,
        rates: Arc<dyn ExchangeRates>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            db,
            capability_checker,
            rates,
            settings,
        }
    }

    /// Resolve the rate context for an invoice build against one contract.
    async fn rate_context(&self, contract_currency: &str) -> Result<RateContext, Status> {
        let exchange_rate = self
            .rates
            .rate(contract_currency, &self.settings.reporting_currency)
            .await
            .map_err(|e| e.into_status())?;
        Ok(RateContext {
            tax_rate: self.settings.tax_rate,
            reporting_currency: self.settings.reporting_currency.clone(),
            exchange_rate,
        })
    }
}

// Helper functions for type conversions

fn parse_uuid(s: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(s).map_err(|_| Status::invalid_argument(format!("Invalid UUID: {}", s)))
}

fn parse_optional_uuid(s: &str) -> Result<Option<Uuid>, Status> {
    if s.is_empty() {
        Ok(None)
    } else {
        parse_uuid(s).map(Some)
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, Status> {
    Decimal::from_str(s).map_err(|_| Status::invalid_argument(format!("Invalid decimal: {}", s)))
}

fn parse_date(s: &str) -> Result<NaiveDate, Status> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| Status::invalid_argument(format!("Invalid date: {}", s)))
}

fn parse_tenant_id(auth: &crate::grpc::capability_check::AuthContext) -> Result<Uuid, Status> {
    Uuid::parse_str(&auth.tenant_id)
        .map_err(|_| Status::unauthenticated("Missing or invalid tenant context"))
}

fn datetime_to_timestamp(dt: chrono::DateTime<Utc>) -> Option<Timestamp> {
    Some(Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    })
}

fn timestamp_to_datetime(ts: Option<Timestamp>) -> chrono::DateTime<Utc> {
    ts.map(|t| chrono::DateTime::from_timestamp(t.seconds, t.nanos as u32).unwrap_or_else(Utc::now))
        .unwrap_or_else(Utc::now)
}

fn uuid_list(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map a billing domain error onto its gRPC status.
fn domain_status(err: BillingError) -> Status {
    match &err {
        BillingError::InvalidReading(_) => Status::invalid_argument(err.to_string()),
        BillingError::IncompleteReadings(ids) => Status::failed_precondition(format!(
            "missing meter readings for devices: {}",
            uuid_list(ids)
        )),
        BillingError::ContractsNotInvoiced(ids) => Status::failed_precondition(format!(
            "contracts without an invoice for this period: {}",
            uuid_list(ids)
        )),
        BillingError::InvoiceAlreadyExists => Status::already_exists(err.to_string()),
        BillingError::InvoiceGenerationInProgress => Status::aborted(err.to_string()),
        BillingError::SnapshotLocked
        | BillingError::PeriodClosed(_)
        | BillingError::PeriodAlreadyClosed(_)
        | BillingError::PeriodNotClosed(_)
        | BillingError::ContractNotBillable(_)
        | BillingError::InvoiceNotDraft(_) => Status::failed_precondition(err.to_string()),
    }
}

fn store_status(err: StoreError) -> Status {
    match err {
        StoreError::Domain(e) => domain_status(e),
        StoreError::Infra(e) => {
            record_error("database");
            e.into_status()
        }
    }
}

fn device_to_proto(d: models::Device) -> Device {
    Device {
        device_id: d.device_id.to_string(),
        tenant_id: d.tenant_id.to_string(),
        name: d.name,
        network_address: d.network_address.unwrap_or_default(),
        serial_number: d.serial_number.unwrap_or_default(),
        color_capable: d.color_capable,
        multifunction: d.multifunction,
        contract_id: d.contract_id.map(|id| id.to_string()).unwrap_or_default(),
        status: models::DeviceStatus::from_string(&d.status).to_proto(),
        created_at: datetime_to_timestamp(d.created_utc),
        updated_at: datetime_to_timestamp(d.updated_utc),
    }
}

fn period_to_proto(p: models::BillingPeriod) -> BillingPeriod {
    BillingPeriod {
        period_id: p.period_id.to_string(),
        tenant_id: p.tenant_id.to_string(),
        name: p.name,
        start_date: p.start_date.to_string(),
        end_date: p.end_date.to_string(),
        cut_off_date: p.cut_off_date.to_string(),
        status: models::PeriodStatus::from_string(&p.status).to_proto(),
        description: p.description.unwrap_or_default(),
        created_at: datetime_to_timestamp(p.created_utc),
        updated_at: datetime_to_timestamp(p.updated_utc),
    }
}

fn snapshot_to_proto(s: models::MeterSnapshot) -> MeterSnapshot {
    MeterSnapshot {
        snapshot_id: s.snapshot_id.to_string(),
        device_id: s.device_id.to_string(),
        period_id: s.period_id.to_string(),
        tenant_id: s.tenant_id.to_string(),
        bw_count: s.bw_count,
        color_count: s.color_count,
        total_count: s.total_count,
        previous_bw: s.previous_bw,
        previous_color: s.previous_color,
        previous_total: s.previous_total,
        prints_bw: s.prints_bw,
        prints_color: s.prints_color,
        prints_total: s.prints_total,
        anomaly: s.anomaly,
        method: models::ReadingMethod::from_string(&s.method).to_proto(),
        locked: s.locked,
        notes: s.notes.unwrap_or_default(),
        recorded_at: datetime_to_timestamp(s.recorded_at),
        created_at: datetime_to_timestamp(s.created_utc),
        updated_at: datetime_to_timestamp(s.updated_utc),
    }
}

fn contract_to_proto(c: models::LeaseContract) -> LeaseContract {
    LeaseContract {
        contract_id: c.contract_id.to_string(),
        tenant_id: c.tenant_id.to_string(),
        contract_number: c.contract_number,
        name: c.name,
        supplier: c.supplier.unwrap_or_default(),
        contract_type: models::ContractType::from_string(&c.contract_type).to_proto(),
        cost_bw_per_copy: c.cost_bw_per_copy.to_string(),
        cost_color_per_copy: c.cost_color_per_copy.to_string(),
        fixed_monthly_cost: c.fixed_monthly_cost.to_string(),
        fixed_annual_cost: c.fixed_annual_cost.to_string(),
        included_copies_bw: c.included_copies_bw,
        included_copies_color: c.included_copies_color,
        currency: c.currency,
        status: models::ContractStatus::from_string(&c.status).to_proto(),
        created_at: datetime_to_timestamp(c.created_utc),
        updated_at: datetime_to_timestamp(c.updated_utc),
    }
}

fn line_to_proto(l: models::InvoiceLine) -> InvoiceLine {
    InvoiceLine {
        line_id: l.line_id.to_string(),
        invoice_id: l.invoice_id.to_string(),
        device_id: l.device_id.map(|id| id.to_string()).unwrap_or_default(),
        description: l.description,
        usage_bw: l.usage_bw,
        usage_color: l.usage_color,
        usage_total: l.usage_total,
        allowance_bw_consumed: l.allowance_bw_consumed,
        allowance_color_consumed: l.allowance_color_consumed,
        amount: l.amount.to_string(),
        anomaly: l.anomaly,
    }
}

fn invoice_to_proto(i: models::Invoice, lines: Vec<models::InvoiceLine>) -> Invoice {
    Invoice {
        invoice_id: i.invoice_id.to_string(),
        tenant_id: i.tenant_id.to_string(),
        invoice_number: i.invoice_number,
        contract_id: i.contract_id.to_string(),
        period_id: i.period_id.to_string(),
        period_start: i.period_start.to_string(),
        period_end: i.period_end.to_string(),
        subtotal: i.subtotal.to_string(),
        tax_rate: i.tax_rate.to_string(),
        tax_amount: i.tax_amount.to_string(),
        total_amount: i.total_amount.to_string(),
        currency: i.currency,
        exchange_rate: i.exchange_rate.to_string(),
        status: models::InvoiceStatus::from_string(&i.status).to_proto(),
        anomaly_count: i.anomaly_count,
        lines: lines.into_iter().map(line_to_proto).collect(),
        created_at: datetime_to_timestamp(i.created_utc),
        sent_at: i.sent_utc.and_then(datetime_to_timestamp),
    }
}

/// A computed-but-unpersisted draft; invoice ids stay empty.
fn draft_to_proto(tenant_id: Uuid, draft: billing::InvoiceDraft) -> Invoice {
    Invoice {
        invoice_id: String::new(),
        tenant_id: tenant_id.to_string(),
        invoice_number: String::new(),
        contract_id: draft.contract_id.to_string(),
        period_id: draft.period_id.to_string(),
        period_start: draft.period_start.to_string(),
        period_end: draft.period_end.to_string(),
        subtotal: draft.subtotal.to_string(),
        tax_rate: draft.tax_rate.to_string(),
        tax_amount: draft.tax_amount.to_string(),
        total_amount: draft.total_amount.to_string(),
        currency: draft.currency,
        exchange_rate: draft.exchange_rate.to_string(),
        status: models::InvoiceStatus::Draft.to_proto(),
        anomaly_count: draft.anomaly_count,
        lines: draft
            .lines
            .into_iter()
            .map(|l| InvoiceLine {
                line_id: String::new(),
                invoice_id: String::new(),
                device_id: l.device_id.map(|id| id.to_string()).unwrap_or_default(),
                description: l.description,
                usage_bw: l.usage_bw,
                usage_color: l.usage_color,
                usage_total: l.usage_total,
                allowance_bw_consumed: l.allowance_bw_consumed,
                allowance_color_consumed: l.allowance_color_consumed,
                amount: l.amount.to_string(),
                anomaly: l.anomaly,
            })
            .collect(),
        created_at: None,
        sent_at: None,
    }
}

fn wizard_state_from_proto(p: WizardState) -> Result<billing::WizardState, Status> {
    Ok(billing::WizardState {
        step: billing::WizardStep::from_proto(p.step),
        period_id: parse_optional_uuid(&p.period_id)?,
        contract_id: parse_optional_uuid(&p.contract_id)?,
        readings_validated: p.readings_validated,
        amounts_calculated: p.amounts_calculated,
        computed_total: if p.computed_total.is_empty() {
            None
        } else {
            Some(parse_decimal(&p.computed_total)?)
        },
        draft_invoice_id: parse_optional_uuid(&p.draft_invoice_id)?,
    })
}

fn wizard_state_to_proto(s: billing::WizardState) -> WizardState {
    WizardState {
        step: s.step.to_proto(),
        period_id: s.period_id.map(|id| id.to_string()).unwrap_or_default(),
        contract_id: s.contract_id.map(|id| id.to_string()).unwrap_or_default(),
        readings_validated: s.readings_validated,
        amounts_calculated: s.amounts_calculated,
        computed_total: s
            .computed_total
            .map(|t| t.to_string())
            .unwrap_or_default(),
        draft_invoice_id: s
            .draft_invoice_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    }
}

fn import_failure(reason: ImportFailureReason, message: String) -> import_result::Outcome {
    import_result::Outcome::Failure(ImportFailure {
        reason: reason as i32,
        message,
    })
}

#[tonic::async_trait]
impl FleetBillingService for FleetBillingServiceImpl {
    // =========================================================================
    // Device Registry
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "RegisterDevice"))]
    async fn register_device(
        &self,
        request: Request<RegisterDeviceRequest>,
    ) -> Result<Response<RegisterDeviceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_DEVICE_CREATE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        if req.name.is_empty() {
            return Err(Status::invalid_argument("Device name is required"));
        }

        let contract_id = parse_optional_uuid(&req.contract_id)?;
        if let Some(contract_id) = contract_id {
            self.db
                .get_contract(tenant_id, contract_id)
                .await
                .map_err(|e| e.into_status())?
                .ok_or_else(|| Status::not_found("Contract not found"))?;
        }

        let input = models::RegisterDevice {
            name: req.name,
            network_address: (!req.network_address.is_empty()).then_some(req.network_address),
            serial_number: (!req.serial_number.is_empty()).then_some(req.serial_number),
            color_capable: req.color_capable,
            multifunction: req.multifunction,
            contract_id,
        };

        let device = self
            .db
            .register_device(tenant_id, &input)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(RegisterDeviceResponse {
            device: Some(device_to_proto(device)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetDevice"))]
    async fn get_device(
        &self,
        request: Request<GetDeviceRequest>,
    ) -> Result<Response<GetDeviceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_DEVICE_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let device_id = parse_uuid(&request.into_inner().device_id)?;
        let device = self
            .db
            .get_device(tenant_id, device_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Device not found"))?;

        Ok(Response::new(GetDeviceResponse {
            device: Some(device_to_proto(device)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListDevices"))]
    async fn list_devices(
        &self,
        request: Request<ListDevicesRequest>,
    ) -> Result<Response<ListDevicesResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_DEVICE_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let filter = models::ListDevicesFilter {
            contract_id: parse_optional_uuid(&req.contract_id)?,
            status: (req.status != 0).then(|| models::DeviceStatus::from_proto(req.status)),
            page_size: if req.page_size > 0 { req.page_size } else { 50 },
            page_token: parse_optional_uuid(&req.page_token)?,
        };

        let devices = self
            .db
            .list_devices(tenant_id, &filter)
            .await
            .map_err(|e| e.into_status())?;

        let next_page_token = if devices.len() as i64 == filter.page_size as i64 {
            devices
                .last()
                .map(|d| d.device_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Response::new(ListDevicesResponse {
            devices: devices.into_iter().map(device_to_proto).collect(),
            next_page_token,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "AssignDevice"))]
    async fn assign_device(
        &self,
        request: Request<AssignDeviceRequest>,
    ) -> Result<Response<AssignDeviceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_DEVICE_UPDATE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let device_id = parse_uuid(&req.device_id)?;
        let contract_id = parse_optional_uuid(&req.contract_id)?;

        if let Some(contract_id) = contract_id {
            self.db
                .get_contract(tenant_id, contract_id)
                .await
                .map_err(|e| e.into_status())?
                .ok_or_else(|| Status::not_found("Contract not found"))?;
        }

        let device = self
            .db
            .assign_device(tenant_id, device_id, contract_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Device not found"))?;

        Ok(Response::new(AssignDeviceResponse {
            device: Some(device_to_proto(device)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "SetDeviceStatus"))]
    async fn set_device_status(
        &self,
        request: Request<SetDeviceStatusRequest>,
    ) -> Result<Response<SetDeviceStatusResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_DEVICE_UPDATE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let device_id = parse_uuid(&req.device_id)?;
        if req.status == 0 {
            return Err(Status::invalid_argument("Device status is required"));
        }

        let device = self
            .db
            .set_device_status(
                tenant_id,
                device_id,
                models::DeviceStatus::from_proto(req.status),
            )
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Device not found"))?;

        Ok(Response::new(SetDeviceStatusResponse {
            device: Some(device_to_proto(device)),
        }))
    }

    // =========================================================================
    // Billing Periods
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "CreateBillingPeriod"))]
    async fn create_billing_period(
        &self,
        request: Request<CreateBillingPeriodRequest>,
    ) -> Result<Response<CreateBillingPeriodResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_PERIOD_CREATE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        if req.name.is_empty() {
            return Err(Status::invalid_argument("Period name is required"));
        }
        let start_date = parse_date(&req.start_date)?;
        let end_date = parse_date(&req.end_date)?;
        let cut_off_date = parse_date(&req.cut_off_date)?;
        if end_date < start_date {
            return Err(Status::invalid_argument(
                "Period end date must not precede its start date",
            ));
        }

        let input = models::CreateBillingPeriod {
            name: req.name,
            start_date,
            end_date,
            cut_off_date,
            description: (!req.description.is_empty()).then_some(req.description),
        };

        let period = self
            .db
            .create_period(tenant_id, &input)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(CreateBillingPeriodResponse {
            period: Some(period_to_proto(period)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetBillingPeriod"))]
    async fn get_billing_period(
        &self,
        request: Request<GetBillingPeriodRequest>,
    ) -> Result<Response<GetBillingPeriodResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_PERIOD_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let period_id = parse_uuid(&request.into_inner().period_id)?;
        let period = self
            .db
            .get_period(tenant_id, period_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Billing period not found"))?;

        Ok(Response::new(GetBillingPeriodResponse {
            period: Some(period_to_proto(period)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListBillingPeriods"))]
    async fn list_billing_periods(
        &self,
        request: Request<ListBillingPeriodsRequest>,
    ) -> Result<Response<ListBillingPeriodsResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_PERIOD_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let filter = models::ListPeriodsFilter {
            status: (req.status != 0).then(|| models::PeriodStatus::from_proto(req.status)),
            page_size: if req.page_size > 0 { req.page_size } else { 50 },
            page_token: parse_optional_uuid(&req.page_token)?,
        };

        let periods = self
            .db
            .list_periods(tenant_id, &filter)
            .await
            .map_err(|e| e.into_status())?;

        let next_page_token = if periods.len() as i64 == filter.page_size as i64 {
            periods
                .last()
                .map(|p| p.period_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Response::new(ListBillingPeriodsResponse {
            periods: periods.into_iter().map(period_to_proto).collect(),
            next_page_token,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ClosePeriod"))]
    async fn close_period(
        &self,
        request: Request<ClosePeriodRequest>,
    ) -> Result<Response<ClosePeriodResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_PERIOD_TRANSITION)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let period_id = parse_uuid(&request.into_inner().period_id)?;
        let period = self
            .db
            .close_period(tenant_id, period_id)
            .await
            .map_err(store_status)?;

        record_period_transition("closed");
        tracing::info!(period_id = %period_id, "Billing period closed");

        Ok(Response::new(ClosePeriodResponse {
            period: Some(period_to_proto(period)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "MarkPeriodBilled"))]
    async fn mark_period_billed(
        &self,
        request: Request<MarkPeriodBilledRequest>,
    ) -> Result<Response<MarkPeriodBilledResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_PERIOD_TRANSITION)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let period_id = parse_uuid(&request.into_inner().period_id)?;
        let period = self
            .db
            .mark_period_billed(tenant_id, period_id)
            .await
            .map_err(store_status)?;

        record_period_transition("billed");

        Ok(Response::new(MarkPeriodBilledResponse {
            period: Some(period_to_proto(period)),
        }))
    }

    // =========================================================================
    // Meter Readings
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "RecordMeterReading"))]
    async fn record_meter_reading(
        &self,
        request: Request<RecordMeterReadingRequest>,
    ) -> Result<Response<RecordMeterReadingResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_READING_WRITE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let method = models::ReadingMethod::from_proto(req.method);
        let input = models::RecordReading {
            device_id: parse_uuid(&req.device_id)?,
            period_id: parse_uuid(&req.period_id)?,
            bw_count: req.bw_count,
            color_count: req.color_count,
            total_count: req.total_count,
            method,
            notes: (!req.notes.is_empty()).then_some(req.notes),
            recorded_at: timestamp_to_datetime(req.recorded_at),
        };

        let snapshot = self
            .db
            .upsert_meter_reading(tenant_id, &input)
            .await
            .map_err(store_status)?;

        record_reading_recorded(method.as_str());
        if snapshot.anomaly {
            record_anomaly(method.as_str());
            tracing::warn!(
                device_id = %snapshot.device_id,
                period_id = %snapshot.period_id,
                "Counter rollover detected; usage clamped to zero"
            );
        }

        Ok(Response::new(RecordMeterReadingResponse {
            snapshot: Some(snapshot_to_proto(snapshot)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetMeterReading"))]
    async fn get_meter_reading(
        &self,
        request: Request<GetMeterReadingRequest>,
    ) -> Result<Response<GetMeterReadingResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_READING_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let device_id = parse_uuid(&req.device_id)?;
        let period_id = parse_uuid(&req.period_id)?;

        let snapshot = self
            .db
            .get_meter_reading(tenant_id, device_id, period_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Meter reading not found"))?;

        Ok(Response::new(GetMeterReadingResponse {
            snapshot: Some(snapshot_to_proto(snapshot)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListMeterReadings"))]
    async fn list_meter_readings(
        &self,
        request: Request<ListMeterReadingsRequest>,
    ) -> Result<Response<ListMeterReadingsResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_READING_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let filter = models::ListReadingsFilter {
            period_id: parse_optional_uuid(&req.period_id)?,
            device_id: parse_optional_uuid(&req.device_id)?,
            page_size: if req.page_size > 0 { req.page_size } else { 50 },
            page_token: parse_optional_uuid(&req.page_token)?,
        };

        let snapshots = self
            .db
            .list_meter_readings(tenant_id, &filter)
            .await
            .map_err(|e| e.into_status())?;

        let next_page_token = if snapshots.len() as i64 == filter.page_size as i64 {
            snapshots
                .last()
                .map(|s| s.snapshot_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Response::new(ListMeterReadingsResponse {
            snapshots: snapshots.into_iter().map(snapshot_to_proto).collect(),
            next_page_token,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "LockSnapshot"))]
    async fn lock_snapshot(
        &self,
        request: Request<LockSnapshotRequest>,
    ) -> Result<Response<LockSnapshotResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_READING_LOCK)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let snapshot_id = parse_uuid(&request.into_inner().snapshot_id)?;
        let snapshot = self
            .db
            .set_snapshot_locked(tenant_id, snapshot_id, true)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Snapshot not found"))?;

        Ok(Response::new(LockSnapshotResponse {
            snapshot: Some(snapshot_to_proto(snapshot)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "UnlockSnapshot"))]
    async fn unlock_snapshot(
        &self,
        request: Request<UnlockSnapshotRequest>,
    ) -> Result<Response<UnlockSnapshotResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_READING_LOCK)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let snapshot_id = parse_uuid(&request.into_inner().snapshot_id)?;
        let snapshot = self
            .db
            .set_snapshot_locked(tenant_id, snapshot_id, false)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Snapshot not found"))?;

        Ok(Response::new(UnlockSnapshotResponse {
            snapshot: Some(snapshot_to_proto(snapshot)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ImportMeterReadings"))]
    async fn import_meter_readings(
        &self,
        request: Request<ImportMeterReadingsRequest>,
    ) -> Result<Response<ImportMeterReadingsResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_READING_WRITE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let period_id = parse_uuid(&req.period_id)?;
        let method = models::ReadingMethod::from_proto(req.method);

        // The period must exist up front; individual device failures are
        // reported per device and never abort the batch.
        self.db
            .get_period(tenant_id, period_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Billing period not found"))?;

        let mut results = Vec::with_capacity(req.readings.len());
        let mut succeeded = 0;
        let mut failed = 0;

        for reading in req.readings {
            let device_id = match parse_uuid(&reading.device_id) {
                Ok(id) => id,
                Err(_) => {
                    failed += 1;
                    results.push(ImportResult {
                        device_id: reading.device_id.clone(),
                        outcome: Some(import_failure(
                            ImportFailureReason::DeviceNotFound,
                            format!("Invalid device id: {}", reading.device_id),
                        )),
                    });
                    continue;
                }
            };

            let input = models::RecordReading {
                device_id,
                period_id,
                bw_count: reading.bw_count,
                color_count: reading.color_count,
                total_count: reading.total_count,
                method,
                notes: None,
                recorded_at: timestamp_to_datetime(reading.recorded_at),
            };

            let outcome = match self.db.upsert_meter_reading(tenant_id, &input).await {
                Ok(snapshot) => {
                    succeeded += 1;
                    record_reading_recorded(method.as_str());
                    if snapshot.anomaly {
                        record_anomaly(method.as_str());
                    }
                    import_result::Outcome::Snapshot(snapshot_to_proto(snapshot))
                }
                Err(err) => {
                    failed += 1;
                    match err {
                        StoreError::Domain(BillingError::PeriodClosed(_)) => import_failure(
                            ImportFailureReason::PeriodClosed,
                            "Billing period is closed".to_string(),
                        ),
                        StoreError::Domain(BillingError::SnapshotLocked) => import_failure(
                            ImportFailureReason::SnapshotLocked,
                            "Snapshot is locked".to_string(),
                        ),
                        StoreError::Domain(BillingError::InvalidReading(msg)) => {
                            import_failure(ImportFailureReason::InvalidReading, msg)
                        }
                        other => import_failure(
                            ImportFailureReason::DeviceNotFound,
                            store_status(other).message().to_string(),
                        ),
                    }
                }
            };

            results.push(ImportResult {
                device_id: device_id.to_string(),
                outcome: Some(outcome),
            });
        }

        tracing::info!(
            period_id = %period_id,
            succeeded = succeeded,
            failed = failed,
            "Meter reading import completed"
        );

        Ok(Response::new(ImportMeterReadingsResponse {
            results,
            succeeded,
            failed,
        }))
    }

    // =========================================================================
    // Lease Contracts
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "CreateContract"))]
    async fn create_contract(
        &self,
        request: Request<CreateContractRequest>,
    ) -> Result<Response<CreateContractResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_CONTRACT_CREATE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        if req.contract_number.is_empty() {
            return Err(Status::invalid_argument("Contract number is required"));
        }
        if req.contract_type == 0 {
            return Err(Status::invalid_argument("Contract type is required"));
        }
        if req.currency.is_empty() {
            return Err(Status::invalid_argument("Currency is required"));
        }

        let cost_bw_per_copy = parse_decimal(&req.cost_bw_per_copy)?;
        let cost_color_per_copy = parse_decimal(&req.cost_color_per_copy)?;
        let fixed_monthly_cost = parse_decimal(&req.fixed_monthly_cost)?;
        let fixed_annual_cost = parse_decimal(&req.fixed_annual_cost)?;
        for (value, label) in [
            (cost_bw_per_copy, "cost_bw_per_copy"),
            (cost_color_per_copy, "cost_color_per_copy"),
            (fixed_monthly_cost, "fixed_monthly_cost"),
            (fixed_annual_cost, "fixed_annual_cost"),
        ] {
            if value < Decimal::ZERO {
                return Err(Status::invalid_argument(format!(
                    "{} must not be negative",
                    label
                )));
            }
        }
        if req.included_copies_bw < 0 || req.included_copies_color < 0 {
            return Err(Status::invalid_argument(
                "Included copies must not be negative",
            ));
        }

        let input = models::CreateContract {
            contract_number: req.contract_number,
            name: req.name,
            supplier: (!req.supplier.is_empty()).then_some(req.supplier),
            contract_type: models::ContractType::from_proto(req.contract_type),
            cost_bw_per_copy,
            cost_color_per_copy,
            fixed_monthly_cost,
            fixed_annual_cost,
            included_copies_bw: req.included_copies_bw,
            included_copies_color: req.included_copies_color,
            currency: req.currency,
        };

        let contract = self
            .db
            .create_contract(tenant_id, &input)
            .await
            .map_err(|e| e.into_status())?;

        Ok(Response::new(CreateContractResponse {
            contract: Some(contract_to_proto(contract)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetContract"))]
    async fn get_contract(
        &self,
        request: Request<GetContractRequest>,
    ) -> Result<Response<GetContractResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_CONTRACT_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let contract_id = parse_uuid(&request.into_inner().contract_id)?;
        let contract = self
            .db
            .get_contract(tenant_id, contract_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Contract not found"))?;

        Ok(Response::new(GetContractResponse {
            contract: Some(contract_to_proto(contract)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListContracts"))]
    async fn list_contracts(
        &self,
        request: Request<ListContractsRequest>,
    ) -> Result<Response<ListContractsResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_CONTRACT_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let filter = models::ListContractsFilter {
            status: (req.status != 0).then(|| models::ContractStatus::from_proto(req.status)),
            page_size: if req.page_size > 0 { req.page_size } else { 50 },
            page_token: parse_optional_uuid(&req.page_token)?,
        };

        let contracts = self
            .db
            .list_contracts(tenant_id, &filter)
            .await
            .map_err(|e| e.into_status())?;

        let next_page_token = if contracts.len() as i64 == filter.page_size as i64 {
            contracts
                .last()
                .map(|c| c.contract_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Response::new(ListContractsResponse {
            contracts: contracts.into_iter().map(contract_to_proto).collect(),
            next_page_token,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "UpdateContractStatus"))]
    async fn update_contract_status(
        &self,
        request: Request<UpdateContractStatusRequest>,
    ) -> Result<Response<UpdateContractStatusResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_CONTRACT_UPDATE)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let contract_id = parse_uuid(&req.contract_id)?;
        if req.status == 0 {
            return Err(Status::invalid_argument("Contract status is required"));
        }

        let contract = self
            .db
            .update_contract_status(
                tenant_id,
                contract_id,
                models::ContractStatus::from_proto(req.status),
            )
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Contract not found"))?;

        Ok(Response::new(UpdateContractStatusResponse {
            contract: Some(contract_to_proto(contract)),
        }))
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "BuildInvoice"))]
    async fn build_invoice(
        &self,
        request: Request<BuildInvoiceRequest>,
    ) -> Result<Response<BuildInvoiceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_INVOICE_BUILD)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let contract_id = parse_uuid(&req.contract_id)?;
        let period_id = parse_uuid(&req.period_id)?;

        let contract = self
            .db
            .get_contract(tenant_id, contract_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Contract not found"))?;
        let rates = self.rate_context(&contract.currency).await?;

        let (invoice, lines, already_existed) = self
            .db
            .build_invoice(tenant_id, contract_id, period_id, &rates)
            .await
            .map_err(store_status)?;

        record_invoice_build(if already_existed { "idempotent" } else { "created" });
        tracing::info!(
            invoice_id = %invoice.invoice_id,
            already_existed = already_existed,
            total = %invoice.total_amount,
            "Invoice build completed"
        );

        Ok(Response::new(BuildInvoiceResponse {
            invoice: Some(invoice_to_proto(invoice, lines)),
            already_existed,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "PreviewInvoice"))]
    async fn preview_invoice(
        &self,
        request: Request<PreviewInvoiceRequest>,
    ) -> Result<Response<PreviewInvoiceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_INVOICE_BUILD)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let contract_id = parse_uuid(&req.contract_id)?;
        let period_id = parse_uuid(&req.period_id)?;

        let contract = self
            .db
            .get_contract(tenant_id, contract_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Contract not found"))?;
        let rates = self.rate_context(&contract.currency).await?;

        let draft = self
            .db
            .preview_invoice(tenant_id, contract_id, period_id, &rates)
            .await
            .map_err(store_status)?;

        record_invoice_build("preview");

        Ok(Response::new(PreviewInvoiceResponse {
            invoice: Some(draft_to_proto(tenant_id, draft)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetInvoice"))]
    async fn get_invoice(
        &self,
        request: Request<GetInvoiceRequest>,
    ) -> Result<Response<GetInvoiceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_INVOICE_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let invoice_id = parse_uuid(&request.into_inner().invoice_id)?;
        let (invoice, lines) = self
            .db
            .get_invoice(tenant_id, invoice_id)
            .await
            .map_err(|e| e.into_status())?
            .ok_or_else(|| Status::not_found("Invoice not found"))?;

        Ok(Response::new(GetInvoiceResponse {
            invoice: Some(invoice_to_proto(invoice, lines)),
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListInvoices"))]
    async fn list_invoices(
        &self,
        request: Request<ListInvoicesRequest>,
    ) -> Result<Response<ListInvoicesResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_INVOICE_READ)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let req = request.into_inner();
        let filter = models::ListInvoicesFilter {
            contract_id: parse_optional_uuid(&req.contract_id)?,
            period_id: parse_optional_uuid(&req.period_id)?,
            status: (req.status != 0).then(|| models::InvoiceStatus::from_proto(req.status)),
            page_size: if req.page_size > 0 { req.page_size } else { 50 },
            page_token: parse_optional_uuid(&req.page_token)?,
        };

        let invoices = self
            .db
            .list_invoices(tenant_id, &filter)
            .await
            .map_err(|e| e.into_status())?;

        let next_page_token = if invoices.len() as i64 == filter.page_size as i64 {
            invoices
                .last()
                .map(|i| i.invoice_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Response::new(ListInvoicesResponse {
            invoices: invoices
                .into_iter()
                .map(|i| invoice_to_proto(i, Vec::new()))
                .collect(),
            next_page_token,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(method = "SendInvoice"))]
    async fn send_invoice(
        &self,
        request: Request<SendInvoiceRequest>,
    ) -> Result<Response<SendInvoiceResponse>, Status> {
        let auth = self
            .capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_INVOICE_SEND)
            .await?;
        let tenant_id = parse_tenant_id(&auth)?;

        let invoice_id = parse_uuid(&request.into_inner().invoice_id)?;
        let invoice = self
            .db
            .send_invoice(tenant_id, invoice_id)
            .await
            .map_err(store_status)?;

        let lines = self
            .db
            .get_invoice(tenant_id, invoice.invoice_id)
            .await
            .map_err(|e| e.into_status())?
            .map(|(_, lines)| lines)
            .unwrap_or_default();

        tracing::info!(invoice_id = %invoice_id, "Invoice sent");

        Ok(Response::new(SendInvoiceResponse {
            invoice: Some(invoice_to_proto(invoice, lines)),
        }))
    }

    // =========================================================================
    // Billing Wizard
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "AdvanceWizard"))]
    async fn advance_wizard(
        &self,
        request: Request<AdvanceWizardRequest>,
    ) -> Result<Response<AdvanceWizardResponse>, Status> {
        self.capability_checker
            .require_capability(&request, capabilities::FLEETBILLING_WIZARD)
            .await?;

        let req = request.into_inner();
        let state = wizard_state_from_proto(req.state.unwrap_or_default())?;
        let action = match req.action {
            1 => billing::WizardAction::Next,
            2 => billing::WizardAction::Back,
            3 => billing::WizardAction::Cancel,
            _ => return Err(Status::invalid_argument("Wizard action is required")),
        };

        let (state, blocked_reason) = match state.clone().apply(action) {
            Ok(next) => (next, String::new()),
            Err(err) => (state, err.to_string()),
        };

        Ok(Response::new(AdvanceWizardResponse {
            state: Some(wizard_state_to_proto(state)),
            blocked_reason,
        }))
    }
}
