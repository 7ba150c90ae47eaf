//! Invoice aggregation: one contract, one closed period, one invoice.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::billing::error::BillingError;
use crate::billing::lifecycle;
use crate::billing::pricing::{self, Allowance, PricingTerms};
use crate::billing::usage::{compute_usage, CounterSet};
use crate::models::{
    BillingPeriod, ContractStatus, Device, DeviceStatus, LeaseContract, MeterSnapshot,
    NewInvoiceLine,
};

/// External pricing context supplied at build time: the configured tax rate
/// and the reporting currency with a single exchange-rate snapshot.
#[derive(Debug, Clone)]
pub struct RateContext {
    pub tax_rate: Decimal,
    pub reporting_currency: String,
    pub exchange_rate: Decimal,
}

/// A fully computed invoice, not yet persisted.
///
/// Line amounts are in the contract currency; subtotal, tax and total are in
/// the invoice currency (the reporting currency when it differs from the
/// contract's), converted once with `exchange_rate`.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub contract_id: Uuid,
    pub period_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub lines: Vec<NewInvoiceLine>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub anomaly_count: i32,
}

fn snapshot_counters(snapshot: &MeterSnapshot) -> (CounterSet, CounterSet) {
    (
        CounterSet {
            bw: snapshot.bw_count,
            color: snapshot.color_count,
            total: snapshot.total_count,
        },
        CounterSet {
            bw: snapshot.previous_bw,
            color: snapshot.previous_color,
            total: snapshot.previous_total,
        },
    )
}

/// Build the invoice draft for one contract and one closed period.
///
/// All-or-nothing: every active device assigned to the contract must have a
/// snapshot for the period, otherwise `IncompleteReadings` lists the missing
/// device ids and nothing is produced. Devices are processed in ascending
/// device-id order so the shared allowance is consumed identically on every
/// run with the same inputs.
pub fn build_invoice(
    contract: &LeaseContract,
    period: &BillingPeriod,
    devices: &[Device],
    snapshots: &[MeterSnapshot],
    rates: &RateContext,
) -> Result<InvoiceDraft, BillingError> {
    if !lifecycle::accepts_invoicing(period.status()) {
        return Err(BillingError::PeriodNotClosed(period.status.clone()));
    }
    if contract.status() != ContractStatus::Active {
        return Err(BillingError::ContractNotBillable(contract.status.clone()));
    }

    let by_device: HashMap<Uuid, &MeterSnapshot> = snapshots
        .iter()
        .filter(|s| s.period_id == period.period_id)
        .map(|s| (s.device_id, s))
        .collect();

    let mut billable: Vec<&Device> = devices
        .iter()
        .filter(|d| {
            d.contract_id == Some(contract.contract_id)
                && DeviceStatus::from_string(&d.status) == DeviceStatus::Active
        })
        .collect();
    billable.sort_by_key(|d| d.device_id);

    let missing: Vec<Uuid> = billable
        .iter()
        .filter(|d| !by_device.contains_key(&d.device_id))
        .map(|d| d.device_id)
        .collect();
    if !missing.is_empty() {
        return Err(BillingError::IncompleteReadings(missing));
    }

    let terms = PricingTerms::from_contract(contract);
    let mut allowance = Allowance::from_terms(&terms);
    let mut lines = Vec::with_capacity(billable.len() + 1);
    let mut subtotal = Decimal::ZERO;
    let mut anomaly_count = 0;

    for device in &billable {
        let snapshot = by_device[&device.device_id];
        let (current, previous) = snapshot_counters(snapshot);
        let result = compute_usage(&current, &previous)?;
        let charge = pricing::price_device(&result.usage, &terms, &mut allowance);

        if result.anomaly {
            anomaly_count += 1;
        }
        subtotal += charge.amount;
        lines.push(NewInvoiceLine {
            device_id: Some(device.device_id),
            description: format!("Usage for {}", device.name),
            usage_bw: result.usage.bw,
            usage_color: result.usage.color,
            usage_total: result.usage.total,
            allowance_bw_consumed: charge.allowance_bw_consumed,
            allowance_color_consumed: charge.allowance_color_consumed,
            amount: charge.amount,
            anomaly: result.anomaly,
        });
    }

    let fixed_fee = pricing::contract_fixed_fee(&terms, period.start_date, period.end_date);
    if fixed_fee > Decimal::ZERO {
        subtotal += fixed_fee;
        lines.push(NewInvoiceLine {
            device_id: None,
            description: format!("Contract fixed fee ({})", contract.contract_number),
            usage_bw: 0,
            usage_color: 0,
            usage_total: 0,
            allowance_bw_consumed: 0,
            allowance_color_consumed: 0,
            amount: fixed_fee,
            anomaly: false,
        });
    }

    // One exchange-rate snapshot for the whole invoice, applied at this
    // boundary only. Line amounts remain in the contract currency.
    let (currency, exchange_rate) = if contract.currency == rates.reporting_currency {
        (contract.currency.clone(), Decimal::ONE)
    } else {
        (rates.reporting_currency.clone(), rates.exchange_rate)
    };
    let converted_subtotal = (subtotal * exchange_rate).round_dp(2);
    let tax_amount = (converted_subtotal * rates.tax_rate).round_dp(2);

    Ok(InvoiceDraft {
        contract_id: contract.contract_id,
        period_id: period.period_id,
        period_start: period.start_date,
        period_end: period.end_date,
        lines,
        subtotal: converted_subtotal,
        tax_rate: rates.tax_rate,
        tax_amount,
        total_amount: converted_subtotal + tax_amount,
        currency,
        exchange_rate,
        anomaly_count,
    })
}
