//! Per-device pricing under the contract's pricing model.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::billing::usage::UsageSet;
use crate::models::{ContractType, LeaseContract};

/// The pricing-relevant slice of a lease contract.
#[derive(Debug, Clone)]
pub struct PricingTerms {
    pub contract_type: ContractType,
    pub cost_bw_per_copy: Decimal,
    pub cost_color_per_copy: Decimal,
    pub fixed_monthly_cost: Decimal,
    pub fixed_annual_cost: Decimal,
    pub included_copies_bw: i64,
    pub included_copies_color: i64,
    pub currency: String,
}

impl PricingTerms {
    pub fn from_contract(contract: &LeaseContract) -> Self {
        Self {
            contract_type: contract.contract_type(),
            cost_bw_per_copy: contract.cost_bw_per_copy,
            cost_color_per_copy: contract.cost_color_per_copy,
            fixed_monthly_cost: contract.fixed_monthly_cost,
            fixed_annual_cost: contract.fixed_annual_cost,
            included_copies_bw: contract.included_copies_bw,
            included_copies_color: contract.included_copies_color,
            currency: contract.currency.clone(),
        }
    }
}

/// Running allowance pool, shared across every device on a contract for one
/// period. Consumed in device order; excess computed on one device carries
/// into the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub bw: i64,
    pub color: i64,
}

impl Allowance {
    pub fn from_terms(terms: &PricingTerms) -> Self {
        match terms.contract_type {
            ContractType::FixedCostPerQuantity => Self {
                bw: terms.included_copies_bw,
                color: terms.included_copies_color,
            },
            _ => Self { bw: 0, color: 0 },
        }
    }
}

/// The priced result for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCharge {
    pub amount: Decimal,
    pub allowance_bw_consumed: i64,
    pub allowance_color_consumed: i64,
}

fn consume(allowance: &mut i64, usage: i64) -> (i64, i64) {
    let consumed = usage.min(*allowance);
    *allowance -= consumed;
    (consumed, usage - consumed)
}

/// Price one device's period usage, mutating the shared allowance.
///
/// - `cost_per_copy`: every copy billed at the per-channel rate.
/// - `fixed_cost_per_quantity`: included copies consumed first, only the
///   excess billed at the per-channel rates as overage.
/// - `monthly_fixed` / `annual_fixed`: usage is informational; the flat fee
///   is a contract-level line added once by the aggregator.
pub fn price_device(
    usage: &UsageSet,
    terms: &PricingTerms,
    allowance: &mut Allowance,
) -> DeviceCharge {
    match terms.contract_type {
        ContractType::CostPerCopy => DeviceCharge {
            amount: Decimal::from(usage.bw) * terms.cost_bw_per_copy
                + Decimal::from(usage.color) * terms.cost_color_per_copy,
            allowance_bw_consumed: 0,
            allowance_color_consumed: 0,
        },
        ContractType::FixedCostPerQuantity => {
            let (bw_consumed, bw_billable) = consume(&mut allowance.bw, usage.bw);
            let (color_consumed, color_billable) = consume(&mut allowance.color, usage.color);
            DeviceCharge {
                amount: Decimal::from(bw_billable) * terms.cost_bw_per_copy
                    + Decimal::from(color_billable) * terms.cost_color_per_copy,
                allowance_bw_consumed: bw_consumed,
                allowance_color_consumed: color_consumed,
            }
        }
        ContractType::MonthlyFixed | ContractType::AnnualFixed => DeviceCharge {
            amount: Decimal::ZERO,
            allowance_bw_consumed: 0,
            allowance_color_consumed: 0,
        },
    }
}

/// The contract-level fixed fee for the period, added once per invoice.
///
/// Annual contracts billed per period are prorated to the period length:
/// `fixed_annual_cost * period_days / 365`, with days inclusive of both
/// endpoints.
pub fn contract_fixed_fee(
    terms: &PricingTerms,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> Decimal {
    match terms.contract_type {
        ContractType::CostPerCopy => Decimal::ZERO,
        ContractType::FixedCostPerQuantity | ContractType::MonthlyFixed => {
            terms.fixed_monthly_cost
        }
        ContractType::AnnualFixed => {
            let period_days = (period_end - period_start).num_days() + 1;
            (terms.fixed_annual_cost * Decimal::from(period_days) / Decimal::from(365)).round_dp(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn terms(contract_type: ContractType) -> PricingTerms {
        PricingTerms {
            contract_type,
            cost_bw_per_copy: dec("0.05"),
            cost_color_per_copy: dec("0.20"),
            fixed_monthly_cost: dec("150.00"),
            fixed_annual_cost: dec("3650"),
            included_copies_bw: 1000,
            included_copies_color: 200,
            currency: "EUR".to_string(),
        }
    }

    fn usage(bw: i64, color: i64) -> UsageSet {
        UsageSet {
            bw,
            color,
            total: bw + color,
        }
    }

    #[test]
    fn cost_per_copy_prices_every_copy() {
        let terms = terms(ContractType::CostPerCopy);
        let mut allowance = Allowance::from_terms(&terms);
        let charge = price_device(&usage(450, 60), &terms, &mut allowance);
        // 450 * 0.05 + 60 * 0.20 = 22.50 + 12.00
        assert_eq!(charge.amount, dec("34.50"));
        assert_eq!(charge.allowance_bw_consumed, 0);
        assert_eq!(allowance, Allowance { bw: 0, color: 0 });
    }

    #[test]
    fn allowance_is_shared_across_devices() {
        let terms = terms(ContractType::FixedCostPerQuantity);
        let mut allowance = Allowance::from_terms(&terms);

        let first = price_device(&usage(700, 0), &terms, &mut allowance);
        assert_eq!(first.amount, Decimal::ZERO);
        assert_eq!(first.allowance_bw_consumed, 700);
        assert_eq!(allowance.bw, 300);

        // Cumulative bw usage 1300 against 1000 included: 300 billable.
        let second = price_device(&usage(600, 0), &terms, &mut allowance);
        assert_eq!(second.allowance_bw_consumed, 300);
        assert_eq!(second.amount, dec("15.00"));
        assert_eq!(allowance.bw, 0);
    }

    #[test]
    fn allowance_conservation_over_device_order() {
        let terms = terms(ContractType::FixedCostPerQuantity);
        let usages = [380_i64, 240, 512, 77, 301];

        let total_usage: i64 = usages.iter().sum();
        let expected_billable = (total_usage - terms.included_copies_bw).max(0);

        for order in [[0usize, 1, 2, 3, 4], [4, 2, 0, 3, 1]] {
            let mut allowance = Allowance::from_terms(&terms);
            let billed: Decimal = order
                .iter()
                .map(|&i| price_device(&usage(usages[i], 0), &terms, &mut allowance).amount)
                .sum();
            assert_eq!(billed, Decimal::from(expected_billable) * terms.cost_bw_per_copy);
        }
    }

    #[test]
    fn fixed_models_price_devices_at_zero() {
        for contract_type in [ContractType::MonthlyFixed, ContractType::AnnualFixed] {
            let terms = terms(contract_type);
            let mut allowance = Allowance::from_terms(&terms);
            let charge = price_device(&usage(10_000, 5_000), &terms, &mut allowance);
            assert_eq!(charge.amount, Decimal::ZERO);
        }
    }

    #[test]
    fn monthly_fixed_fee_is_flat() {
        let terms = terms(ContractType::MonthlyFixed);
        let fee = contract_fixed_fee(
            &terms,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        );
        assert_eq!(fee, dec("150.00"));
    }

    #[test]
    fn annual_fixed_fee_is_prorated_to_period_days() {
        let terms = terms(ContractType::AnnualFixed);
        // 30-day period: 3650 * 30 / 365 = 300
        let fee = contract_fixed_fee(
            &terms,
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
        );
        assert_eq!(fee, dec("300.00"));
    }

    #[test]
    fn cost_per_copy_has_no_fixed_fee() {
        let terms = terms(ContractType::CostPerCopy);
        let fee = contract_fixed_fee(
            &terms,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        );
        assert_eq!(fee, Decimal::ZERO);
    }
}
