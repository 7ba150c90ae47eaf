//! Delta calculation between successive meter snapshots.

use serde::{Deserialize, Serialize};

use crate::billing::error::BillingError;

/// Absolute counter values reported by a device at one point in time.
///
/// `color` is absent on mono-only devices; the arity must match between the
/// two snapshots being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    pub bw: i64,
    pub color: Option<i64>,
    pub total: i64,
}

impl CounterSet {
    pub fn zero_like(other: &CounterSet) -> Self {
        Self {
            bw: 0,
            color: other.color.map(|_| 0),
            total: 0,
        }
    }
}

/// Per-channel usage for one period. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSet {
    pub bw: i64,
    pub color: i64,
    pub total: i64,
}

/// Usage plus the rollover anomaly flag.
///
/// `anomaly` is a warning, not an error: a counter that went backwards
/// (device replacement, counter reset) clamps that channel to zero and the
/// period is flagged for manual review. `total` is not reconciled against
/// `bw + color`; callers use whichever channel their pricing model needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodUsage {
    pub usage: UsageSet,
    pub anomaly: bool,
}

fn channel_delta(current: i64, previous: i64) -> (i64, bool) {
    if current < previous {
        (0, true)
    } else {
        (current - previous, false)
    }
}

/// Compute the billable usage between two successive snapshots.
///
/// Each channel is `max(0, current - previous)`. A negative delta cannot
/// represent real consumption, so it clamps to zero and sets `anomaly`.
/// Rejects negative current counters and color-channel arity mismatches
/// with `InvalidReading`.
pub fn compute_usage(
    current: &CounterSet,
    previous: &CounterSet,
) -> Result<PeriodUsage, BillingError> {
    if current.bw < 0 || current.total < 0 || current.color.is_some_and(|c| c < 0) {
        return Err(BillingError::InvalidReading(format!(
            "negative counter value (bw={}, color={:?}, total={})",
            current.bw, current.color, current.total
        )));
    }

    let color = match (current.color, previous.color) {
        (Some(cur), Some(prev)) => Some(channel_delta(cur, prev)),
        (None, None) => None,
        (cur, prev) => {
            return Err(BillingError::InvalidReading(format!(
                "color channel arity mismatch (current={:?}, previous={:?})",
                cur, prev
            )));
        }
    };

    let (bw, bw_anomaly) = channel_delta(current.bw, previous.bw);
    let (total, total_anomaly) = channel_delta(current.total, previous.total);
    let (color_usage, color_anomaly) = color.unwrap_or((0, false));

    Ok(PeriodUsage {
        usage: UsageSet {
            bw,
            color: color_usage,
            total,
        },
        anomaly: bw_anomaly || color_anomaly || total_anomaly,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(bw: i64, color: i64, total: i64) -> CounterSet {
        CounterSet {
            bw,
            color: Some(color),
            total,
        }
    }

    #[test]
    fn computes_per_channel_deltas() {
        let result =
            compute_usage(&counters(1450, 260, 1710), &counters(1000, 200, 1200)).unwrap();
        assert_eq!(result.usage.bw, 450);
        assert_eq!(result.usage.color, 60);
        assert_eq!(result.usage.total, 510);
        assert!(!result.anomaly);
    }

    #[test]
    fn usage_is_never_negative() {
        let result = compute_usage(&counters(500, 50, 550), &counters(1000, 200, 1200)).unwrap();
        assert!(result.usage.bw >= 0);
        assert!(result.usage.color >= 0);
        assert!(result.usage.total >= 0);
    }

    #[test]
    fn rollover_clamps_to_zero_and_flags_anomaly() {
        let result = compute_usage(&counters(300, 260, 1710), &counters(1000, 200, 1200)).unwrap();
        assert_eq!(result.usage.bw, 0);
        assert_eq!(result.usage.color, 60);
        assert!(result.anomaly);
    }

    #[test]
    fn single_channel_rollover_flags_whole_reading() {
        let result = compute_usage(&counters(1450, 100, 1710), &counters(1000, 200, 1200)).unwrap();
        assert_eq!(result.usage.color, 0);
        assert_eq!(result.usage.bw, 450);
        assert!(result.anomaly);
    }

    #[test]
    fn mono_device_has_zero_color_usage() {
        let current = CounterSet {
            bw: 2000,
            color: None,
            total: 2000,
        };
        let previous = CounterSet {
            bw: 1500,
            color: None,
            total: 1500,
        };
        let result = compute_usage(&current, &previous).unwrap();
        assert_eq!(result.usage.bw, 500);
        assert_eq!(result.usage.color, 0);
    }

    #[test]
    fn negative_current_counter_is_rejected() {
        let err = compute_usage(&counters(-1, 0, 0), &counters(0, 0, 0)).unwrap_err();
        assert!(matches!(err, BillingError::InvalidReading(_)));
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let current = counters(100, 10, 110);
        let previous = CounterSet {
            bw: 50,
            color: None,
            total: 50,
        };
        let err = compute_usage(&current, &previous).unwrap_err();
        assert!(matches!(err, BillingError::InvalidReading(_)));
    }

    #[test]
    fn total_drift_is_not_reconciled() {
        // Device reports channels independently; total drifts from bw + color.
        let result = compute_usage(&counters(1450, 260, 1600), &counters(1000, 200, 1200)).unwrap();
        assert_eq!(result.usage.total, 400);
        assert_ne!(result.usage.total, result.usage.bw + result.usage.color);
        assert!(!result.anomaly);
    }

    #[test]
    fn zero_baseline_for_first_period() {
        let current = counters(1200, 340, 1540);
        let baseline = CounterSet::zero_like(&current);
        let result = compute_usage(&current, &baseline).unwrap();
        assert_eq!(result.usage.bw, 1200);
        assert_eq!(result.usage.color, 340);
        assert_eq!(result.usage.total, 1540);
    }
}
