//! The invoicing wizard sequencer.
//!
//! A linear seven-step flow that gates the operator workflow around the
//! billing engine. The state is a plain value passed between steps; each
//! transition is guarded by a pure predicate, so the console holds no
//! business rules and the server holds no per-operator session. Nothing is
//! persisted before the draft-generation step commits a draft.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The seven wizard steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    SelectTargets,
    ReviewTerms,
    ValidateReadings,
    CalculateAmounts,
    Preview,
    GenerateDraft,
    Send,
}

impl WizardStep {
    const ORDER: [WizardStep; 7] = [
        WizardStep::SelectTargets,
        WizardStep::ReviewTerms,
        WizardStep::ValidateReadings,
        WizardStep::CalculateAmounts,
        WizardStep::Preview,
        WizardStep::GenerateDraft,
        WizardStep::Send,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }

    fn next(self) -> Option<WizardStep> {
        Self::ORDER.get(self.index() + 1).copied()
    }

    fn previous(self) -> Option<WizardStep> {
        self.index().checked_sub(1).map(|i| Self::ORDER[i])
    }

    pub fn to_proto(&self) -> i32 {
        self.index() as i32 + 1
    }

    pub fn from_proto(value: i32) -> Self {
        usize::try_from(value - 1)
            .ok()
            .and_then(|i| Self::ORDER.get(i).copied())
            .unwrap_or(WizardStep::SelectTargets)
    }
}

/// Operator actions against the wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardAction {
    Next,
    Back,
    Cancel,
}

/// Why a transition was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WizardError {
    #[error("select both a billing period and a contract first")]
    TargetsNotSelected,
    #[error("counter readings have not been validated")]
    ReadingsNotValidated,
    #[error("amounts have not been calculated")]
    AmountsNotCalculated,
    #[error("no draft invoice has been generated")]
    DraftNotGenerated,
    #[error("already at the first step")]
    AtFirstStep,
    #[error("the wizard is complete")]
    AtLastStep,
}

/// In-flight wizard state, passed by value between steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardState {
    pub step: WizardStep,
    pub period_id: Option<Uuid>,
    pub contract_id: Option<Uuid>,
    pub readings_validated: bool,
    pub amounts_calculated: bool,
    pub computed_total: Option<Decimal>,
    pub draft_invoice_id: Option<Uuid>,
}

impl Default for WizardState {
    fn default() -> Self {
        Self::new()
    }
}

impl WizardState {
    /// A pristine wizard at the first step with nothing selected.
    pub fn new() -> Self {
        Self {
            step: WizardStep::SelectTargets,
            period_id: None,
            contract_id: None,
            readings_validated: false,
            amounts_calculated: false,
            computed_total: None,
            draft_invoice_id: None,
        }
    }

    /// Precondition for leaving the current step.
    pub fn can_advance(&self) -> Result<(), WizardError> {
        match self.step {
            WizardStep::SelectTargets => {
                if self.period_id.is_none() || self.contract_id.is_none() {
                    return Err(WizardError::TargetsNotSelected);
                }
            }
            WizardStep::ReviewTerms => {}
            WizardStep::ValidateReadings => {
                if !self.readings_validated {
                    return Err(WizardError::ReadingsNotValidated);
                }
            }
            WizardStep::CalculateAmounts => {
                if !self.amounts_calculated {
                    return Err(WizardError::AmountsNotCalculated);
                }
            }
            WizardStep::Preview => {
                if !self.amounts_calculated {
                    return Err(WizardError::AmountsNotCalculated);
                }
            }
            WizardStep::GenerateDraft => {
                if self.draft_invoice_id.is_none() {
                    return Err(WizardError::DraftNotGenerated);
                }
            }
            WizardStep::Send => return Err(WizardError::AtLastStep),
        }
        Ok(())
    }

    /// Move forward one step if the current step's precondition holds.
    pub fn advance(mut self) -> Result<Self, WizardError> {
        self.can_advance()?;
        self.step = self.step.next().ok_or(WizardError::AtLastStep)?;
        Ok(self)
    }

    /// Move back one step, invalidating work produced at or after the
    /// destination so it is redone on the way forward.
    pub fn back(mut self) -> Result<Self, WizardError> {
        let destination = self.step.previous().ok_or(WizardError::AtFirstStep)?;
        if destination <= WizardStep::ValidateReadings {
            self.readings_validated = false;
        }
        if destination <= WizardStep::CalculateAmounts {
            self.amounts_calculated = false;
            self.computed_total = None;
        }
        if destination <= WizardStep::GenerateDraft {
            self.draft_invoice_id = None;
        }
        self.step = destination;
        Ok(self)
    }

    /// Abandon the flow: all selections discarded, back to the first step.
    pub fn cancel(self) -> Self {
        Self::new()
    }

    /// Apply an operator action.
    pub fn apply(self, action: WizardAction) -> Result<Self, WizardError> {
        match action {
            WizardAction::Next => self.advance(),
            WizardAction::Back => self.back(),
            WizardAction::Cancel => Ok(self.cancel()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected() -> WizardState {
        WizardState {
            period_id: Some(Uuid::new_v4()),
            contract_id: Some(Uuid::new_v4()),
            ..WizardState::new()
        }
    }

    #[test]
    fn cannot_leave_first_step_without_selections() {
        let state = WizardState::new();
        assert_eq!(
            state.advance().unwrap_err(),
            WizardError::TargetsNotSelected
        );

        let partial = WizardState {
            period_id: Some(Uuid::new_v4()),
            ..WizardState::new()
        };
        assert_eq!(
            partial.advance().unwrap_err(),
            WizardError::TargetsNotSelected
        );
    }

    #[test]
    fn happy_path_walks_all_seven_steps() {
        let mut state = selected();
        state = state.advance().unwrap();
        assert_eq!(state.step, WizardStep::ReviewTerms);
        state = state.advance().unwrap();
        assert_eq!(state.step, WizardStep::ValidateReadings);

        state.readings_validated = true;
        state = state.advance().unwrap();
        assert_eq!(state.step, WizardStep::CalculateAmounts);

        state.amounts_calculated = true;
        state.computed_total = Some("34.50".parse().unwrap());
        state = state.advance().unwrap();
        assert_eq!(state.step, WizardStep::Preview);

        state = state.advance().unwrap();
        assert_eq!(state.step, WizardStep::GenerateDraft);

        state.draft_invoice_id = Some(Uuid::new_v4());
        state = state.advance().unwrap();
        assert_eq!(state.step, WizardStep::Send);
        assert_eq!(state.advance().unwrap_err(), WizardError::AtLastStep);
    }

    #[test]
    fn validation_gate_blocks_calculation() {
        let mut state = selected();
        state = state.advance().unwrap().advance().unwrap();
        assert_eq!(state.step, WizardStep::ValidateReadings);
        assert_eq!(
            state.advance().unwrap_err(),
            WizardError::ReadingsNotValidated
        );
    }

    #[test]
    fn draft_gate_blocks_send() {
        let mut state = selected();
        state.readings_validated = true;
        state.amounts_calculated = true;
        state.step = WizardStep::GenerateDraft;
        assert_eq!(state.advance().unwrap_err(), WizardError::DraftNotGenerated);
    }

    #[test]
    fn back_invalidates_downstream_work() {
        let mut state = selected();
        state.step = WizardStep::Preview;
        state.readings_validated = true;
        state.amounts_calculated = true;
        state.computed_total = Some("10".parse().unwrap());

        let state = state.back().unwrap();
        assert_eq!(state.step, WizardStep::CalculateAmounts);
        assert!(!state.amounts_calculated);
        assert!(state.computed_total.is_none());
        // Validation happened before the destination step; it survives.
        assert!(state.readings_validated);
    }

    #[test]
    fn back_from_first_step_is_refused() {
        let state = WizardState::new();
        assert_eq!(state.back().unwrap_err(), WizardError::AtFirstStep);
    }

    #[test]
    fn cancel_discards_everything() {
        let mut state = selected();
        state.step = WizardStep::Preview;
        state.readings_validated = true;
        state.amounts_calculated = true;
        assert_eq!(state.apply(WizardAction::Cancel).unwrap(), WizardState::new());
    }

    #[test]
    fn proto_round_trip_covers_all_steps() {
        for step in WizardStep::ORDER {
            assert_eq!(WizardStep::from_proto(step.to_proto()), step);
        }
        assert_eq!(WizardStep::from_proto(0), WizardStep::SelectTargets);
        assert_eq!(WizardStep::from_proto(99), WizardStep::SelectTargets);
    }
}
