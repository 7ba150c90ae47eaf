//! Invoicing wizard integration tests for fleet-billing-service.

mod common;

use common::{create_cost_per_copy_contract, create_period, with_tenant, TestApp, TEST_TENANT_ID};
use fleet_billing_service::grpc::proto::*;

#[tokio::test]
async fn wizard_blocks_until_targets_are_selected() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    // Nothing selected: advancing is refused and the state is unchanged.
    let response = client
        .advance_wizard(with_tenant(
            TEST_TENANT_ID,
            AdvanceWizardRequest {
                state: Some(WizardState {
                    step: WizardStep::SelectTargets as i32,
                    ..Default::default()
                }),
                action: WizardAction::Next as i32,
            },
        ))
        .await
        .unwrap()
        .into_inner();

    assert!(!response.blocked_reason.is_empty());
    assert_eq!(
        response.state.unwrap().step,
        WizardStep::SelectTargets as i32
    );

    app.cleanup().await;
}

#[tokio::test]
async fn wizard_advances_with_selections_and_cancels_cleanly() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-3001").await;
    let period = create_period(&mut client, "2026-01").await;

    let selected = WizardState {
        step: WizardStep::SelectTargets as i32,
        period_id: period.period_id.clone(),
        contract_id: contract.contract_id.clone(),
        ..Default::default()
    };

    let advanced = client
        .advance_wizard(with_tenant(
            TEST_TENANT_ID,
            AdvanceWizardRequest {
                state: Some(selected.clone()),
                action: WizardAction::Next as i32,
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(advanced.blocked_reason.is_empty());
    assert_eq!(
        advanced.state.as_ref().unwrap().step,
        WizardStep::ReviewTerms as i32
    );

    // Cancel discards the selections entirely.
    let cancelled = client
        .advance_wizard(with_tenant(
            TEST_TENANT_ID,
            AdvanceWizardRequest {
                state: advanced.state,
                action: WizardAction::Cancel as i32,
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .state
        .unwrap();
    assert_eq!(cancelled.step, WizardStep::SelectTargets as i32);
    assert!(cancelled.period_id.is_empty());
    assert!(cancelled.contract_id.is_empty());

    app.cleanup().await;
}
