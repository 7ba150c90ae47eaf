//! Meter reading integration tests for fleet-billing-service.

mod common;

use common::{
    create_cost_per_copy_contract, create_period, record_reading, register_device, with_tenant,
    TestApp, TEST_TENANT_ID,
};
use fleet_billing_service::grpc::proto::*;

#[tokio::test]
async fn record_meter_reading_computes_clamped_deltas() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-0001").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;

    let snapshot = record_reading(&mut client, &device.device_id, &period.period_id, 1450, 260).await;

    // No prior period: baseline is zero.
    assert_eq!(snapshot.previous_bw, 0);
    assert_eq!(snapshot.prints_bw, 1450);
    assert_eq!(snapshot.prints_color, 260);
    assert!(!snapshot.anomaly);
    assert!(!snapshot.locked);

    app.cleanup().await;
}

#[tokio::test]
async fn rerecording_a_reading_upserts_in_place() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-0002").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;

    let first = record_reading(&mut client, &device.device_id, &period.period_id, 1000, 100).await;
    let second = record_reading(&mut client, &device.device_id, &period.period_id, 1200, 150).await;

    // Same row, corrected counters.
    assert_eq!(first.snapshot_id, second.snapshot_id);
    assert_eq!(second.prints_bw, 1200);

    let listed = client
        .list_meter_readings(with_tenant(
            TEST_TENANT_ID,
            ListMeterReadingsRequest {
                period_id: period.period_id.clone(),
                device_id: String::new(),
                page_size: 10,
                page_token: String::new(),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(listed.snapshots.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
async fn negative_counter_is_rejected() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-0003").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;

    let status = client
        .record_meter_reading(with_tenant(
            TEST_TENANT_ID,
            RecordMeterReadingRequest {
                device_id: device.device_id,
                period_id: period.period_id,
                bw_count: -5,
                color_count: Some(0),
                total_count: 0,
                method: ReadingMethod::Manual as i32,
                notes: String::new(),
                recorded_at: None,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    app.cleanup().await;
}

#[tokio::test]
async fn locked_snapshot_rejects_writes_until_unlocked() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-0004").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;

    let snapshot = record_reading(&mut client, &device.device_id, &period.period_id, 500, 50).await;

    client
        .lock_snapshot(with_tenant(
            TEST_TENANT_ID,
            LockSnapshotRequest {
                snapshot_id: snapshot.snapshot_id.clone(),
            },
        ))
        .await
        .unwrap();

    let status = client
        .record_meter_reading(with_tenant(
            TEST_TENANT_ID,
            RecordMeterReadingRequest {
                device_id: device.device_id.clone(),
                period_id: period.period_id.clone(),
                bw_count: 600,
                color_count: Some(60),
                total_count: 660,
                method: ReadingMethod::Manual as i32,
                notes: String::new(),
                recorded_at: None,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    // Unlock and the write goes through.
    client
        .unlock_snapshot(with_tenant(
            TEST_TENANT_ID,
            UnlockSnapshotRequest {
                snapshot_id: snapshot.snapshot_id,
            },
        ))
        .await
        .unwrap();
    let updated = record_reading(&mut client, &device.device_id, &period.period_id, 600, 60).await;
    assert_eq!(updated.prints_bw, 600);

    app.cleanup().await;
}

#[tokio::test]
async fn closed_period_rejects_new_readings() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-0005").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;

    client
        .close_period(with_tenant(
            TEST_TENANT_ID,
            ClosePeriodRequest {
                period_id: period.period_id.clone(),
            },
        ))
        .await
        .unwrap();

    let status = client
        .record_meter_reading(with_tenant(
            TEST_TENANT_ID,
            RecordMeterReadingRequest {
                device_id: device.device_id,
                period_id: period.period_id,
                bw_count: 100,
                color_count: Some(10),
                total_count: 110,
                method: ReadingMethod::Manual as i32,
                notes: String::new(),
                recorded_at: None,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    app.cleanup().await;
}

#[tokio::test]
async fn batch_import_reports_per_device_outcomes() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-0006").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;

    let unknown_device = "99999999-9999-9999-9999-999999999999";
    let response = client
        .import_meter_readings(with_tenant(
            TEST_TENANT_ID,
            ImportMeterReadingsRequest {
                period_id: period.period_id.clone(),
                method: ReadingMethod::Snmp as i32,
                readings: vec![
                    ImportReading {
                        device_id: device.device_id.clone(),
                        bw_count: 800,
                        color_count: Some(90),
                        total_count: 890,
                        recorded_at: None,
                    },
                    ImportReading {
                        device_id: unknown_device.to_string(),
                        bw_count: 100,
                        color_count: Some(10),
                        total_count: 110,
                        recorded_at: None,
                    },
                ],
            },
        ))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.succeeded, 1);
    assert_eq!(response.failed, 1);
    assert_eq!(response.results.len(), 2);

    match response.results[0].outcome.as_ref().unwrap() {
        import_result::Outcome::Snapshot(snapshot) => {
            assert_eq!(snapshot.prints_bw, 800);
            assert_eq!(
                snapshot.method,
                ReadingMethod::Snmp as i32
            );
        }
        other => panic!("expected snapshot outcome, got {other:?}"),
    }
    match response.results[1].outcome.as_ref().unwrap() {
        import_result::Outcome::Failure(failure) => {
            assert_eq!(
                failure.reason,
                ImportFailureReason::DeviceNotFound as i32
            );
        }
        other => panic!("expected failure outcome, got {other:?}"),
    }

    app.cleanup().await;
}
