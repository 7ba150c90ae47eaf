//! Invoice generation integration tests for fleet-billing-service.

mod common;

use common::{
    create_cost_per_copy_contract, create_period, record_reading, register_device, with_tenant,
    TestApp, TEST_TENANT_ID,
};
use fleet_billing_service::grpc::proto::*;

async fn close_period(
    client: &mut fleet_billing_service::grpc::proto::fleet_billing_service_client::FleetBillingServiceClient<
        tonic::transport::Channel,
    >,
    period_id: &str,
) {
    client
        .close_period(with_tenant(
            TEST_TENANT_ID,
            ClosePeriodRequest {
                period_id: period_id.to_string(),
            },
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn build_invoice_prices_usage_and_applies_tax() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-2001").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;
    record_reading(&mut client, &device.device_id, &period.period_id, 1450, 260).await;
    close_period(&mut client, &period.period_id).await;

    let response = client
        .build_invoice(with_tenant(
            TEST_TENANT_ID,
            BuildInvoiceRequest {
                contract_id: contract.contract_id.clone(),
                period_id: period.period_id.clone(),
            },
        ))
        .await
        .unwrap()
        .into_inner();

    assert!(!response.already_existed);
    let invoice = response.invoice.unwrap();
    // 1450 * 0.05 + 260 * 0.20 = 124.50, 10% tax configured in the harness.
    assert_eq!(invoice.subtotal, "124.50");
    assert_eq!(invoice.tax_amount, "12.45");
    assert_eq!(invoice.total_amount, "136.95");
    assert_eq!(invoice.status, InvoiceStatus::Draft as i32);
    assert_eq!(invoice.currency, "EUR");
    assert_eq!(invoice.lines.len(), 1);
    assert!(invoice.invoice_number.starts_with("INV-"));

    app.cleanup().await;
}

#[tokio::test]
async fn build_invoice_requires_closed_period() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-2002").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;
    record_reading(&mut client, &device.device_id, &period.period_id, 100, 10).await;

    let status = client
        .build_invoice(with_tenant(
            TEST_TENANT_ID,
            BuildInvoiceRequest {
                contract_id: contract.contract_id,
                period_id: period.period_id,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    app.cleanup().await;
}

#[tokio::test]
async fn build_invoice_is_all_or_nothing() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-2003").await;
    let period = create_period(&mut client, "2026-01").await;
    let covered = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;
    let missing = register_device(&mut client, "Back office", &contract.contract_id).await;
    record_reading(&mut client, &covered.device_id, &period.period_id, 100, 10).await;
    close_period(&mut client, &period.period_id).await;

    let status = client
        .build_invoice(with_tenant(
            TEST_TENANT_ID,
            BuildInvoiceRequest {
                contract_id: contract.contract_id.clone(),
                period_id: period.period_id.clone(),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    // The missing device is named so the operator can resolve it.
    assert!(status.message().contains(&missing.device_id));

    // No invoice was persisted.
    let invoices = client
        .list_invoices(with_tenant(
            TEST_TENANT_ID,
            ListInvoicesRequest {
                contract_id: contract.contract_id,
                period_id: period.period_id,
                status: 0,
                page_size: 10,
                page_token: String::new(),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(invoices.invoices.is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn rebuilding_returns_the_existing_draft_unchanged() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-2004").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;
    record_reading(&mut client, &device.device_id, &period.period_id, 1450, 260).await;
    close_period(&mut client, &period.period_id).await;

    let request = BuildInvoiceRequest {
        contract_id: contract.contract_id.clone(),
        period_id: period.period_id.clone(),
    };
    let first = client
        .build_invoice(with_tenant(TEST_TENANT_ID, request.clone()))
        .await
        .unwrap()
        .into_inner();
    let second = client
        .build_invoice(with_tenant(TEST_TENANT_ID, request))
        .await
        .unwrap()
        .into_inner();

    assert!(!first.already_existed);
    assert!(second.already_existed);

    let first = first.invoice.unwrap();
    let second = second.invoice.unwrap();
    assert_eq!(first.invoice_id, second.invoice_id);
    assert_eq!(first.total_amount, second.total_amount);

    app.cleanup().await;
}

#[tokio::test]
async fn shared_allowance_carries_across_devices() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = client
        .create_contract(with_tenant(
            TEST_TENANT_ID,
            CreateContractRequest {
                contract_number: "CT-2005".to_string(),
                name: "Volume lease".to_string(),
                supplier: "PrintCo".to_string(),
                contract_type: ContractType::FixedCostPerQuantity as i32,
                cost_bw_per_copy: "0.05".to_string(),
                cost_color_per_copy: "0.20".to_string(),
                fixed_monthly_cost: "150.00".to_string(),
                fixed_annual_cost: "0".to_string(),
                included_copies_bw: 1000,
                included_copies_color: 0,
                currency: "EUR".to_string(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .contract
        .unwrap();

    let period = create_period(&mut client, "2026-01").await;
    let first = register_device(&mut client, "Floor 1", &contract.contract_id).await;
    let second = register_device(&mut client, "Floor 2", &contract.contract_id).await;
    record_reading(&mut client, &first.device_id, &period.period_id, 700, 0).await;
    record_reading(&mut client, &second.device_id, &period.period_id, 600, 0).await;
    close_period(&mut client, &period.period_id).await;

    let invoice = client
        .build_invoice(with_tenant(
            TEST_TENANT_ID,
            BuildInvoiceRequest {
                contract_id: contract.contract_id,
                period_id: period.period_id,
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap();

    // Cumulative 1300 bw against 1000 included: 300 billable at 0.05 plus the
    // 150.00 fixed component.
    assert_eq!(invoice.subtotal, "165.00");
    let consumed: i64 = invoice
        .lines
        .iter()
        .map(|l| l.allowance_bw_consumed)
        .sum();
    assert_eq!(consumed, 1000);

    app.cleanup().await;
}

#[tokio::test]
async fn sending_an_invoice_locks_its_snapshots() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-2006").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;
    record_reading(&mut client, &device.device_id, &period.period_id, 1450, 260).await;
    close_period(&mut client, &period.period_id).await;

    let invoice = client
        .build_invoice(with_tenant(
            TEST_TENANT_ID,
            BuildInvoiceRequest {
                contract_id: contract.contract_id.clone(),
                period_id: period.period_id.clone(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap();

    let sent = client
        .send_invoice(with_tenant(
            TEST_TENANT_ID,
            SendInvoiceRequest {
                invoice_id: invoice.invoice_id.clone(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap();
    assert_eq!(sent.status, InvoiceStatus::Sent as i32);
    assert!(sent.sent_at.is_some());

    // The contributing snapshot is now locked.
    let snapshot = client
        .get_meter_reading(with_tenant(
            TEST_TENANT_ID,
            GetMeterReadingRequest {
                device_id: device.device_id,
                period_id: period.period_id,
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .snapshot
        .unwrap();
    assert!(snapshot.locked);

    // Sending twice is refused; the invoice is immutable once sent.
    let status = client
        .send_invoice(with_tenant(
            TEST_TENANT_ID,
            SendInvoiceRequest {
                invoice_id: invoice.invoice_id,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    app.cleanup().await;
}

#[tokio::test]
async fn preview_does_not_persist_a_draft() {
    let app = TestApp::spawn().await;
    let mut client = app.grpc_client().await;

    let contract = create_cost_per_copy_contract(&mut client, "CT-2007").await;
    let period = create_period(&mut client, "2026-01").await;
    let device = register_device(&mut client, "Lobby MFP", &contract.contract_id).await;
    record_reading(&mut client, &device.device_id, &period.period_id, 1450, 260).await;
    close_period(&mut client, &period.period_id).await;

    let preview = client
        .preview_invoice(with_tenant(
            TEST_TENANT_ID,
            PreviewInvoiceRequest {
                contract_id: contract.contract_id.clone(),
                period_id: period.period_id.clone(),
            },
        ))
        .await
        .unwrap()
        .into_inner()
        .invoice
        .unwrap();
    assert_eq!(preview.subtotal, "124.50");
    assert!(preview.invoice_id.is_empty());

    let invoices = client
        .list_invoices(with_tenant(
            TEST_TENANT_ID,
            ListInvoicesRequest {
                contract_id: contract.contract_id,
                period_id: period.period_id,
                status: 0,
                page_size: 10,
                page_token: String::new(),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(invoices.invoices.is_empty());

    app.cleanup().await;
}
