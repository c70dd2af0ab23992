mod common;

use common::{TestApp, TEST_CHECKOUT_REQUEST_ID, TEST_MERCHANT_REQUEST_ID};
use mongodb::bson::doc;
use payments_service::models::{Invoice, Payment};
use payments_service::services::{
    DarajaClient, PaymentRepository, ReconciliationSweep, Reconciler,
};
use reqwest::Client;
use uuid::Uuid;

fn sweep_for(app: &TestApp) -> ReconciliationSweep {
    let repository = PaymentRepository::new(&app.db);
    let daraja = DarajaClient::new(app.config.mpesa.clone());
    let reconciler = Reconciler::new(repository.clone());
    ReconciliationSweep::new(repository, daraja, reconciler, app.config.sweep.clone())
}

async fn stored_payment(app: &TestApp) -> Payment {
    app.db
        .collection::<Payment>("payments")
        .find_one(
            doc! { "merchant_request_id": TEST_MERCHANT_REQUEST_ID },
            None,
        )
        .await
        .expect("Failed to query payment")
        .expect("Payment not found")
}

async fn stored_invoice(app: &TestApp, id: Uuid) -> Invoice {
    app.db
        .collection::<Invoice>("invoices")
        .find_one(doc! { "_id": id.to_string() }, None)
        .await
        .expect("Failed to query invoice")
        .expect("Invoice not found")
}

#[tokio::test]
async fn sweep_resolves_stale_pending_payment_via_status_query() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    app.mock_gateway_accepts().await;
    let patient_id = Uuid::new_v4();
    let invoice_id = app.create_invoice(&client, patient_id).await;
    app.initiate_payment(&client, invoice_id, patient_id).await;

    // The callback never arrives; the gateway reports success when asked
    app.mock_stk_query("0", "The service request is processed successfully.")
        .await;

    sweep_for(&app).run_once().await.expect("Sweep failed");

    let payment = stored_payment(&app).await;
    assert_eq!(serde_json::to_value(payment.status).unwrap(), "completed");

    let invoice = stored_invoice(&app, invoice_id).await;
    assert_eq!(serde_json::to_value(invoice.status).unwrap(), "paid");

    app.cleanup().await;
}

#[tokio::test]
async fn sweep_marks_user_cancelled_payment_failed() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    app.mock_gateway_accepts().await;
    let patient_id = Uuid::new_v4();
    let invoice_id = app.create_invoice(&client, patient_id).await;
    app.initiate_payment(&client, invoice_id, patient_id).await;

    app.mock_stk_query("1032", "Request cancelled by user.").await;

    sweep_for(&app).run_once().await.expect("Sweep failed");

    let payment = stored_payment(&app).await;
    assert_eq!(serde_json::to_value(payment.status).unwrap(), "failed");

    let invoice = stored_invoice(&app, invoice_id).await;
    assert_eq!(serde_json::to_value(invoice.status).unwrap(), "pending");

    app.cleanup().await;
}

#[tokio::test]
async fn sweep_leaves_in_flight_payment_pending() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    app.mock_gateway_accepts().await;
    let patient_id = Uuid::new_v4();
    let invoice_id = app.create_invoice(&client, patient_id).await;
    app.initiate_payment(&client, invoice_id, patient_id).await;

    app.mock_stk_query_in_flight().await;

    sweep_for(&app).run_once().await.expect("Sweep failed");

    let payment = stored_payment(&app).await;
    assert_eq!(serde_json::to_value(payment.status).unwrap(), "pending");

    let invoice = stored_invoice(&app, invoice_id).await;
    assert_eq!(serde_json::to_value(invoice.status).unwrap(), "pending");

    app.cleanup().await;
}

#[tokio::test]
async fn sweep_repairs_invoice_missed_by_interrupted_dual_write() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    app.mock_gateway_accepts().await;
    let patient_id = Uuid::new_v4();
    let invoice_id = app.create_invoice(&client, patient_id).await;
    app.initiate_payment(&client, invoice_id, patient_id).await;

    // Simulate a reconciliation that died between the payment write and the
    // invoice write: complete the payment directly, leaving the invoice
    // pending
    let repository = PaymentRepository::new(&app.db);
    let completed = repository
        .complete_payment_if_pending(
            TEST_MERCHANT_REQUEST_ID,
            TEST_CHECKOUT_REQUEST_ID,
            &payments_service::services::repository::CompletedPayment {
                receipt_number: Some("NLJ7RT61SV".to_string()),
                phone: None,
                transaction_date: mongodb::bson::DateTime::now(),
                description: "The service request is processed successfully.".to_string(),
            },
        )
        .await
        .expect("Failed to complete payment");
    assert!(completed);
    assert_eq!(
        serde_json::to_value(stored_invoice(&app, invoice_id).await.status).unwrap(),
        "pending"
    );

    sweep_for(&app).run_once().await.expect("Sweep failed");

    let invoice = stored_invoice(&app, invoice_id).await;
    assert_eq!(serde_json::to_value(invoice.status).unwrap(), "paid");

    app.cleanup().await;
}
