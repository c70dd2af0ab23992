mod common;

use common::TestApp;
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn create_invoice_computes_total_from_line_items() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/invoices", app.address))
        .json(&json!({
            "patient_id": Uuid::new_v4(),
            "items": [
                { "description": "Consultation", "price": 1000.0 },
                { "description": "Lab work", "price": 500.0 },
                { "description": "Pharmacy", "price": 250.0 }
            ]
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 201);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["total"], 1750.0);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["items"].as_array().unwrap().len(), 3);

    app.cleanup().await;
}

#[tokio::test]
async fn create_invoice_requires_line_items() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/invoices", app.address))
        .json(&json!({
            "patient_id": Uuid::new_v4(),
            "items": []
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn get_invoice_returns_not_found_for_unknown_id() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/invoices/{}", app.address, Uuid::new_v4()))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn patient_invoices_are_scoped_to_patient() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let patient_a = Uuid::new_v4();
    let patient_b = Uuid::new_v4();
    let invoice_a = app.create_invoice(&client, patient_a).await;
    app.create_invoice(&client, patient_b).await;

    let response = client
        .get(format!("{}/invoices/patient/{}", app.address, patient_a))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    let invoices = body["invoices"].as_array().expect("invoices array");
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["id"], invoice_a.to_string());

    app.cleanup().await;
}
