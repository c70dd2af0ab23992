use payments_service::config::{
    Config, DatabaseConfig, MpesaConfig, MpesaEnvironment, ServerConfig, SweepConfig,
};
use payments_service::startup::Application;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_MERCHANT_REQUEST_ID: &str = "29115-34620561-1";
pub const TEST_CHECKOUT_REQUEST_ID: &str = "ws_CO_191220191020363925";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: mongodb::Database,
    pub db_name: String,
    pub config: Config,
    pub mpesa_server: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let mpesa_server = MockServer::start().await;
        let db_name = format!("payments_test_{}", uuid::Uuid::new_v4());

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(
                    std::env::var("TEST_MONGODB_URI")
                        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                ),
                db_name: db_name.clone(),
            },
            mpesa: MpesaConfig {
                consumer_key: "test_consumer_key".to_string(),
                consumer_secret: Secret::new("test_consumer_secret".to_string()),
                shortcode: "174379".to_string(),
                passkey: Secret::new("test_passkey".to_string()),
                environment: MpesaEnvironment::Sandbox,
                callback_url: "https://example.com/payments/mpesa/callback".to_string(),
                api_base_url: mpesa_server.uri(),
            },
            sweep: SweepConfig {
                enabled: false,
                interval_seconds: 300,
                pending_age_seconds: 0,
                repair_lookback_seconds: 3600,
            },
            otlp_endpoint: None,
            service_name: "payments-service-test".to_string(),
        };

        let app = Application::build(config.clone())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db,
            db_name,
            config,
            mpesa_server,
        }
    }

    /// Mount gateway mocks for a token grant followed by an accepted STK
    /// push carrying the canonical test correlation ids.
    pub async fn mock_gateway_accepts(&self) {
        self.mock_token().await;
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpush/v1/processrequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MerchantRequestID": TEST_MERCHANT_REQUEST_ID,
                "CheckoutRequestID": TEST_CHECKOUT_REQUEST_ID,
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing"
            })))
            .mount(&self.mpesa_server)
            .await;
    }

    /// Mount gateway mocks for a token grant followed by a rejected STK push.
    pub async fn mock_gateway_rejects(&self) {
        self.mock_token().await;
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpush/v1/processrequest"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "requestId": "12345-67890-1",
                "errorCode": "500.001.1001",
                "errorMessage": "Unable to lock subscriber, a transaction is already in process"
            })))
            .mount(&self.mpesa_server)
            .await;
    }

    pub async fn mock_token(&self) {
        Mock::given(method("GET"))
            .and(path("/oauth/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "test_access_token",
                "expires_in": "3599"
            })))
            .mount(&self.mpesa_server)
            .await;
    }

    /// Mount an STK query mock reporting the given result.
    pub async fn mock_stk_query(&self, result_code: &str, result_desc: &str) {
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResponseCode": "0",
                "ResponseDescription": "The service request has been accepted successfully",
                "MerchantRequestID": TEST_MERCHANT_REQUEST_ID,
                "CheckoutRequestID": TEST_CHECKOUT_REQUEST_ID,
                "ResultCode": result_code,
                "ResultDesc": result_desc
            })))
            .mount(&self.mpesa_server)
            .await;
    }

    /// Mount an STK query mock that answers the way the gateway does while
    /// a transaction is still in flight.
    pub async fn mock_stk_query_in_flight(&self) {
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "requestId": "12345-67890-1",
                "errorCode": "500.001.1001",
                "errorMessage": "The transaction is being processed"
            })))
            .mount(&self.mpesa_server)
            .await;
    }

    /// Create an invoice through the API and return its id.
    pub async fn create_invoice(&self, client: &reqwest::Client, patient_id: uuid::Uuid) -> uuid::Uuid {
        let response = client
            .post(format!("{}/invoices", self.address))
            .json(&json!({
                "patient_id": patient_id,
                "items": [
                    { "description": "Consultation", "price": 1000.0 },
                    { "description": "Lab work", "price": 500.0 }
                ]
            }))
            .send()
            .await
            .expect("Failed to create invoice");
        assert_eq!(response.status(), 201);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        body["id"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .expect("Invoice id missing")
    }

    /// Initiate a payment through the API against a gateway that accepts,
    /// returning the initiate response body.
    pub async fn initiate_payment(
        &self,
        client: &reqwest::Client,
        invoice_id: uuid::Uuid,
        patient_id: uuid::Uuid,
    ) -> serde_json::Value {
        let response = client
            .post(format!("{}/payments/mpesa/initiate", self.address))
            .json(&json!({
                "invoice_id": invoice_id,
                "patient_id": patient_id,
                "phone": "254712345678",
                "amount": 1500.0
            }))
            .send()
            .await
            .expect("Failed to initiate payment");
        assert_eq!(response.status(), 200);

        response.json().await.expect("Failed to parse JSON")
    }

    /// Cleanup test database after test completes.
    pub async fn cleanup(&self) {
        self.db
            .drop(None)
            .await
            .expect("Failed to drop test database");
    }
}

/// A successful STK callback payload in the gateway's envelope shape.
pub fn success_callback(
    merchant_request_id: &str,
    checkout_request_id: &str,
    receipt: &str,
) -> serde_json::Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": merchant_request_id,
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": 1500.0 },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "TransactionDate", "Value": 20191219102115u64 },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
}

/// A failed STK callback payload (no metadata on failures).
pub fn failed_callback(
    merchant_request_id: &str,
    checkout_request_id: &str,
    result_code: i64,
    result_desc: &str,
) -> serde_json::Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": merchant_request_id,
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": result_code,
                "ResultDesc": result_desc
            }
        }
    })
}
