//! M-Pesa Daraja API client.
//!
//! Implements the OAuth token endpoint, the Lipa na M-Pesa Online (STK push)
//! endpoint, and the STK push status query, plus the callback payload types.
//! Field names follow the Daraja wire contract verbatim; they are not
//! negotiable.

use crate::config::MpesaConfig;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

/// Daraja client for initiating and querying STK push transactions.
#[derive(Clone)]
pub struct DarajaClient {
    client: Client,
    config: MpesaConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// STK push request body.
#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

/// Synchronous acknowledgment from the STK push endpoint.
///
/// `ResponseCode` "0" means the push was accepted for processing; the
/// outcome arrives later on the callback URL.
#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

/// Response from the STK push status query endpoint.
#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "ResultCode")]
    pub result_code: String,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// Daraja error body for rejected requests.
#[derive(Debug, Deserialize)]
pub struct DarajaErrorResponse {
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    #[serde(rename = "errorCode", default)]
    pub error_code: String,
    #[serde(rename = "errorMessage", default)]
    pub error_message: String,
}

/// Envelope the gateway posts to the callback URL.
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

/// Metadata list attached to successful callbacks. Items are keyed by
/// `Name`; the order is not part of the contract, so lookups iterate and
/// match by key.
#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

impl CallbackMetadata {
    fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }

    /// `MpesaReceiptNumber`, e.g. "NLJ7RT61SV".
    pub fn receipt_number(&self) -> Option<String> {
        self.value("MpesaReceiptNumber")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// `PhoneNumber` arrives as a JSON number (254708374149) but is handled
    /// as a string everywhere else.
    pub fn phone_number(&self) -> Option<String> {
        self.value("PhoneNumber").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn amount(&self) -> Option<f64> {
        self.value("Amount").and_then(|v| v.as_f64())
    }

    /// `TransactionDate` as a numeric YYYYMMDDHHmmss, e.g. 20191219102115.
    pub fn transaction_date(&self) -> Option<u64> {
        let v = self.value("TransactionDate")?;
        v.as_u64().or_else(|| v.as_str()?.parse().ok())
    }
}

impl DarajaClient {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Daraja credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.consumer_key.is_empty()
            && !self.config.consumer_secret.expose_secret().is_empty()
    }

    /// Fetch a short-lived access token using the long-lived consumer
    /// key/secret pair.
    async fn access_token(&self) -> Result<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.api_base_url
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(
                &self.config.consumer_key,
                Some(self.config.consumer_secret.expose_secret()),
            )
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Daraja token request failed");
            return Err(anyhow!("Failed to get M-Pesa access token"));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        Ok(token.access_token)
    }

    /// Lipa na M-Pesa Online password: base64(shortcode + passkey + timestamp).
    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{}",
            self.config.shortcode,
            self.config.passkey.expose_secret(),
            timestamp
        ))
    }

    /// Daraja timestamp: YYYYMMDDHHmmss.
    fn timestamp() -> String {
        chrono::Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    /// Initiate an STK push to `phone` for `amount` whole shillings.
    ///
    /// Returns the synchronous acknowledgment. The transaction outcome is
    /// delivered asynchronously to the configured callback URL.
    pub async fn stk_push(
        &self,
        phone: &str,
        amount: u64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        if !self.is_configured() {
            return Err(anyhow!("M-Pesa credentials not configured"));
        }

        let access_token = self.access_token().await?;
        let timestamp = Self::timestamp();

        let request = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount,
            party_a: phone.to_string(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone.to_string(),
            callback_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        let url = format!(
            "{}/mpesa/stkpush/v1/processrequest",
            self.config.api_base_url
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, body = %body, "Daraja STK push response");

        if status.is_success() {
            let ack: StkPushResponse = serde_json::from_str(&body)?;
            tracing::info!(
                merchant_request_id = %ack.merchant_request_id,
                checkout_request_id = %ack.checkout_request_id,
                response_code = %ack.response_code,
                "STK push accepted"
            );
            Ok(ack)
        } else {
            let error: DarajaErrorResponse =
                serde_json::from_str(&body).unwrap_or_else(|_| DarajaErrorResponse {
                    request_id: String::new(),
                    error_code: "UNKNOWN".to_string(),
                    error_message: body.clone(),
                });
            tracing::error!(
                error_code = %error.error_code,
                error_message = %error.error_message,
                "STK push rejected"
            );
            Err(anyhow!(
                "M-Pesa error: {} - {}",
                error.error_code,
                error.error_message
            ))
        }
    }

    /// Query the outcome of a previously initiated STK push.
    ///
    /// Used by the reconciliation sweep when the callback never arrived.
    /// While the transaction is still in flight the gateway answers with an
    /// error body; callers should leave the payment pending in that case.
    pub async fn stk_query(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        if !self.is_configured() {
            return Err(anyhow!("M-Pesa credentials not configured"));
        }

        let access_token = self.access_token().await?;
        let timestamp = Self::timestamp();

        let request = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        });

        let url = format!("{}/mpesa/stkpushquery/v1/query", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            let query: StkQueryResponse = serde_json::from_str(&body)?;
            Ok(query)
        } else {
            let error: DarajaErrorResponse =
                serde_json::from_str(&body).unwrap_or_else(|_| DarajaErrorResponse {
                    request_id: String::new(),
                    error_code: "UNKNOWN".to_string(),
                    error_message: body.clone(),
                });
            Err(anyhow!(
                "M-Pesa query error: {} - {}",
                error.error_code,
                error.error_message
            ))
        }
    }
}
