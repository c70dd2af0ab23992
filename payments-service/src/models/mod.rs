use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attempted M-Pesa transaction against an invoice.
///
/// The gateway correlation identifiers (`merchant_request_id`,
/// `checkout_request_id`) are set once when the STK push is acknowledged and
/// never change afterwards; they are the only key the callback carries.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub patient_id: Uuid,
    pub amount: f64,
    /// Payer MSISDN in 254XXXXXXXXX form. Overwritten with the number the
    /// gateway reports on a successful callback.
    pub phone: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<DateTime>,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    pub customer_message: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Payment {
    pub fn new_pending(invoice_id: Uuid, patient_id: Uuid, phone: String, amount: f64) -> Self {
        let now = DateTime::now();
        Self {
            id: Uuid::new_v4(),
            invoice_id,
            patient_id,
            amount,
            phone,
            method: PaymentMethod::Mpesa,
            status: PaymentStatus::Pending,
            merchant_request_id: None,
            checkout_request_id: None,
            mpesa_receipt_number: None,
            transaction_date: None,
            response_code: None,
            response_description: None,
            customer_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    // Declared for parity with the stored enum; nothing in the STK flow
    // produces it (a user rejecting on their handset arrives as a failure).
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mpesa,
    Cash,
    Card,
}

/// Billed services for a care episode.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Invoice {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub items: Vec<LineItem>,
    /// Always recomputed from `items` before persistence.
    pub total: f64,
    pub status: InvoiceStatus,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Invoice {
    pub fn new(patient_id: Uuid, appointment_id: Option<Uuid>, items: Vec<LineItem>) -> Self {
        let now = DateTime::now();
        let total = Self::compute_total(&items);
        Self {
            id: Uuid::new_v4(),
            patient_id,
            appointment_id,
            items,
            total,
            status: InvoiceStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn compute_total(items: &[LineItem]) -> f64 {
        items.iter().map(|item| item.price).sum()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LineItem {
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Canceled,
}
