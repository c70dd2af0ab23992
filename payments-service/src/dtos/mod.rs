use serde::Serialize;
use uuid::Uuid;

use crate::models::{Invoice, InvoiceStatus, LineItem, Payment, PaymentMethod, PaymentStatus};
use crate::services::daraja::StkPushResponse;

/// Payment record as returned to API callers. Gateway correlation ids are
/// included for support/audit views; clients poll by the application id.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub patient_id: Uuid,
    pub amount: f64,
    pub phone: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    pub customer_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            invoice_id: p.invoice_id,
            patient_id: p.patient_id,
            amount: p.amount,
            phone: p.phone,
            method: p.method,
            status: p.status,
            merchant_request_id: p.merchant_request_id,
            checkout_request_id: p.checkout_request_id,
            mpesa_receipt_number: p.mpesa_receipt_number,
            transaction_date: p.transaction_date.map(|d| d.to_string()),
            response_code: p.response_code,
            response_description: p.response_description,
            customer_message: p.customer_message,
            created_at: p.created_at.to_string(),
            updated_at: p.updated_at.to_string(),
        }
    }
}

/// The gateway's synchronous STK push acknowledgment, surfaced to the
/// caller so the UI can show the "check your phone" message.
#[derive(Debug, Serialize)]
pub struct MpesaAck {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub response_code: String,
    pub response_description: String,
    pub customer_message: String,
}

impl From<StkPushResponse> for MpesaAck {
    fn from(ack: StkPushResponse) -> Self {
        Self {
            merchant_request_id: ack.merchant_request_id,
            checkout_request_id: ack.checkout_request_id,
            response_code: ack.response_code,
            response_description: ack.response_description,
            customer_message: ack.customer_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InitiateMpesaResponse {
    pub message: String,
    pub payment: PaymentResponse,
    pub mpesa: MpesaAck,
}

#[derive(Debug, Serialize)]
pub struct ListPaymentsResponse {
    pub payments: Vec<PaymentResponse>,
}

/// Minimal view for status polling. "pending" means "still waiting", not an
/// error; clients are expected to poll with backoff.
#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub mpesa_receipt_number: Option<String>,
    pub amount: f64,
    pub transaction_date: Option<String>,
}

impl From<Payment> for PaymentStatusResponse {
    fn from(p: Payment) -> Self {
        Self {
            payment_id: p.id,
            status: p.status,
            mpesa_receipt_number: p.mpesa_receipt_number,
            amount: p.amount,
            transaction_date: p.transaction_date.map(|d| d.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub items: Vec<LineItem>,
    pub total: f64,
    pub status: InvoiceStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Invoice> for InvoiceResponse {
    fn from(i: Invoice) -> Self {
        Self {
            id: i.id,
            patient_id: i.patient_id,
            appointment_id: i.appointment_id,
            items: i.items,
            total: i.total,
            status: i.status,
            created_at: i.created_at.to_string(),
            updated_at: i.updated_at.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListInvoicesResponse {
    pub invoices: Vec<InvoiceResponse>,
}
