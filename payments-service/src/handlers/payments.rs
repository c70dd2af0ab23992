//! M-Pesa payment handlers.
//!
//! Implements STK push initiation, the gateway callback, and the payment
//! query/status endpoints. Role checks happen upstream; these handlers
//! trust the caller.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dtos::{
        InitiateMpesaResponse, ListPaymentsResponse, MpesaAck, PaymentResponse,
        PaymentStatusResponse,
    },
    models::{InvoiceStatus, Payment},
    services::daraja::StkCallbackEnvelope,
    services::metrics::{record_initiation, record_reconciliation},
    services::reconcile::ReconcileOutcome,
    AppState,
};

/// Request to initiate an STK push against an invoice.
#[derive(Debug, Deserialize, Validate)]
pub struct InitiateMpesaRequest {
    pub invoice_id: Uuid,
    pub patient_id: Uuid,
    /// Subscriber number, country-code prefixed: 254XXXXXXXXX.
    #[validate(custom(function = "validate_msisdn"))]
    pub phone: String,
    #[validate(range(min = 1.0, message = "Amount must be positive"))]
    pub amount: f64,
}

fn validate_msisdn(phone: &str) -> Result<(), ValidationError> {
    let well_formed =
        phone.len() == 12 && phone.starts_with("254") && phone.chars().all(|c| c.is_ascii_digit());
    if well_formed {
        Ok(())
    } else {
        let mut err = ValidationError::new("invalid_msisdn");
        err.message = Some("Phone number must be in format 254XXXXXXXXX".into());
        Err(err)
    }
}

/// Initiate an M-Pesa STK push for an invoice.
///
/// Validation runs before anything is persisted; a pending payment row is
/// then written BEFORE the gateway is called, so a crash mid-call still
/// leaves an auditable record. A gateway failure does not roll that row
/// back for the same reason.
pub async fn initiate_mpesa_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiateMpesaRequest>,
) -> Result<Json<InitiateMpesaResponse>, AppError> {
    payload.validate()?;

    let invoice = state
        .repository
        .find_invoice(payload.invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    match invoice.status {
        InvoiceStatus::Paid => {
            return Err(AppError::Conflict(anyhow::anyhow!("Invoice is already paid")))
        }
        InvoiceStatus::Canceled => {
            return Err(AppError::Conflict(anyhow::anyhow!("Invoice is canceled")))
        }
        InvoiceStatus::Pending => {}
    }

    if payload.amount > invoice.total {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Amount {} exceeds invoice total {}",
            payload.amount,
            invoice.total
        )));
    }

    tracing::info!(
        invoice_id = %payload.invoice_id,
        patient_id = %payload.patient_id,
        amount = payload.amount,
        "Initiating M-Pesa payment"
    );

    let mut payment = Payment::new_pending(
        payload.invoice_id,
        payload.patient_id,
        payload.phone.clone(),
        payload.amount,
    );
    state.repository.create_payment(payment.clone()).await?;

    let account_reference = format!("INV-{}", invoice.id);
    let transaction_desc = format!("Payment for invoice {}", invoice.id);

    let ack = match state
        .daraja
        .stk_push(
            &payload.phone,
            payload.amount.round() as u64,
            &account_reference,
            &transaction_desc,
        )
        .await
    {
        Ok(ack) => ack,
        Err(e) => {
            // The pending row stays: an initiation failure still needs an
            // audit trail to settle whether money moved.
            tracing::error!(payment_id = %payment.id, error = %e, "STK push failed");
            record_initiation("gateway_error");
            return Err(AppError::BadGateway(e.to_string()));
        }
    };

    state.repository.record_gateway_ack(payment.id, &ack).await?;

    if ack.response_code != "0" {
        tracing::error!(
            payment_id = %payment.id,
            response_code = %ack.response_code,
            "Gateway rejected STK push"
        );
        record_initiation("rejected");
        return Err(AppError::BadGateway(ack.response_description.clone()));
    }

    record_initiation("accepted");

    payment.merchant_request_id = Some(ack.merchant_request_id.clone());
    payment.checkout_request_id = Some(ack.checkout_request_id.clone());
    payment.response_code = Some(ack.response_code.clone());
    payment.response_description = Some(ack.response_description.clone());
    payment.customer_message = Some(ack.customer_message.clone());

    tracing::info!(
        payment_id = %payment.id,
        merchant_request_id = %ack.merchant_request_id,
        checkout_request_id = %ack.checkout_request_id,
        "M-Pesa payment initiated"
    );

    Ok(Json(InitiateMpesaResponse {
        message: "M-Pesa payment initiated successfully".to_string(),
        payment: PaymentResponse::from(payment),
        mpesa: MpesaAck::from(ack),
    }))
}

/// M-Pesa callback handler.
///
/// Always answers 200: a non-200 makes the gateway retry indefinitely,
/// multiplying deliveries. Processing errors are logged and swallowed; the
/// reconciliation sweep covers anything missed here.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    body: String,
) -> Json<serde_json::Value> {
    tracing::debug!(body = %body, "M-Pesa callback received");

    let envelope: StkCallbackEnvelope = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable M-Pesa callback, discarding");
            return Json(json!({ "message": "Callback processed successfully" }));
        }
    };

    let callback = envelope.body.stk_callback;
    match state.reconciler.apply_callback(&callback).await {
        Ok(ReconcileOutcome::Applied) => {
            let result = if callback.result_code == 0 {
                "completed"
            } else {
                "failed"
            };
            record_reconciliation(result, "callback");
        }
        Ok(ReconcileOutcome::AlreadyTerminal) | Ok(ReconcileOutcome::NoMatch) => {}
        Err(e) => {
            tracing::error!(
                merchant_request_id = %callback.merchant_request_id,
                checkout_request_id = %callback.checkout_request_id,
                error = %e,
                "Failed to process M-Pesa callback"
            );
        }
    }

    Json(json!({ "message": "Callback processed successfully" }))
}

/// Get a payment by ID.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state
        .repository
        .find_payment(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(PaymentResponse::from(payment)))
}

/// List a patient's payments, newest first.
pub async fn patient_payments(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ListPaymentsResponse>, AppError> {
    let payments = state
        .repository
        .list_payments_for_patient(patient_id)
        .await?;

    Ok(Json(ListPaymentsResponse {
        payments: payments.into_iter().map(PaymentResponse::from).collect(),
    }))
}

/// Poll the current state of a payment.
pub async fn check_payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let payment = state
        .repository
        .find_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment not found")))?;

    Ok(Json(PaymentStatusResponse::from(payment)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msisdn_must_be_country_code_prefixed() {
        assert!(validate_msisdn("254712345678").is_ok());
        assert!(validate_msisdn("0712345678").is_err());
        assert!(validate_msisdn("25471234567").is_err());
        assert!(validate_msisdn("2547123456789").is_err());
        assert!(validate_msisdn("25471234567a").is_err());
    }
}
