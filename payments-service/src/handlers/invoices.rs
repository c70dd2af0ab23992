//! Invoice handlers.
//!
//! Billing staff create invoices here; settlement happens exclusively
//! through payment reconciliation, so there is no endpoint that sets an
//! invoice to "paid" directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{InvoiceResponse, ListInvoicesResponse},
    models::{Invoice, LineItem},
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    #[validate(length(min = 1, message = "At least one line item is required"), nested)]
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct LineItemRequest {
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    #[validate(range(min = 0.0, message = "Price must not be negative"))]
    pub price: f64,
}

/// Create an invoice. The total is always computed server-side from the
/// line items.
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    payload.validate()?;

    let items: Vec<LineItem> = payload
        .items
        .into_iter()
        .map(|item| LineItem {
            description: item.description,
            price: item.price,
        })
        .collect();

    let invoice = Invoice::new(payload.patient_id, payload.appointment_id, items);

    tracing::info!(
        invoice_id = %invoice.id,
        patient_id = %invoice.patient_id,
        total = invoice.total,
        "Creating invoice"
    );

    state.repository.create_invoice(invoice.clone()).await?;

    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(invoice))))
}

/// Get an invoice by ID.
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .repository
        .find_invoice(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(InvoiceResponse::from(invoice)))
}

/// List a patient's invoices, newest first.
pub async fn patient_invoices(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ListInvoicesResponse>, AppError> {
    let invoices = state
        .repository
        .list_invoices_for_patient(patient_id)
        .await?;

    Ok(Json(ListInvoicesResponse {
        invoices: invoices.into_iter().map(InvoiceResponse::from).collect(),
    }))
}
