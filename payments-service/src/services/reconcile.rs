//! Reconciliation of gateway results onto payment and invoice records.
//!
//! Both delivery paths — the asynchronous callback and the sweep's status
//! query — funnel through here so the idempotency rule lives in one place:
//! a payment's terminal state is written at most once, enforced by the
//! repository's update-if-pending filters rather than a read-then-write.

use crate::models::PaymentStatus;
use crate::services::daraja::StkCallback;
use crate::services::repository::{CompletedPayment, PaymentRepository};
use anyhow::Result;
use chrono::NaiveDateTime;
use mongodb::bson::DateTime;

/// What applying a gateway result did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The payment transitioned to a terminal state.
    Applied,
    /// The payment was already terminal; nothing was overwritten.
    AlreadyTerminal,
    /// No payment matches the correlation ids; the result was discarded.
    NoMatch,
}

#[derive(Clone)]
pub struct Reconciler {
    repository: PaymentRepository,
}

impl Reconciler {
    pub fn new(repository: PaymentRepository) -> Self {
        Self { repository }
    }

    /// Apply an STK callback to the matching payment.
    pub async fn apply_callback(&self, callback: &StkCallback) -> Result<ReconcileOutcome> {
        if callback.result_code == 0 {
            let metadata = callback.callback_metadata.as_ref();
            let completion = CompletedPayment {
                receipt_number: metadata.and_then(|m| m.receipt_number()),
                phone: metadata.and_then(|m| m.phone_number()),
                transaction_date: parse_transaction_date(
                    metadata.and_then(|m| m.transaction_date()),
                ),
                description: callback.result_desc.clone(),
            };
            self.apply_success(
                &callback.merchant_request_id,
                &callback.checkout_request_id,
                completion,
                metadata.and_then(|m| m.amount()),
            )
            .await
        } else {
            self.apply_failure(
                &callback.merchant_request_id,
                &callback.checkout_request_id,
                &callback.result_desc,
            )
            .await
        }
    }

    /// Apply a successful gateway result: complete the payment, then settle
    /// the invoice. The two writes are not atomic; the invoice side is
    /// conditional (pending → paid) and re-applied by the sweep's repair
    /// pass if this call dies in between.
    pub async fn apply_success(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        completion: CompletedPayment,
        reported_amount: Option<f64>,
    ) -> Result<ReconcileOutcome> {
        let Some(payment) = self
            .repository
            .find_payment_by_correlation_ids(merchant_request_id, checkout_request_id)
            .await?
        else {
            tracing::warn!(
                merchant_request_id,
                checkout_request_id,
                "Gateway result matches no payment, discarding"
            );
            return Ok(ReconcileOutcome::NoMatch);
        };

        if let Some(amount) = reported_amount {
            if (amount - payment.amount).abs() > f64::EPSILON {
                tracing::warn!(
                    payment_id = %payment.id,
                    requested = payment.amount,
                    reported = amount,
                    "Gateway-reported amount differs from requested amount"
                );
            }
        }

        let completed = self
            .repository
            .complete_payment_if_pending(merchant_request_id, checkout_request_id, &completion)
            .await?;

        if !completed {
            tracing::info!(
                payment_id = %payment.id,
                status = ?payment.status,
                "Payment already terminal, ignoring duplicate result"
            );
            // Repair the invoice side of an interrupted earlier apply; a
            // settled invoice is left untouched by the pending-only filter.
            if payment.status == PaymentStatus::Completed {
                self.repository
                    .mark_invoice_paid_if_pending(payment.invoice_id)
                    .await?;
            }
            return Ok(ReconcileOutcome::AlreadyTerminal);
        }

        let invoice_settled = self
            .repository
            .mark_invoice_paid_if_pending(payment.invoice_id)
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            invoice_id = %payment.invoice_id,
            invoice_settled,
            receipt = ?completion.receipt_number,
            "Payment completed"
        );

        Ok(ReconcileOutcome::Applied)
    }

    /// Apply a failed gateway result. The invoice stays payable.
    pub async fn apply_failure(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        description: &str,
    ) -> Result<ReconcileOutcome> {
        let Some(payment) = self
            .repository
            .find_payment_by_correlation_ids(merchant_request_id, checkout_request_id)
            .await?
        else {
            tracing::warn!(
                merchant_request_id,
                checkout_request_id,
                "Gateway result matches no payment, discarding"
            );
            return Ok(ReconcileOutcome::NoMatch);
        };

        let failed = self
            .repository
            .fail_payment_if_pending(merchant_request_id, checkout_request_id, description)
            .await?;

        if !failed {
            tracing::info!(
                payment_id = %payment.id,
                status = ?payment.status,
                "Payment already terminal, ignoring duplicate result"
            );
            return Ok(ReconcileOutcome::AlreadyTerminal);
        }

        tracing::info!(payment_id = %payment.id, description, "Payment failed");
        Ok(ReconcileOutcome::Applied)
    }
}

/// Convert Daraja's numeric YYYYMMDDHHmmss transaction date to a stored
/// timestamp. The gateway reports handset-local time; an unparseable or
/// absent value falls back to the processing time.
fn parse_transaction_date(raw: Option<u64>) -> DateTime {
    raw.and_then(|value| {
        NaiveDateTime::parse_from_str(&value.to_string(), "%Y%m%d%H%M%S").ok()
    })
    .map(|naive| DateTime::from_millis(naive.and_utc().timestamp_millis()))
    .unwrap_or_else(DateTime::now)
}
