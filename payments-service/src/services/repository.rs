use crate::models::{Invoice, InvoiceStatus, Payment, PaymentStatus};
use crate::services::daraja::StkPushResponse;
use anyhow::Result;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, DateTime};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use uuid::Uuid;

/// Fields applied to a payment when a successful gateway result is
/// reconciled. The receipt is absent when the outcome came from a status
/// query rather than a callback.
#[derive(Debug, Clone)]
pub struct CompletedPayment {
    pub receipt_number: Option<String>,
    pub phone: Option<String>,
    pub transaction_date: DateTime,
    pub description: String,
}

#[derive(Clone)]
pub struct PaymentRepository {
    payments: Collection<Payment>,
    invoices: Collection<Invoice>,
}

impl PaymentRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            payments: db.collection("payments"),
            invoices: db.collection("invoices"),
        }
    }

    /// Initialize database indexes.
    pub async fn init_indexes(&self) -> Result<()> {
        // The correlation-id pair is the only key a callback carries; unique
        // + sparse so pending rows without an ack stay out of the index.
        let correlation_index = IndexModel::builder()
            .keys(doc! { "merchant_request_id": 1, "checkout_request_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("correlation_ids_idx".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        let patient_payment_index = IndexModel::builder()
            .keys(doc! { "patient_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("patient_payment_idx".to_string())
                    .build(),
            )
            .build();

        // Serves the reconciliation sweep's stale-pending scan.
        let status_payment_index = IndexModel::builder()
            .keys(doc! { "status": 1, "created_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_payment_idx".to_string())
                    .build(),
            )
            .build();

        self.payments
            .create_indexes(
                [correlation_index, patient_payment_index, status_payment_index],
                None,
            )
            .await?;

        let patient_invoice_index = IndexModel::builder()
            .keys(doc! { "patient_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("patient_invoice_idx".to_string())
                    .build(),
            )
            .build();

        self.invoices
            .create_indexes([patient_invoice_index], None)
            .await?;

        tracing::info!("Payments service indexes initialized");
        Ok(())
    }

    pub async fn create_payment(&self, payment: Payment) -> Result<()> {
        self.payments.insert_one(payment, None).await?;
        Ok(())
    }

    pub async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let filter = doc! { "_id": id.to_string() };
        let payment = self.payments.find_one(filter, None).await?;
        Ok(payment)
    }

    pub async fn find_payment_by_correlation_ids(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> Result<Option<Payment>> {
        let filter = doc! {
            "merchant_request_id": merchant_request_id,
            "checkout_request_id": checkout_request_id,
        };
        let payment = self.payments.find_one(filter, None).await?;
        Ok(payment)
    }

    /// Attach the gateway's synchronous STK push acknowledgment to a payment.
    /// The correlation identifiers are written exactly once here.
    pub async fn record_gateway_ack(&self, id: Uuid, ack: &StkPushResponse) -> Result<()> {
        let filter = doc! { "_id": id.to_string() };
        let update = doc! {
            "$set": {
                "merchant_request_id": ack.merchant_request_id.as_str(),
                "checkout_request_id": ack.checkout_request_id.as_str(),
                "response_code": ack.response_code.as_str(),
                "response_description": ack.response_description.as_str(),
                "customer_message": ack.customer_message.as_str(),
                "updated_at": DateTime::now(),
            }
        };
        self.payments.update_one(filter, update, None).await?;
        Ok(())
    }

    /// Transition a payment to `completed`, but only if it is still pending.
    ///
    /// The status guard in the filter makes duplicate callbacks and the
    /// callback/sweep race a no-op: once terminal, a payment's state is never
    /// overwritten. Returns whether a pending payment was matched.
    pub async fn complete_payment_if_pending(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        completion: &CompletedPayment,
    ) -> Result<bool> {
        let filter = doc! {
            "merchant_request_id": merchant_request_id,
            "checkout_request_id": checkout_request_id,
            "status": to_bson(&PaymentStatus::Pending)?,
        };

        let mut set = doc! {
            "status": to_bson(&PaymentStatus::Completed)?,
            "transaction_date": completion.transaction_date,
            "response_description": completion.description.as_str(),
            "updated_at": DateTime::now(),
        };
        if let Some(ref receipt) = completion.receipt_number {
            set.insert("mpesa_receipt_number", receipt.as_str());
        }
        if let Some(ref phone) = completion.phone {
            set.insert("phone", phone.as_str());
        }

        let result = self
            .payments
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    /// Transition a payment to `failed`, but only if it is still pending.
    pub async fn fail_payment_if_pending(
        &self,
        merchant_request_id: &str,
        checkout_request_id: &str,
        description: &str,
    ) -> Result<bool> {
        let filter = doc! {
            "merchant_request_id": merchant_request_id,
            "checkout_request_id": checkout_request_id,
            "status": to_bson(&PaymentStatus::Pending)?,
        };
        let update = doc! {
            "$set": {
                "status": to_bson(&PaymentStatus::Failed)?,
                "response_description": description,
                "updated_at": DateTime::now(),
            }
        };
        let result = self.payments.update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
    }

    pub async fn list_payments_for_patient(&self, patient_id: Uuid) -> Result<Vec<Payment>> {
        let filter = doc! { "patient_id": patient_id.to_string() };
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self.payments.find(filter, Some(options)).await?;
        let payments: Vec<Payment> = cursor.try_collect().await?;
        Ok(payments)
    }

    /// Payments still pending with an acknowledged STK push older than
    /// `cutoff`. Rows without correlation ids cannot be queried at the
    /// gateway and are skipped.
    pub async fn find_stale_pending(&self, cutoff: DateTime) -> Result<Vec<Payment>> {
        let filter = doc! {
            "status": to_bson(&PaymentStatus::Pending)?,
            "checkout_request_id": { "$ne": Bson::Null },
            "created_at": { "$lt": cutoff },
        };
        let cursor = self.payments.find(filter, None).await?;
        let payments: Vec<Payment> = cursor.try_collect().await?;
        Ok(payments)
    }

    /// Payments completed since `since`, used to repair invoices missed by
    /// the non-atomic payment/invoice dual write.
    pub async fn find_completed_since(&self, since: DateTime) -> Result<Vec<Payment>> {
        let filter = doc! {
            "status": to_bson(&PaymentStatus::Completed)?,
            "updated_at": { "$gte": since },
        };
        let cursor = self.payments.find(filter, None).await?;
        let payments: Vec<Payment> = cursor.try_collect().await?;
        Ok(payments)
    }

    pub async fn create_invoice(&self, invoice: Invoice) -> Result<()> {
        self.invoices.insert_one(invoice, None).await?;
        Ok(())
    }

    pub async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>> {
        let filter = doc! { "_id": id.to_string() };
        let invoice = self.invoices.find_one(filter, None).await?;
        Ok(invoice)
    }

    /// Mark an invoice paid if it is still pending. Idempotent: re-applying
    /// a duplicate callback or the sweep's repair pass changes nothing once
    /// the invoice is settled.
    pub async fn mark_invoice_paid_if_pending(&self, id: Uuid) -> Result<bool> {
        let filter = doc! {
            "_id": id.to_string(),
            "status": to_bson(&InvoiceStatus::Pending)?,
        };
        let update = doc! {
            "$set": {
                "status": to_bson(&InvoiceStatus::Paid)?,
                "updated_at": DateTime::now(),
            }
        };
        let result = self.invoices.update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
    }

    pub async fn list_invoices_for_patient(&self, patient_id: Uuid) -> Result<Vec<Invoice>> {
        let filter = doc! { "patient_id": patient_id.to_string() };
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self.invoices.find(filter, Some(options)).await?;
        let invoices: Vec<Invoice> = cursor.try_collect().await?;
        Ok(invoices)
    }
}
