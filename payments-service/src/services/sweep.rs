//! Background reconciliation sweep.
//!
//! Gateway callbacks are delivered at-least-once in the happy case, but can
//! be lost entirely (network, deploys, a dead callback URL). Payments then
//! sit in "pending" forever. The sweep drives every initiated transaction to
//! a terminal state: it asks the gateway for the outcome of stale pending
//! payments and re-applies the invoice side of completed payments whose
//! dual write was interrupted.

use crate::config::SweepConfig;
use crate::services::daraja::DarajaClient;
use crate::services::metrics::record_reconciliation;
use crate::services::reconcile::{ReconcileOutcome, Reconciler};
use crate::services::repository::{CompletedPayment, PaymentRepository};
use anyhow::Result;
use mongodb::bson::DateTime;
use std::time::Duration;

pub struct ReconciliationSweep {
    repository: PaymentRepository,
    daraja: DarajaClient,
    reconciler: Reconciler,
    config: SweepConfig,
}

impl ReconciliationSweep {
    pub fn new(
        repository: PaymentRepository,
        daraja: DarajaClient,
        reconciler: Reconciler,
        config: SweepConfig,
    ) -> Self {
        Self {
            repository,
            daraja,
            reconciler,
            config,
        }
    }

    /// Run the sweep on its configured interval until the process stops.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::warn!(error = %e, "Reconciliation sweep failed");
                }
            }
        })
    }

    /// One full pass: resolve stale pending payments, then repair invoices.
    pub async fn run_once(&self) -> Result<()> {
        self.resolve_stale_pending().await?;
        self.repair_unpaid_invoices().await?;
        Ok(())
    }

    async fn resolve_stale_pending(&self) -> Result<()> {
        let cutoff = seconds_ago(self.config.pending_age_seconds);
        let stale = self.repository.find_stale_pending(cutoff).await?;

        if stale.is_empty() {
            return Ok(());
        }
        tracing::info!(count = stale.len(), "Querying gateway for stale pending payments");

        for payment in stale {
            let (Some(merchant_request_id), Some(checkout_request_id)) = (
                payment.merchant_request_id.clone(),
                payment.checkout_request_id.clone(),
            ) else {
                continue;
            };

            let query = match self.daraja.stk_query(&checkout_request_id).await {
                Ok(query) => query,
                // Still in flight or gateway unreachable; the next pass
                // picks this payment up again.
                Err(e) => {
                    tracing::debug!(
                        payment_id = %payment.id,
                        error = %e,
                        "STK query inconclusive, leaving payment pending"
                    );
                    continue;
                }
            };

            let outcome = if query.result_code == "0" {
                let completion = CompletedPayment {
                    receipt_number: None,
                    phone: None,
                    transaction_date: DateTime::now(),
                    description: query.result_desc.clone(),
                };
                self.reconciler
                    .apply_success(&merchant_request_id, &checkout_request_id, completion, None)
                    .await?
            } else {
                self.reconciler
                    .apply_failure(&merchant_request_id, &checkout_request_id, &query.result_desc)
                    .await?
            };

            if outcome == ReconcileOutcome::Applied {
                let result = if query.result_code == "0" {
                    "completed"
                } else {
                    "failed"
                };
                record_reconciliation(result, "sweep");
                tracing::info!(
                    payment_id = %payment.id,
                    result_code = %query.result_code,
                    result,
                    "Stale pending payment resolved via status query"
                );
            }
        }

        Ok(())
    }

    /// Settle invoices left pending by an interrupted payment/invoice dual
    /// write.
    async fn repair_unpaid_invoices(&self) -> Result<()> {
        let since = seconds_ago(self.config.repair_lookback_seconds);
        let completed = self.repository.find_completed_since(since).await?;

        for payment in completed {
            let repaired = self
                .repository
                .mark_invoice_paid_if_pending(payment.invoice_id)
                .await?;
            if repaired {
                tracing::warn!(
                    payment_id = %payment.id,
                    invoice_id = %payment.invoice_id,
                    "Repaired invoice left unpaid by interrupted reconciliation"
                );
            }
        }

        Ok(())
    }
}

fn seconds_ago(seconds: i64) -> DateTime {
    DateTime::from_millis(DateTime::now().timestamp_millis() - seconds * 1000)
}
