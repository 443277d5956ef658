//! Payment sync engine: applies external payment lifecycle events to
//! invoices.

use chrono::{DateTime, Utc};
use pipeline_core::error::AppError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::auth::AuthContext;
use crate::dtos::{PaymentEvent, PaymentSyncRequest, PaymentSyncResponse, SyncAction};
use crate::models::{
    CreateCreditMemo, CreditReason, Invoice, InvoiceStateUpdate, InvoiceStatus,
};
use crate::services::metrics;
use crate::store::Store;

const COMPONENT: &str = "payment-sync";

/// Record a payment against an invoice: the balance decreases, and the
/// invoice becomes `paid` when it reaches zero. Also used by the invoice
/// builder for immediate settlement.
pub(crate) async fn apply_payment(
    store: &dyn Store,
    ctx: &AuthContext,
    invoice: &Invoice,
    amount_cents: i64,
    paid_at: DateTime<Utc>,
) -> Result<Invoice, AppError> {
    let new_balance = (invoice.balance_cents - amount_cents).max(0);
    let mut update = InvoiceStateUpdate {
        balance_cents: Some(new_balance),
        ..Default::default()
    };
    if new_balance == 0 {
        update.status = Some(InvoiceStatus::Paid);
        update.paid_at = Some(paid_at);
    }
    store
        .update_invoice_state(ctx, invoice.invoice_id, &update)
        .await
}

/// Applies one of five external payment lifecycle events to an invoice,
/// producing a new status and, for disputes and refunds, a credit memo.
/// The engine does not deduplicate re-delivered provider events; the
/// caller's queue idempotency key owns that.
#[derive(Clone)]
pub struct PaymentSyncEngine {
    store: Arc<dyn Store>,
}

impl PaymentSyncEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, job), fields(organization_id = %job.organization_id, invoice_id = %job.invoice_id, event = ?job.event))]
    pub async fn apply(&self, job: PaymentSyncRequest) -> Result<PaymentSyncResponse, AppError> {
        let started = Instant::now();
        let ctx = AuthContext::service(job.organization_id, COMPONENT);

        let invoice = self
            .store
            .get_invoice(&ctx, job.invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        let now = Utc::now();
        let (updated, action) = match job.event {
            PaymentEvent::PaymentSucceeded => {
                let amount = job.amount_cents.unwrap_or(invoice.total_cents);
                let updated = apply_payment(
                    self.store.as_ref(),
                    &ctx,
                    &invoice,
                    amount,
                    job.paid_at.unwrap_or(now),
                )
                .await?;
                info!(
                    amount_cents = amount,
                    external_payment_id = job.external_payment_id.as_deref().unwrap_or(""),
                    balance_cents = updated.balance_cents,
                    "Payment recorded"
                );
                (updated, SyncAction::PaymentRecorded)
            }
            PaymentEvent::PaymentFailed => {
                let updated = self
                    .store
                    .update_invoice_state(
                        &ctx,
                        invoice.invoice_id,
                        &InvoiceStateUpdate {
                            status: Some(InvoiceStatus::Uncollectible),
                            ..Default::default()
                        },
                    )
                    .await?;
                (updated, SyncAction::StatusUpdated)
            }
            PaymentEvent::PaymentDisputed => {
                self.issue_credit(&ctx, &invoice, &job, CreditReason::ServiceFailure)
                    .await?;
                let updated = self
                    .store
                    .update_invoice_state(
                        &ctx,
                        invoice.invoice_id,
                        &InvoiceStateUpdate {
                            status: Some(InvoiceStatus::Uncollectible),
                            ..Default::default()
                        },
                    )
                    .await?;
                (updated, SyncAction::CreditIssued)
            }
            PaymentEvent::PaymentRefunded => {
                self.issue_credit(&ctx, &invoice, &job, CreditReason::Refund)
                    .await?;
                let updated = self
                    .store
                    .update_invoice_state(
                        &ctx,
                        invoice.invoice_id,
                        &InvoiceStateUpdate {
                            status: Some(InvoiceStatus::Void),
                            voided_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                (updated, SyncAction::CreditIssued)
            }
            PaymentEvent::SyncStatus => {
                // Pass-through correction from the external source of truth.
                let status = job
                    .status
                    .unwrap_or_else(|| InvoiceStatus::from_string(&invoice.status));
                let updated = self
                    .store
                    .update_invoice_state(
                        &ctx,
                        invoice.invoice_id,
                        &InvoiceStateUpdate {
                            status: Some(status),
                            ..Default::default()
                        },
                    )
                    .await?;
                (updated, SyncAction::StatusUpdated)
            }
        };

        let status = InvoiceStatus::from_string(&updated.status);
        metrics::record_payment_event(
            &job.organization_id.to_string(),
            event_label(job.event),
            action_label(action),
        );

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_job_duration("payment_sync", started.elapsed().as_secs_f64());

        Ok(PaymentSyncResponse {
            invoice_id: invoice.invoice_id,
            status,
            action,
            duration_ms,
        })
    }

    /// Credit amount resolution order: explicit credit amount, then the
    /// top-level amount, then the invoice's outstanding balance.
    async fn issue_credit(
        &self,
        ctx: &AuthContext,
        invoice: &Invoice,
        job: &PaymentSyncRequest,
        default_reason: CreditReason,
    ) -> Result<(), AppError> {
        let amount_cents = job
            .credit
            .as_ref()
            .and_then(|c| c.amount_cents)
            .or(job.amount_cents)
            .unwrap_or(invoice.balance_cents);
        let reason = job
            .credit
            .as_ref()
            .and_then(|c| c.reason)
            .unwrap_or(default_reason);

        self.store
            .create_credit_memo(
                ctx,
                &CreateCreditMemo {
                    invoice_id: Some(invoice.invoice_id),
                    amount_cents,
                    currency: invoice.currency.clone(),
                    reason,
                    expires_at: None,
                    metadata: job.credit.as_ref().and_then(|c| c.metadata.clone()),
                },
            )
            .await?;
        Ok(())
    }
}

fn event_label(event: PaymentEvent) -> &'static str {
    match event {
        PaymentEvent::PaymentSucceeded => "payment_succeeded",
        PaymentEvent::PaymentFailed => "payment_failed",
        PaymentEvent::PaymentDisputed => "payment_disputed",
        PaymentEvent::PaymentRefunded => "payment_refunded",
        PaymentEvent::SyncStatus => "sync_status",
    }
}

fn action_label(action: SyncAction) -> &'static str {
    match action {
        SyncAction::PaymentRecorded => "PAYMENT_RECORDED",
        SyncAction::StatusUpdated => "STATUS_UPDATED",
        SyncAction::CreditIssued => "CREDIT_ISSUED",
    }
}
