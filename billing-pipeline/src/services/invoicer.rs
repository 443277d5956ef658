//! Invoice builder: computes a complete invoice for a billing period.

use chrono::{DateTime, Utc};
use pipeline_core::error::AppError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::dtos::{InvoiceJobRequest, InvoiceJobResponse};
use crate::models::{
    CreateInvoice, CreateInvoiceLine, InvoiceStatus, LineType, Subscription,
};
use crate::services::metrics;
use crate::services::payment_sync::apply_payment;
use crate::store::Store;

const COMPONENT: &str = "invoice-builder";

/// One prepared line, held until the invoice row exists.
struct PreparedLine {
    line_type: LineType,
    description: Option<String>,
    feature_key: Option<String>,
    quantity: Decimal,
    unit_amount_cents: i64,
    amount_cents: i64,
    usage_period_start: Option<DateTime<Utc>>,
    usage_period_end: Option<DateTime<Utc>>,
}

/// Builds invoices from recurring, usage, adjustment and tax charges, and
/// optionally settles them immediately.
#[derive(Clone)]
pub struct InvoiceBuilder {
    store: Arc<dyn Store>,
}

impl InvoiceBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, job), fields(organization_id = %job.organization_id))]
    pub async fn build(&self, job: InvoiceJobRequest) -> Result<InvoiceJobResponse, AppError> {
        let started = Instant::now();

        if job.period_end <= job.period_start {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invoice period_end must be strictly after period_start"
            )));
        }

        let ctx = AuthContext::service(job.organization_id, COMPONENT);
        let subscription = self.resolve_subscription(&ctx, job.subscription_id).await?;
        let currency = job
            .currency
            .clone()
            .unwrap_or_else(|| subscription.currency.clone());

        let now = Utc::now();
        let mut lines: Vec<PreparedLine> = Vec::new();

        // 1. Recurring line.
        let recurring = job
            .recurring_amount_cents
            .unwrap_or(subscription.recurring_amount_cents);
        if recurring > 0 {
            lines.push(PreparedLine {
                line_type: LineType::Recurring,
                description: Some("Recurring charge".to_string()),
                feature_key: None,
                quantity: Decimal::ONE,
                unit_amount_cents: recurring,
                amount_cents: recurring,
                usage_period_start: Some(job.period_start),
                usage_period_end: Some(job.period_end),
            });
        }

        // 2. Usage lines, clamped to the per-charge minimum.
        for charge in &job.usage_charges {
            let window_start = charge.usage_period_start.unwrap_or(job.period_start);
            let window_end = charge.usage_period_end.unwrap_or(job.period_end);
            let quantity = self
                .store
                .sum_aggregate_quantity(
                    &ctx,
                    subscription.subscription_id,
                    &charge.feature_key,
                    charge.resolution,
                    window_start,
                    window_end,
                )
                .await?
                .unwrap_or(Decimal::ZERO);

            let billed = to_cents(quantity * Decimal::from(charge.unit_amount_cents))?;
            let amount = billed.max(charge.minimum_amount_cents.unwrap_or(0));
            // Zero-value lines with no minimum are noise, not charges.
            if amount == 0 && charge.minimum_amount_cents.is_none() {
                continue;
            }
            lines.push(PreparedLine {
                line_type: LineType::Usage,
                description: Some(format!("Usage: {}", charge.feature_key)),
                feature_key: Some(charge.feature_key.clone()),
                quantity,
                unit_amount_cents: charge.unit_amount_cents,
                amount_cents: amount,
                usage_period_start: Some(window_start),
                usage_period_end: Some(window_end),
            });
        }

        // 3. Caller-supplied extra lines, taken verbatim.
        for extra in &job.extra_lines {
            lines.push(PreparedLine {
                line_type: extra.line_type,
                description: extra.description.clone(),
                feature_key: extra.feature_key.clone(),
                quantity: extra.quantity.unwrap_or(Decimal::ONE),
                unit_amount_cents: extra.unit_amount_cents,
                amount_cents: extra.amount_cents,
                usage_period_start: extra.usage_period_start,
                usage_period_end: extra.usage_period_end,
            });
        }

        let subtotal_cents: i64 = lines.iter().map(|l| l.amount_cents).sum();

        // 5. Tax: explicit cents win over a basis-point rate.
        let tax_cents = match (job.tax_cents, job.tax_rate_bps) {
            (Some(cents), _) => cents,
            (None, Some(rate_bps)) => tax_from_rate(subtotal_cents, rate_bps)?,
            (None, None) => 0,
        };

        // 4. An invoice must never be created empty.
        if lines.is_empty() && tax_cents == 0 && job.settle.is_none() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "invoice job did not produce any billable lines"
            )));
        }

        let total_cents = subtotal_cents + tax_cents;
        let status = job.status.unwrap_or(InvoiceStatus::Open);
        let number = job
            .invoice_number
            .clone()
            .unwrap_or_else(|| generate_invoice_number(job.organization_id, job.issue_date.unwrap_or(now)));

        let invoice = self
            .store
            .create_invoice(
                &ctx,
                &CreateInvoice {
                    subscription_id: Some(subscription.subscription_id),
                    number,
                    status,
                    currency: currency.clone(),
                    subtotal_cents,
                    tax_cents,
                    total_cents,
                    balance_cents: total_cents,
                    period_start: job.period_start,
                    period_end: job.period_end,
                    issued_at: job.issue_date.or(Some(now)),
                    due_at: job.due_date,
                    metadata: None,
                },
            )
            .await?;

        let mut line_count = 0usize;
        for line in lines {
            self.store
                .append_invoice_line(
                    &ctx,
                    &CreateInvoiceLine {
                        invoice_id: invoice.invoice_id,
                        line_type: line.line_type,
                        description: line.description,
                        feature_key: line.feature_key,
                        quantity: line.quantity,
                        unit_amount_cents: line.unit_amount_cents,
                        amount_cents: line.amount_cents,
                        usage_period_start: line.usage_period_start,
                        usage_period_end: line.usage_period_end,
                    },
                )
                .await?;
            line_count += 1;
        }

        if tax_cents != 0 {
            self.store
                .append_invoice_line(
                    &ctx,
                    &CreateInvoiceLine {
                        invoice_id: invoice.invoice_id,
                        line_type: LineType::Tax,
                        description: Some("Tax".to_string()),
                        feature_key: None,
                        quantity: Decimal::ONE,
                        unit_amount_cents: tax_cents,
                        amount_cents: tax_cents,
                        usage_period_start: None,
                        usage_period_end: None,
                    },
                )
                .await?;
            line_count += 1;
        }

        // 7. Immediate settlement, per the payment_succeeded rule.
        let mut final_status = status;
        if let Some(settle) = &job.settle {
            let updated = apply_payment(
                self.store.as_ref(),
                &ctx,
                &invoice,
                settle.amount_cents.unwrap_or(total_cents),
                settle.paid_at.unwrap_or(now),
            )
            .await?;
            final_status = InvoiceStatus::from_string(&updated.status);
        }

        let organization_label = job.organization_id.to_string();
        metrics::record_invoice_created(&organization_label, final_status.as_str());
        metrics::record_invoice_amount(&organization_label, &currency, total_cents);

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_job_duration("invoice", started.elapsed().as_secs_f64());

        info!(
            invoice_id = %invoice.invoice_id,
            number = %invoice.number,
            status = final_status.as_str(),
            total_cents = total_cents,
            line_count = line_count,
            "Invoice built"
        );

        Ok(InvoiceJobResponse {
            invoice_id: invoice.invoice_id,
            status: final_status,
            subtotal_cents,
            tax_cents,
            total_cents,
            line_count,
            duration_ms,
        })
    }

    async fn resolve_subscription(
        &self,
        ctx: &AuthContext,
        subscription_id: Option<Uuid>,
    ) -> Result<Subscription, AppError> {
        match subscription_id {
            Some(id) => self
                .store
                .get_subscription(ctx, id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found"))),
            None => self
                .store
                .find_active_subscription(ctx)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!(
                        "No active subscription for organization"
                    ))
                }),
        }
    }
}

/// Round a decimal amount to integer cents, half away from zero.
fn to_cents(value: Decimal) -> Result<i64, AppError> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("amount overflows integer cents")))
}

fn tax_from_rate(subtotal_cents: i64, rate_bps: i64) -> Result<i64, AppError> {
    to_cents(Decimal::from(subtotal_cents) * Decimal::from(rate_bps) / Decimal::from(10_000))
}

/// `INV-<YYYYMMDD>-<6 char suffix>`, suffix derived from the organization id.
fn generate_invoice_number(organization_id: Uuid, on: DateTime<Utc>) -> String {
    let simple = organization_id.simple().to_string();
    format!(
        "INV-{}-{}",
        on.format("%Y%m%d"),
        simple[..6].to_uppercase()
    )
}
