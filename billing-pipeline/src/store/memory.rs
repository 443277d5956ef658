//! In-memory store backend.
//!
//! Backs the integration tests with the same [`Store`] contract as
//! Postgres, including fingerprint dedup and full-replace aggregate
//! upserts. Supports per-organization write-failure injection so partial
//! batch acceptance can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::error::AppError;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::models::{
    AggregateResolution, CreateCreditMemo, CreateInvoice, CreateInvoiceLine, CreditMemo,
    FeatureLimit, Invoice, InvoiceLine, InvoiceStateUpdate, NewUsageEvent, Subscription,
    UpsertAggregate, UsageAggregate, UsageEvent,
};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    events: Vec<UsageEvent>,
    aggregates: Vec<UsageAggregate>,
    subscriptions: Vec<Subscription>,
    limits: Vec<FeatureLimit>,
    invoices: Vec<Invoice>,
    lines: Vec<InvoiceLine>,
    memos: Vec<CreditMemo>,
    failing_organizations: HashSet<Uuid>,
}

/// In-memory [`Store`].
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every subsequent write for the organization to fail.
    pub fn fail_organization(&self, organization_id: Uuid) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .failing_organizations
            .insert(organization_id);
    }

    pub fn seed_subscription(&self, subscription: Subscription) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .subscriptions
            .push(subscription);
    }

    pub fn seed_feature_limit(&self, limit: FeatureLimit) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .limits
            .push(limit);
    }

    pub fn usage_events(&self) -> Vec<UsageEvent> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .events
            .clone()
    }

    pub fn aggregates(&self) -> Vec<UsageAggregate> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .aggregates
            .clone()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .invoices
            .clone()
    }

    pub fn credit_memos(&self) -> Vec<CreditMemo> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .memos
            .clone()
    }

    fn check_writable(inner: &Inner, organization_id: Uuid) -> Result<(), AppError> {
        if inner.failing_organizations.contains(&organization_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected write failure for organization {}",
                organization_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_usage_events(
        &self,
        ctx: &AuthContext,
        events: &[NewUsageEvent],
    ) -> Result<u64, AppError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        Self::check_writable(&inner, ctx.organization_id)?;

        let now = Utc::now();
        let mut inserted = 0u64;
        for event in events {
            if let Some(fp) = &event.fingerprint {
                let duplicate = inner.events.iter().any(|existing| {
                    existing.organization_id == ctx.organization_id
                        && existing.fingerprint.as_deref() == Some(fp.as_str())
                });
                if duplicate {
                    continue;
                }
            }
            inner.events.push(UsageEvent {
                event_id: Uuid::new_v4(),
                organization_id: ctx.organization_id,
                subscription_id: event.subscription_id,
                tenant_id: event.tenant_id,
                product_id: event.product_id,
                feature_key: event.feature_key.clone(),
                quantity: event.quantity,
                unit: event.unit.clone(),
                recorded_at: event.recorded_at,
                source: event.source.as_str().to_string(),
                metadata: event.metadata.clone(),
                fingerprint: event.fingerprint.clone(),
                created_utc: now,
            });
            inserted += 1;
        }

        Ok(inserted)
    }

    async fn usage_events_in_window(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        feature_keys: Option<&[String]>,
    ) -> Result<Vec<UsageEvent>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut events: Vec<UsageEvent> = inner
            .events
            .iter()
            .filter(|e| {
                e.organization_id == ctx.organization_id
                    && e.subscription_id == Some(subscription_id)
                    && e.recorded_at >= period_start
                    && e.recorded_at < period_end
                    && feature_keys
                        .map(|keys| keys.iter().any(|k| *k == e.feature_key))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.recorded_at);
        Ok(events)
    }

    async fn find_active_subscription(
        &self,
        ctx: &AuthContext,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .subscriptions
            .iter()
            .filter(|s| s.organization_id == ctx.organization_id && s.status == "active")
            .max_by_key(|s| s.created_utc)
            .cloned())
    }

    async fn get_subscription(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .subscriptions
            .iter()
            .find(|s| {
                s.organization_id == ctx.organization_id && s.subscription_id == subscription_id
            })
            .cloned())
    }

    async fn get_feature_limits(
        &self,
        _ctx: &AuthContext,
        package_id: Uuid,
    ) -> Result<Vec<FeatureLimit>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .limits
            .iter()
            .filter(|l| l.package_id == package_id)
            .cloned()
            .collect())
    }

    async fn upsert_aggregate(
        &self,
        ctx: &AuthContext,
        input: &UpsertAggregate,
    ) -> Result<UsageAggregate, AppError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        Self::check_writable(&inner, ctx.organization_id)?;

        let now = Utc::now();
        if let Some(existing) = inner.aggregates.iter_mut().find(|a| {
            a.organization_id == ctx.organization_id
                && a.subscription_id == input.subscription_id
                && a.feature_key == input.feature_key
                && a.resolution == input.resolution.as_str()
                && a.period_start == input.period_start
                && a.period_end == input.period_end
        }) {
            existing.quantity = input.quantity;
            existing.unit = input.unit.clone();
            existing.source = input.source.as_str().to_string();
            existing.updated_utc = now;
            return Ok(existing.clone());
        }

        let aggregate = UsageAggregate {
            aggregate_id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            subscription_id: input.subscription_id,
            feature_key: input.feature_key.clone(),
            resolution: input.resolution.as_str().to_string(),
            period_start: input.period_start,
            period_end: input.period_end,
            quantity: input.quantity,
            unit: input.unit.clone(),
            source: input.source.as_str().to_string(),
            created_utc: now,
            updated_utc: now,
        };
        inner.aggregates.push(aggregate.clone());
        Ok(aggregate)
    }

    async fn sum_aggregate_quantity(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
        feature_key: &str,
        resolution: AggregateResolution,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut matched = false;
        let mut total = Decimal::ZERO;
        for aggregate in inner.aggregates.iter().filter(|a| {
            a.organization_id == ctx.organization_id
                && a.subscription_id == subscription_id
                && a.feature_key == feature_key
                && a.resolution == resolution.as_str()
                && a.period_start >= period_start
                && a.period_end <= period_end
        }) {
            matched = true;
            total += aggregate.quantity;
        }
        Ok(matched.then_some(total))
    }

    async fn create_invoice(
        &self,
        ctx: &AuthContext,
        input: &CreateInvoice,
    ) -> Result<Invoice, AppError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        Self::check_writable(&inner, ctx.organization_id)?;

        if inner
            .invoices
            .iter()
            .any(|i| i.organization_id == ctx.organization_id && i.number == input.number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Duplicate invoice number"
            )));
        }

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            subscription_id: input.subscription_id,
            number: input.number.clone(),
            status: input.status.as_str().to_string(),
            currency: input.currency.clone(),
            subtotal_cents: input.subtotal_cents,
            tax_cents: input.tax_cents,
            total_cents: input.total_cents,
            balance_cents: input.balance_cents,
            period_start: input.period_start,
            period_end: input.period_end,
            issued_at: input.issued_at,
            due_at: input.due_at,
            paid_at: None,
            voided_at: None,
            metadata: input.metadata.clone(),
            created_utc: now,
            updated_utc: now,
        };
        inner.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn append_invoice_line(
        &self,
        ctx: &AuthContext,
        input: &CreateInvoiceLine,
    ) -> Result<InvoiceLine, AppError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        Self::check_writable(&inner, ctx.organization_id)?;

        let exists = inner.invoices.iter().any(|i| {
            i.organization_id == ctx.organization_id && i.invoice_id == input.invoice_id
        });
        if !exists {
            return Err(AppError::NotFound(anyhow::anyhow!("Invoice not found")));
        }

        let line = InvoiceLine {
            line_id: Uuid::new_v4(),
            invoice_id: input.invoice_id,
            line_type: input.line_type.as_str().to_string(),
            description: input.description.clone(),
            feature_key: input.feature_key.clone(),
            quantity: input.quantity,
            unit_amount_cents: input.unit_amount_cents,
            amount_cents: input.amount_cents,
            usage_period_start: input.usage_period_start,
            usage_period_end: input.usage_period_end,
            created_utc: Utc::now(),
        };
        inner.lines.push(line.clone());
        Ok(line)
    }

    async fn get_invoice(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner
            .invoices
            .iter()
            .find(|i| i.organization_id == ctx.organization_id && i.invoice_id == invoice_id)
            .cloned())
    }

    async fn list_invoice_lines(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLine>, AppError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let owned = inner
            .invoices
            .iter()
            .any(|i| i.organization_id == ctx.organization_id && i.invoice_id == invoice_id);
        if !owned {
            return Ok(Vec::new());
        }
        Ok(inner
            .lines
            .iter()
            .filter(|l| l.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn update_invoice_state(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
        update: &InvoiceStateUpdate,
    ) -> Result<Invoice, AppError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        Self::check_writable(&inner, ctx.organization_id)?;

        let invoice = inner
            .invoices
            .iter_mut()
            .find(|i| i.organization_id == ctx.organization_id && i.invoice_id == invoice_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

        if let Some(status) = update.status {
            invoice.status = status.as_str().to_string();
        }
        if let Some(balance) = update.balance_cents {
            invoice.balance_cents = balance;
        }
        if let Some(paid_at) = update.paid_at {
            invoice.paid_at = Some(paid_at);
        }
        if let Some(voided_at) = update.voided_at {
            invoice.voided_at = Some(voided_at);
        }
        invoice.updated_utc = Utc::now();

        Ok(invoice.clone())
    }

    async fn create_credit_memo(
        &self,
        ctx: &AuthContext,
        input: &CreateCreditMemo,
    ) -> Result<CreditMemo, AppError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        Self::check_writable(&inner, ctx.organization_id)?;

        let memo = CreditMemo {
            memo_id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            invoice_id: input.invoice_id,
            amount_cents: input.amount_cents,
            currency: input.currency.clone(),
            reason: input.reason.as_str().to_string(),
            expires_at: input.expires_at,
            metadata: input.metadata.clone(),
            created_utc: Utc::now(),
        };
        inner.memos.push(memo.clone());
        Ok(memo)
    }
}
