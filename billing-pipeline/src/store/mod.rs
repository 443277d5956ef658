//! Typed persistence operations for the pipeline entities.
//!
//! Every operation takes an explicit [`AuthContext`] and is scoped to that
//! context's organization. The production backend is Postgres; the
//! in-memory backend drives the integration tests.

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::error::AppError;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::models::{
    AggregateResolution, CreateCreditMemo, CreateInvoice, CreateInvoiceLine, CreditMemo,
    FeatureLimit, Invoice, InvoiceLine, InvoiceStateUpdate, NewUsageEvent, Subscription,
    UpsertAggregate, UsageAggregate, UsageEvent,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Bulk-insert usage events for one organization. Events whose
    /// fingerprint already exists for the organization are skipped.
    /// Returns the number of rows actually written.
    async fn insert_usage_events(
        &self,
        ctx: &AuthContext,
        events: &[NewUsageEvent],
    ) -> Result<u64, AppError>;

    /// Usage events for a subscription within the half-open window
    /// `[period_start, period_end)`, optionally filtered by feature key.
    async fn usage_events_in_window(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        feature_keys: Option<&[String]>,
    ) -> Result<Vec<UsageEvent>, AppError>;

    /// The organization's single active subscription, if any.
    async fn find_active_subscription(
        &self,
        ctx: &AuthContext,
    ) -> Result<Option<Subscription>, AppError>;

    async fn get_subscription(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;

    async fn get_feature_limits(
        &self,
        ctx: &AuthContext,
        package_id: Uuid,
    ) -> Result<Vec<FeatureLimit>, AppError>;

    /// Atomic full-replace upsert keyed on (organization, subscription,
    /// feature key, resolution, period start, period end).
    async fn upsert_aggregate(
        &self,
        ctx: &AuthContext,
        input: &UpsertAggregate,
    ) -> Result<UsageAggregate, AppError>;

    /// Sum of aggregate quantities for a feature key and resolution whose
    /// windows fall within `[period_start, period_end]`. `None` when no
    /// aggregate matches.
    async fn sum_aggregate_quantity(
        &self,
        ctx: &AuthContext,
        subscription_id: Uuid,
        feature_key: &str,
        resolution: AggregateResolution,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Decimal>, AppError>;

    async fn create_invoice(
        &self,
        ctx: &AuthContext,
        input: &CreateInvoice,
    ) -> Result<Invoice, AppError>;

    async fn append_invoice_line(
        &self,
        ctx: &AuthContext,
        input: &CreateInvoiceLine,
    ) -> Result<InvoiceLine, AppError>;

    async fn get_invoice(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError>;

    async fn list_invoice_lines(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLine>, AppError>;

    async fn update_invoice_state(
        &self,
        ctx: &AuthContext,
        invoice_id: Uuid,
        update: &InvoiceStateUpdate,
    ) -> Result<Invoice, AppError>;

    async fn create_credit_memo(
        &self,
        ctx: &AuthContext,
        input: &CreateCreditMemo,
    ) -> Result<CreditMemo, AppError>;
}
