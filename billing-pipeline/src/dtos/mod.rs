//! Job payload shapes and responses.
//!
//! Payloads are validated at the boundary; malformed jobs are rejected
//! before any persistence happens.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{AggregateResolution, CreditReason, InvoiceStatus, LineType, UsageSource};

fn validate_quantity(quantity: &Decimal) -> Result<(), ValidationError> {
    if quantity.is_sign_negative() {
        return Err(ValidationError::new("quantity_negative"));
    }
    Ok(())
}

// =========================================================================
// Usage event batch
// =========================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UsageEventInput {
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1))]
    pub feature_key: String,
    #[validate(custom(function = validate_quantity))]
    pub quantity: Decimal,
    #[validate(length(min = 1))]
    pub unit: String,
    pub recorded_at: Option<DateTime<Utc>>,
    pub source: Option<UsageSource>,
    pub metadata: Option<serde_json::Value>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordUsageBatchRequest {
    #[validate(nested)]
    pub events: Vec<UsageEventInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordUsageBatchResponse {
    pub accepted: usize,
}

// =========================================================================
// Aggregate job
// =========================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AggregateJobRequest {
    pub organization_id: Uuid,
    pub subscription_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub resolution: AggregateResolution,
    pub source: Option<UsageSource>,
    pub feature_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateJobResponse {
    pub aggregated: u64,
    pub duration_ms: f64,
}

// =========================================================================
// Invoice job
// =========================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UsageChargeInput {
    #[validate(length(min = 1))]
    pub feature_key: String,
    #[validate(range(min = 0))]
    pub unit_amount_cents: i64,
    #[validate(length(min = 1))]
    pub unit: String,
    pub minimum_amount_cents: Option<i64>,
    pub resolution: AggregateResolution,
    pub usage_period_start: Option<DateTime<Utc>>,
    pub usage_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExtraLineInput {
    pub line_type: LineType,
    pub description: Option<String>,
    pub feature_key: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub usage_period_start: Option<DateTime<Utc>>,
    pub usage_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettleInput {
    pub amount_cents: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvoiceJobRequest {
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub invoice_number: Option<String>,
    pub currency: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub recurring_amount_cents: Option<i64>,
    pub status: Option<InvoiceStatus>,
    pub issue_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub tax_rate_bps: Option<i64>,
    pub tax_cents: Option<i64>,
    #[serde(default)]
    #[validate(nested)]
    pub usage_charges: Vec<UsageChargeInput>,
    #[serde(default)]
    #[validate(nested)]
    pub extra_lines: Vec<ExtraLineInput>,
    pub settle: Option<SettleInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceJobResponse {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub line_count: usize,
    pub duration_ms: f64,
}

// =========================================================================
// Payment sync job
// =========================================================================

/// External payment lifecycle event applied to an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentSucceeded,
    PaymentFailed,
    PaymentDisputed,
    PaymentRefunded,
    SyncStatus,
}

/// Outcome of a payment sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    PaymentRecorded,
    StatusUpdated,
    CreditIssued,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditInput {
    pub amount_cents: Option<i64>,
    pub reason: Option<CreditReason>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PaymentSyncRequest {
    pub organization_id: Uuid,
    pub invoice_id: Uuid,
    pub event: PaymentEvent,
    pub amount_cents: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub status: Option<InvoiceStatus>,
    pub external_payment_id: Option<String>,
    pub note: Option<String>,
    pub credit: Option<CreditInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSyncResponse {
    pub invoice_id: Uuid,
    pub status: InvoiceStatus,
    pub action: SyncAction,
    pub duration_ms: f64,
}
