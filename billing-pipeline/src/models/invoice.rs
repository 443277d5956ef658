//! Invoice and invoice line models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    Paid,
    Void,
    Uncollectible,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Open => "open",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
            InvoiceStatus::Uncollectible => "uncollectible",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "draft" => InvoiceStatus::Draft,
            "paid" => InvoiceStatus::Paid,
            "void" => InvoiceStatus::Void,
            "uncollectible" => InvoiceStatus::Uncollectible,
            _ => InvoiceStatus::Open,
        }
    }
}

/// Invoice line type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    Recurring,
    Usage,
    OneTime,
    Credit,
    Tax,
    Adjustment,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::Recurring => "recurring",
            LineType::Usage => "usage",
            LineType::OneTime => "one_time",
            LineType::Credit => "credit",
            LineType::Tax => "tax",
            LineType::Adjustment => "adjustment",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "recurring" => LineType::Recurring,
            "usage" => LineType::Usage,
            "one_time" => LineType::OneTime,
            "credit" => LineType::Credit,
            "tax" => LineType::Tax,
            _ => LineType::Adjustment,
        }
    }
}

/// Invoice. Created once by the invoice builder; only status, balance and
/// the payment timestamps are mutated afterwards, by the payment sync
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub number: String,
    pub status: String,
    pub currency: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub balance_cents: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Append-only invoice line.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLine {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub line_type: String,
    pub description: Option<String>,
    pub feature_key: Option<String>,
    pub quantity: Decimal,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub usage_period_start: Option<DateTime<Utc>>,
    pub usage_period_end: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub subscription_id: Option<Uuid>,
    pub number: String,
    pub status: InvoiceStatus,
    pub currency: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub balance_cents: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Input for appending a line to an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoiceLine {
    pub invoice_id: Uuid,
    pub line_type: LineType,
    pub description: Option<String>,
    pub feature_key: Option<String>,
    pub quantity: Decimal,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub usage_period_start: Option<DateTime<Utc>>,
    pub usage_period_end: Option<DateTime<Utc>>,
}

/// Mutable slice of invoice state the payment sync engine is allowed to
/// touch. Fields left `None` are preserved.
#[derive(Debug, Clone, Default)]
pub struct InvoiceStateUpdate {
    pub status: Option<InvoiceStatus>,
    pub balance_cents: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
}
