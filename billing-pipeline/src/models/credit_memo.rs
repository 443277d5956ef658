//! Credit memo model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reason a credit memo was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    Adjustment,
    Refund,
    Promotion,
    ServiceFailure,
    Other,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::Adjustment => "adjustment",
            CreditReason::Refund => "refund",
            CreditReason::Promotion => "promotion",
            CreditReason::ServiceFailure => "service_failure",
            CreditReason::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "adjustment" => CreditReason::Adjustment,
            "refund" => CreditReason::Refund,
            "promotion" => CreditReason::Promotion,
            "service_failure" => CreditReason::ServiceFailure,
            _ => CreditReason::Other,
        }
    }
}

/// Credit memo issued by the payment sync engine for disputes and refunds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditMemo {
    pub memo_id: Uuid,
    pub organization_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

/// Input for issuing a credit memo.
#[derive(Debug, Clone)]
pub struct CreateCreditMemo {
    pub invoice_id: Option<Uuid>,
    pub amount_cents: i64,
    pub currency: String,
    pub reason: CreditReason,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}
