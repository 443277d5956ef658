//! Usage event model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Origin of a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    Portal,
    #[serde(rename = "product-app")]
    ProductApp,
    Admin,
    Worker,
    Api,
}

impl UsageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageSource::Portal => "portal",
            UsageSource::ProductApp => "product-app",
            UsageSource::Admin => "admin",
            UsageSource::Worker => "worker",
            UsageSource::Api => "api",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "portal" => UsageSource::Portal,
            "product-app" => UsageSource::ProductApp,
            "admin" => UsageSource::Admin,
            "worker" => UsageSource::Worker,
            _ => UsageSource::Api,
        }
    }
}

/// A single metered usage reading. Immutable once written; retained for
/// audit and replay.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub feature_key: String,
    pub quantity: Decimal,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    pub source: String,
    pub metadata: Option<serde_json::Value>,
    pub fingerprint: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for writing a usage event.
#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub subscription_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub feature_key: String,
    pub quantity: Decimal,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    pub source: UsageSource,
    pub metadata: Option<serde_json::Value>,
    pub fingerprint: Option<String>,
}
