//! Usage aggregate model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::UsageSource;

/// Target resolution of an aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateResolution {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl AggregateResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateResolution::Hourly => "HOURLY",
            AggregateResolution::Daily => "DAILY",
            AggregateResolution::Weekly => "WEEKLY",
            AggregateResolution::Monthly => "MONTHLY",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "HOURLY" => AggregateResolution::Hourly,
            "WEEKLY" => AggregateResolution::Weekly,
            "MONTHLY" => AggregateResolution::Monthly,
            _ => AggregateResolution::Daily,
        }
    }
}

/// Period-bucketed usage total, keyed by (organization, subscription,
/// feature key, resolution, period start, period end). Re-aggregating the
/// same window replaces the prior total for the key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageAggregate {
    pub aggregate_id: Uuid,
    pub organization_id: Uuid,
    pub subscription_id: Uuid,
    pub feature_key: String,
    pub resolution: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit: String,
    pub source: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for the full-replace aggregate upsert.
#[derive(Debug, Clone)]
pub struct UpsertAggregate {
    pub subscription_id: Uuid,
    pub feature_key: String,
    pub resolution: AggregateResolution,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit: String,
    pub source: UsageSource,
}
