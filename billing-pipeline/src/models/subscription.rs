//! Subscription, package and feature limit models.
//!
//! Packages and their feature limits are read-only inputs to aggregation
//! warnings and invoice computation; this pipeline never mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Incomplete,
    IncompleteExpired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            "incomplete_expired" => SubscriptionStatus::IncompleteExpired,
            _ => SubscriptionStatus::Active,
        }
    }
}

/// Subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub organization_id: Uuid,
    pub package_id: Uuid,
    pub status: String,
    pub currency: String,
    pub recurring_amount_cents: i64,
    pub billing_interval: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Feature limit enforcement type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Hard,
    Soft,
    Unlimited,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Hard => "hard",
            LimitType::Soft => "soft",
            LimitType::Unlimited => "unlimited",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "hard" => LimitType::Hard,
            "soft" => LimitType::Soft,
            _ => LimitType::Unlimited,
        }
    }
}

/// Per-feature limit carried by a package.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeatureLimit {
    pub limit_id: Uuid,
    pub package_id: Uuid,
    pub feature_key: String,
    pub limit_type: String,
    pub limit_value: Option<rust_decimal::Decimal>,
    pub unit: String,
    pub usage_period: String,
}
