//! Aggregation integration tests: grouping, half-open windows and
//! full-replace reruns.

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

async fn record_event(
    app: &TestApp,
    organization_id: Uuid,
    subscription_id: Uuid,
    feature_key: &str,
    quantity: &str,
    unit: &str,
    recorded_at: chrono::DateTime<Utc>,
) {
    let response = app
        .post(
            "/jobs/usage-events",
            &json!({
                "events": [
                    {
                        "organization_id": organization_id,
                        "subscription_id": subscription_id,
                        "feature_key": feature_key,
                        "quantity": quantity,
                        "unit": unit,
                        "recorded_at": recorded_at
                    }
                ]
            }),
        )
        .await;
    assert!(response.status().is_success());
}

#[tokio::test]
async fn aggregates_are_grouped_by_feature_key_and_unit() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);
    let sub_id = subscription.subscription_id;

    let start = Utc::now() - Duration::days(1);
    let end = Utc::now() + Duration::days(1);
    let at = Utc::now();

    record_event(&app, organization_id, sub_id, "api_calls", "0.1", "count", at).await;
    record_event(&app, organization_id, sub_id, "api_calls", "0.2", "count", at).await;
    record_event(&app, organization_id, sub_id, "storage_gb", "5", "gb", at).await;

    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": sub_id,
                "period_start": start,
                "period_end": end,
                "resolution": "DAILY"
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["aggregated"], 2);

    let aggregates = app.store.aggregates();
    assert_eq!(aggregates.len(), 2);

    let api = aggregates
        .iter()
        .find(|a| a.feature_key == "api_calls")
        .expect("Missing api_calls aggregate");
    // 0.1 + 0.2 must be exactly 0.3.
    assert_eq!(api.quantity, Decimal::from_str("0.3").unwrap());
    assert_eq!(api.unit, "count");

    let storage = aggregates
        .iter()
        .find(|a| a.feature_key == "storage_gb")
        .expect("Missing storage_gb aggregate");
    assert_eq!(storage.quantity, Decimal::from(5));
}

#[tokio::test]
async fn window_is_half_open() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);
    let sub_id = subscription.subscription_id;

    let start = Utc::now() - Duration::hours(2);
    let end = Utc::now();

    // Exactly at the start: included. Exactly at the end: excluded.
    record_event(&app, organization_id, sub_id, "api_calls", "1", "count", start).await;
    record_event(&app, organization_id, sub_id, "api_calls", "100", "count", end).await;

    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": sub_id,
                "period_start": start,
                "period_end": end,
                "resolution": "HOURLY"
            }),
        )
        .await;

    assert!(response.status().is_success());
    let aggregates = app.store.aggregates();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].quantity, Decimal::ONE);
}

#[tokio::test]
async fn rerunning_a_window_replaces_totals_without_double_counting() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);
    let sub_id = subscription.subscription_id;

    let start = Utc::now() - Duration::days(1);
    let end = Utc::now() + Duration::days(1);

    record_event(&app, organization_id, sub_id, "api_calls", "3", "count", Utc::now()).await;

    let job = json!({
        "organization_id": organization_id,
        "subscription_id": sub_id,
        "period_start": start,
        "period_end": end,
        "resolution": "DAILY"
    });

    let first = app.post("/jobs/aggregate", &job).await;
    assert!(first.status().is_success());

    // A late event arrives, then the same window is re-aggregated.
    record_event(&app, organization_id, sub_id, "api_calls", "4", "count", Utc::now()).await;
    let second = app.post("/jobs/aggregate", &job).await;
    assert!(second.status().is_success());

    let aggregates = app.store.aggregates();
    assert_eq!(aggregates.len(), 1, "rerun must not create a second row");
    assert_eq!(aggregates[0].quantity, Decimal::from(7));
}

#[tokio::test]
async fn feature_keys_filter_restricts_the_rollup() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);
    let sub_id = subscription.subscription_id;

    let start = Utc::now() - Duration::days(1);
    let end = Utc::now() + Duration::days(1);
    let at = Utc::now();

    record_event(&app, organization_id, sub_id, "api_calls", "1", "count", at).await;
    record_event(&app, organization_id, sub_id, "storage_gb", "9", "gb", at).await;

    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": sub_id,
                "period_start": start,
                "period_end": end,
                "resolution": "DAILY",
                "feature_keys": ["api_calls"]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let aggregates = app.store.aggregates();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].feature_key, "api_calls");
}

#[tokio::test]
async fn empty_window_is_rejected() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);

    let at = Utc::now();
    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": subscription.subscription_id,
                "period_start": at,
                "period_end": at,
                "resolution": "DAILY"
            }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn unknown_subscription_is_not_found() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();

    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": Uuid::new_v4(),
                "period_start": Utc::now() - Duration::days(1),
                "period_end": Utc::now(),
                "resolution": "DAILY"
            }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn reaching_a_soft_limit_does_not_block_aggregation() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);
    let sub_id = subscription.subscription_id;
    app.seed_soft_limit(subscription.package_id, "api_calls", 10);

    record_event(&app, organization_id, sub_id, "api_calls", "25", "count", Utc::now()).await;

    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": sub_id,
                "period_start": Utc::now() - Duration::days(1),
                "period_end": Utc::now() + Duration::days(1),
                "resolution": "DAILY"
            }),
        )
        .await;

    // Limits only warn; the aggregate is still written.
    assert!(response.status().is_success());
    assert_eq!(app.store.aggregates().len(), 1);
}
