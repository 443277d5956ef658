//! Usage recorder integration tests: batch intake, fingerprint dedup and
//! partial acceptance.

mod common;

use common::TestApp;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn batch_is_persisted_with_implicit_subscription() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_active_subscription(organization_id);

    let response = app
        .post(
            "/jobs/usage-events",
            &json!({
                "events": [
                    {
                        "organization_id": organization_id,
                        "feature_key": "api_calls",
                        "quantity": "10.5",
                        "unit": "count"
                    },
                    {
                        "organization_id": organization_id,
                        "feature_key": "storage_gb",
                        "quantity": 3,
                        "unit": "gb"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["accepted"], 2);

    let events = app.store.usage_events();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event.organization_id, organization_id);
        assert_eq!(event.subscription_id, Some(subscription.subscription_id));
    }
}

#[tokio::test]
async fn duplicate_fingerprint_is_stored_once() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    app.seed_active_subscription(organization_id);

    let payload = json!({
        "events": [
            {
                "organization_id": organization_id,
                "feature_key": "api_calls",
                "quantity": 1,
                "unit": "count",
                "fingerprint": "req-42"
            }
        ]
    });

    // Redelivery of the same job must be a no-op, not an error.
    let first = app.post("/jobs/usage-events", &payload).await;
    assert!(first.status().is_success());
    let second = app.post("/jobs/usage-events", &payload).await;
    assert!(second.status().is_success());

    let body: serde_json::Value = second.json().await.expect("Failed to parse JSON");
    assert_eq!(body["accepted"], 1);

    assert_eq!(app.store.usage_events().len(), 1);
}

#[tokio::test]
async fn failing_organization_group_is_dropped_without_failing_the_batch() {
    let app = TestApp::spawn().await;
    let healthy_org = Uuid::new_v4();
    let failing_org = Uuid::new_v4();
    let healthy = app.seed_active_subscription(healthy_org);
    let failing = app.seed_active_subscription(failing_org);
    app.store.fail_organization(failing_org);

    let response = app
        .post(
            "/jobs/usage-events",
            &json!({
                "events": [
                    {
                        "organization_id": healthy_org,
                        "subscription_id": healthy.subscription_id,
                        "feature_key": "api_calls",
                        "quantity": 4,
                        "unit": "count"
                    },
                    {
                        "organization_id": failing_org,
                        "subscription_id": failing.subscription_id,
                        "feature_key": "api_calls",
                        "quantity": 9,
                        "unit": "count"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["accepted"], 1);

    let events = app.store.usage_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].organization_id, healthy_org);
}

#[tokio::test]
async fn negative_quantity_is_rejected_before_persistence() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    app.seed_active_subscription(organization_id);

    let response = app
        .post(
            "/jobs/usage-events",
            &json!({
                "events": [
                    {
                        "organization_id": organization_id,
                        "feature_key": "api_calls",
                        "quantity": "-1",
                        "unit": "count"
                    }
                ]
            }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 422);
    assert!(app.store.usage_events().is_empty());
}

#[tokio::test]
async fn events_without_any_subscription_are_still_recorded() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();

    let response = app
        .post(
            "/jobs/usage-events",
            &json!({
                "events": [
                    {
                        "organization_id": organization_id,
                        "feature_key": "api_calls",
                        "quantity": 2,
                        "unit": "count"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let events = app.store.usage_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subscription_id, None);
}
