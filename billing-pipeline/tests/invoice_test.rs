//! Invoice builder integration tests: recurring and usage lines, minimum
//! clamping, tax, settlement and duplicate numbers.

mod common;

use billing_pipeline::auth::AuthContext;
use billing_pipeline::store::Store;
use chrono::{Duration, Utc};
use common::TestApp;
use serde_json::json;
use uuid::Uuid;

struct BilledOrg {
    organization_id: Uuid,
    subscription_id: Uuid,
    period_start: chrono::DateTime<Utc>,
    period_end: chrono::DateTime<Utc>,
}

/// Record `quantity` of `api_calls` usage and aggregate it over a daily
/// window, so invoice jobs have an aggregate to price.
async fn seed_billed_usage(app: &TestApp, recurring_amount_cents: i64, quantity: &str) -> BilledOrg {
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_subscription(
        organization_id,
        billing_pipeline::models::SubscriptionStatus::Active,
        recurring_amount_cents,
    );
    let period_start = Utc::now() - Duration::days(1);
    let period_end = Utc::now() + Duration::days(1);

    let response = app
        .post(
            "/jobs/usage-events",
            &json!({
                "events": [
                    {
                        "organization_id": organization_id,
                        "subscription_id": subscription.subscription_id,
                        "feature_key": "api_calls",
                        "quantity": quantity,
                        "unit": "count"
                    }
                ]
            }),
        )
        .await;
    assert!(response.status().is_success());

    let response = app
        .post(
            "/jobs/aggregate",
            &json!({
                "organization_id": organization_id,
                "subscription_id": subscription.subscription_id,
                "period_start": period_start,
                "period_end": period_end,
                "resolution": "DAILY"
            }),
        )
        .await;
    assert!(response.status().is_success());

    BilledOrg {
        organization_id,
        subscription_id: subscription.subscription_id,
        period_start,
        period_end,
    }
}

#[tokio::test]
async fn invoice_combines_recurring_and_usage_lines() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "3").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "usage_charges": [
                    {
                        "feature_key": "api_calls",
                        "unit_amount_cents": 100,
                        "unit": "count",
                        "resolution": "DAILY"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["subtotal_cents"], 5_300);
    assert_eq!(body["tax_cents"], 0);
    assert_eq!(body["total_cents"], 5_300);
    assert_eq!(body["line_count"], 2);
    assert_eq!(body["status"], "open");

    let invoices = app.store.invoices();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].balance_cents, 5_300);
    assert!(invoices[0].number.starts_with("INV-"));
    assert!(invoices[0].issued_at.is_some());
}

#[tokio::test]
async fn persisted_line_amounts_sum_to_the_invoice_total() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "3").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "tax_rate_bps": 825,
                "usage_charges": [
                    {
                        "feature_key": "api_calls",
                        "unit_amount_cents": 100,
                        "unit": "count",
                        "resolution": "DAILY"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    let invoice_id: Uuid = body["invoice_id"]
        .as_str()
        .expect("Missing invoice_id")
        .parse()
        .expect("Invalid invoice_id");
    let total_cents = body["total_cents"].as_i64().expect("Missing total_cents");

    // 5000 recurring + 300 usage = 5300, plus 437 tax (825 bps).
    assert_eq!(body["subtotal_cents"], 5_300);
    assert_eq!(body["tax_cents"], 437);
    assert_eq!(total_cents, 5_737);

    // The persisted lines, tax included, must account for every cent of
    // the total.
    let ctx = AuthContext::service(org.organization_id, "invoice-test");
    let lines = app
        .store
        .list_invoice_lines(&ctx, invoice_id)
        .await
        .expect("Failed to list invoice lines");
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|l| l.line_type == "tax"));

    let line_sum: i64 = lines.iter().map(|l| l.amount_cents).sum();
    assert_eq!(line_sum, total_cents);
}

#[tokio::test]
async fn usage_charge_is_clamped_to_its_minimum() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 0, "3").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "usage_charges": [
                    {
                        "feature_key": "api_calls",
                        "unit_amount_cents": 100,
                        "unit": "count",
                        "minimum_amount_cents": 500,
                        "resolution": "DAILY"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    // 3 * 100 = 300, below the 500 minimum.
    assert_eq!(body["subtotal_cents"], 500);
    assert_eq!(body["line_count"], 1);
}

#[tokio::test]
async fn zero_usage_with_minimum_still_bills_the_minimum() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_subscription(
        organization_id,
        billing_pipeline::models::SubscriptionStatus::Active,
        0,
    );

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": organization_id,
                "subscription_id": subscription.subscription_id,
                "period_start": Utc::now() - Duration::days(1),
                "period_end": Utc::now(),
                "usage_charges": [
                    {
                        "feature_key": "api_calls",
                        "unit_amount_cents": 100,
                        "unit": "count",
                        "minimum_amount_cents": 900,
                        "resolution": "DAILY"
                    }
                ]
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["subtotal_cents"], 900);
}

#[tokio::test]
async fn invoice_with_no_billable_lines_is_rejected() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    let subscription = app.seed_subscription(
        organization_id,
        billing_pipeline::models::SubscriptionStatus::Active,
        0,
    );

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": organization_id,
                "subscription_id": subscription.subscription_id,
                "period_start": Utc::now() - Duration::days(1),
                "period_end": Utc::now(),
                "usage_charges": [
                    {
                        "feature_key": "api_calls",
                        "unit_amount_cents": 100,
                        "unit": "count",
                        "resolution": "DAILY"
                    }
                ]
            }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
    assert!(app.store.invoices().is_empty());
}

#[tokio::test]
async fn tax_rate_is_applied_to_the_subtotal() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "0").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "tax_rate_bps": 1000
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["subtotal_cents"], 5_000);
    assert_eq!(body["tax_cents"], 500);
    assert_eq!(body["total_cents"], 5_500);
    // Recurring line plus the tax line.
    assert_eq!(body["line_count"], 2);
}

#[tokio::test]
async fn explicit_tax_cents_win_over_the_rate() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "0").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "tax_rate_bps": 1000,
                "tax_cents": 123
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["tax_cents"], 123);
    assert_eq!(body["total_cents"], 5_123);
}

#[tokio::test]
async fn full_settlement_marks_the_invoice_paid() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "0").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "settle": {}
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "paid");

    let invoices = app.store.invoices();
    assert_eq!(invoices[0].balance_cents, 0);
    assert!(invoices[0].paid_at.is_some());
}

#[tokio::test]
async fn partial_settlement_leaves_the_invoice_open() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "0").await;

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": org.organization_id,
                "subscription_id": org.subscription_id,
                "period_start": org.period_start,
                "period_end": org.period_end,
                "settle": { "amount_cents": 2_000 }
            }),
        )
        .await;

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "open");

    let invoices = app.store.invoices();
    assert_eq!(invoices[0].balance_cents, 3_000);
    assert!(invoices[0].paid_at.is_none());
}

#[tokio::test]
async fn duplicate_invoice_number_is_a_conflict() {
    let app = TestApp::spawn().await;
    let org = seed_billed_usage(&app, 5_000, "0").await;

    let job = json!({
        "organization_id": org.organization_id,
        "subscription_id": org.subscription_id,
        "invoice_number": "INV-FIXED-1",
        "period_start": org.period_start,
        "period_end": org.period_end
    });

    let first = app.post("/jobs/invoice", &job).await;
    assert!(first.status().is_success());

    let second = app.post("/jobs/invoice", &job).await;
    assert_eq!(second.status().as_u16(), 409);
    assert_eq!(app.store.invoices().len(), 1);
}

#[tokio::test]
async fn inverted_billing_period_is_rejected() {
    let app = TestApp::spawn().await;
    let organization_id = Uuid::new_v4();
    app.seed_active_subscription(organization_id);

    let response = app
        .post(
            "/jobs/invoice",
            &json!({
                "organization_id": organization_id,
                "period_start": Utc::now(),
                "period_end": Utc::now() - Duration::days(1)
            }),
        )
        .await;

    assert_eq!(response.status().as_u16(), 400);
}
