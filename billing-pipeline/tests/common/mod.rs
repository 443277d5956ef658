use billing_pipeline::config::{DatabaseConfig, PipelineConfig};
use billing_pipeline::models::{FeatureLimit, LimitType, Subscription, SubscriptionStatus};
use billing_pipeline::startup::Application;
use billing_pipeline::store::MemStore;
use chrono::{Duration, Utc};
use pipeline_core::config::Config as CoreConfig;
use std::sync::Arc;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: MemStore,
    pub client: reqwest::Client,
}

fn test_config(billing_enabled: bool) -> PipelineConfig {
    PipelineConfig {
        common: CoreConfig { port: 0 },
        service_name: "billing-pipeline".to_string(),
        log_level: "info".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        billing_enabled,
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_flag(true).await
    }

    /// Spawn the full HTTP surface over an in-memory store. The store is
    /// kept so tests can seed subscriptions and inspect persisted state.
    pub async fn spawn_with_flag(billing_enabled: bool) -> Self {
        let store = MemStore::new();
        let app = Application::with_store(test_config(billing_enabled), Arc::new(store.clone()))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to come up by polling the health endpoint.
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            store,
            client,
        }
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Seed an active monthly subscription and return it.
    pub fn seed_active_subscription(&self, organization_id: Uuid) -> Subscription {
        self.seed_subscription(organization_id, SubscriptionStatus::Active, 5_000)
    }

    pub fn seed_subscription(
        &self,
        organization_id: Uuid,
        status: SubscriptionStatus,
        recurring_amount_cents: i64,
    ) -> Subscription {
        let now = Utc::now();
        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            organization_id,
            package_id: Uuid::new_v4(),
            status: status.as_str().to_string(),
            currency: "usd".to_string(),
            recurring_amount_cents,
            billing_interval: "month".to_string(),
            current_period_start: now - Duration::days(15),
            current_period_end: now + Duration::days(15),
            cancel_at_period_end: false,
            metadata: None,
            created_utc: now,
            updated_utc: now,
        };
        self.store.seed_subscription(subscription.clone());
        subscription
    }

    pub fn seed_soft_limit(&self, package_id: Uuid, feature_key: &str, limit_value: i64) {
        self.store.seed_feature_limit(FeatureLimit {
            limit_id: Uuid::new_v4(),
            package_id,
            feature_key: feature_key.to_string(),
            limit_type: LimitType::Soft.as_str().to_string(),
            limit_value: Some(limit_value.into()),
            unit: "count".to_string(),
            usage_period: "month".to_string(),
        });
    }
}
