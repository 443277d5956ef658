//! Usage recorder: validates and durably stores metered usage events.

use pipeline_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::dtos::{RecordUsageBatchRequest, RecordUsageBatchResponse, UsageEventInput};
use crate::models::{NewUsageEvent, UsageSource};
use crate::services::metrics;
use crate::store::Store;

const COMPONENT: &str = "usage-recorder";

/// Records batches of usage events, grouped and persisted per
/// organization. A failing organization group is dropped and logged; the
/// rest of the batch is unaffected.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn Store>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, batch), fields(attempted = batch.events.len()))]
    pub async fn record_batch(
        &self,
        batch: RecordUsageBatchRequest,
    ) -> Result<RecordUsageBatchResponse, AppError> {
        let mut groups: BTreeMap<Uuid, Vec<UsageEventInput>> = BTreeMap::new();
        for event in batch.events {
            groups.entry(event.organization_id).or_default().push(event);
        }

        let mut accepted = 0usize;
        for (organization_id, group) in groups {
            let ctx = AuthContext::service(organization_id, COMPONENT);
            let attempted = group.len();

            // Resolve the organization's active subscription once per
            // group, not per event.
            let implicit_subscription = if group.iter().any(|e| e.subscription_id.is_none()) {
                match self.store.find_active_subscription(&ctx).await {
                    Ok(subscription) => subscription.map(|s| s.subscription_id),
                    Err(e) => {
                        warn!(
                            error = %e,
                            organization_id = %organization_id,
                            dropped = attempted,
                            "Subscription lookup failed, dropping organization group"
                        );
                        metrics::record_error("database", "record_usage_batch");
                        continue;
                    }
                }
            } else {
                None
            };

            let events: Vec<NewUsageEvent> = group
                .into_iter()
                .map(|input| NewUsageEvent {
                    subscription_id: input.subscription_id.or(implicit_subscription),
                    tenant_id: input.tenant_id,
                    product_id: input.product_id,
                    feature_key: input.feature_key,
                    quantity: input.quantity,
                    unit: input.unit,
                    recorded_at: input.recorded_at.unwrap_or_else(chrono::Utc::now),
                    source: input.source.unwrap_or(UsageSource::Api),
                    metadata: input.metadata,
                    fingerprint: input.fingerprint,
                })
                .collect();

            match self.store.insert_usage_events(&ctx, &events).await {
                Ok(inserted) => {
                    accepted += attempted;
                    if inserted < attempted as u64 {
                        debug!(
                            organization_id = %organization_id,
                            attempted = attempted,
                            inserted = inserted,
                            "Skipped duplicate fingerprinted events"
                        );
                    }
                    let mut by_source: BTreeMap<&'static str, u64> = BTreeMap::new();
                    for event in &events {
                        *by_source.entry(event.source.as_str()).or_insert(0) += 1;
                    }
                    for (source, count) in by_source {
                        metrics::record_usage_events(
                            &organization_id.to_string(),
                            source,
                            count,
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        organization_id = %organization_id,
                        dropped = attempted,
                        "Usage event group dropped"
                    );
                    metrics::record_error("database", "record_usage_batch");
                }
            }
        }

        Ok(RecordUsageBatchResponse { accepted })
    }
}
