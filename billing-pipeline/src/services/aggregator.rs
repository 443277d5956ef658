//! Usage aggregator: rolls raw events up into period-bucketed totals.

use pipeline_core::error::AppError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};

use crate::auth::AuthContext;
use crate::dtos::{AggregateJobRequest, AggregateJobResponse};
use crate::models::{FeatureLimit, LimitType, UpsertAggregate, UsageSource};
use crate::services::metrics;
use crate::store::Store;

const COMPONENT: &str = "usage-aggregator";

/// Sums usage events per (feature key, unit) over a half-open window and
/// upserts one aggregate per group. Re-running the same window replaces
/// the prior totals, so late-arriving events are corrected without double
/// counting.
#[derive(Clone)]
pub struct UsageAggregator {
    store: Arc<dyn Store>,
}

impl UsageAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, job), fields(organization_id = %job.organization_id, subscription_id = %job.subscription_id))]
    pub async fn aggregate(
        &self,
        job: AggregateJobRequest,
    ) -> Result<AggregateJobResponse, AppError> {
        let started = Instant::now();

        if job.period_end <= job.period_start {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "period_end must be strictly after period_start"
            )));
        }

        let ctx = AuthContext::service(job.organization_id, COMPONENT);

        let subscription = self
            .store
            .get_subscription(&ctx, job.subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        let events = self
            .store
            .usage_events_in_window(
                &ctx,
                job.subscription_id,
                job.period_start,
                job.period_end,
                job.feature_keys.as_deref(),
            )
            .await?;

        // Decimal-safe accumulation per (feature key, unit); zero matching
        // events for a key produce no aggregate row at all.
        let mut totals: BTreeMap<(String, String), Decimal> = BTreeMap::new();
        for event in &events {
            *totals
                .entry((event.feature_key.clone(), event.unit.clone()))
                .or_insert(Decimal::ZERO) += event.quantity;
        }

        let limits = self
            .store
            .get_feature_limits(&ctx, subscription.package_id)
            .await?;

        let source = job.source.unwrap_or(UsageSource::Worker);
        let mut written = 0u64;
        for ((feature_key, unit), quantity) in totals {
            self.store
                .upsert_aggregate(
                    &ctx,
                    &UpsertAggregate {
                        subscription_id: job.subscription_id,
                        feature_key: feature_key.clone(),
                        resolution: job.resolution,
                        period_start: job.period_start,
                        period_end: job.period_end,
                        quantity,
                        unit,
                        source,
                    },
                )
                .await?;
            written += 1;

            warn_on_limit(&limits, &feature_key, quantity);
        }

        metrics::record_aggregates_written(
            &job.organization_id.to_string(),
            job.resolution.as_str(),
            written,
        );

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_job_duration("aggregate", started.elapsed().as_secs_f64());

        Ok(AggregateJobResponse {
            aggregated: written,
            duration_ms,
        })
    }
}

/// Limits are observability-only inputs here; nothing is rejected.
fn warn_on_limit(limits: &[FeatureLimit], feature_key: &str, total: Decimal) {
    for limit in limits.iter().filter(|l| l.feature_key == feature_key) {
        let limit_type = LimitType::from_string(&limit.limit_type);
        if limit_type == LimitType::Unlimited {
            continue;
        }
        if let Some(value) = limit.limit_value {
            if total >= value {
                warn!(
                    feature_key = %feature_key,
                    limit_type = %limit.limit_type,
                    limit_value = %value,
                    total = %total,
                    "Aggregated usage reached feature limit"
                );
            }
        }
    }
}
