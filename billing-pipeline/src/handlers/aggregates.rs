use axum::{extract::State, Json};
use pipeline_core::error::AppError;
use validator::Validate;

use crate::dtos::{AggregateJobRequest, AggregateJobResponse};
use crate::startup::AppState;

/// Roll usage events up into period-bucketed aggregates.
pub async fn run_aggregation(
    State(state): State<AppState>,
    Json(payload): Json<AggregateJobRequest>,
) -> Result<Json<AggregateJobResponse>, AppError> {
    payload.validate()?;

    tracing::info!(
        organization_id = %payload.organization_id,
        subscription_id = %payload.subscription_id,
        resolution = payload.resolution.as_str(),
        "Running usage aggregation"
    );

    let response = state.aggregator.aggregate(payload).await?;

    Ok(Json(response))
}
