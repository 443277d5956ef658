use axum::{extract::State, Json};
use pipeline_core::error::AppError;
use validator::Validate;

use crate::dtos::{RecordUsageBatchRequest, RecordUsageBatchResponse};
use crate::startup::AppState;

/// Accept a batch of usage events. Partial persistence failures are
/// reflected in the `accepted` count, not as an error.
pub async fn record_usage_batch(
    State(state): State<AppState>,
    Json(payload): Json<RecordUsageBatchRequest>,
) -> Result<Json<RecordUsageBatchResponse>, AppError> {
    payload.validate()?;

    tracing::info!(attempted = payload.events.len(), "Recording usage event batch");

    let response = state.recorder.record_batch(payload).await?;

    Ok(Json(response))
}
