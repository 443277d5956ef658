use axum::{extract::State, Json};
use pipeline_core::error::AppError;
use validator::Validate;

use crate::dtos::{InvoiceJobRequest, InvoiceJobResponse};
use crate::startup::AppState;

/// Build a complete invoice for a billing period, optionally settling it
/// immediately.
pub async fn build_invoice(
    State(state): State<AppState>,
    Json(payload): Json<InvoiceJobRequest>,
) -> Result<Json<InvoiceJobResponse>, AppError> {
    payload.validate()?;

    tracing::info!(
        organization_id = %payload.organization_id,
        usage_charges = payload.usage_charges.len(),
        extra_lines = payload.extra_lines.len(),
        "Building invoice"
    );

    let response = state.invoicer.build(payload).await?;

    Ok(Json(response))
}
