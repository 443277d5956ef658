use axum::{extract::State, Json};
use pipeline_core::error::AppError;
use validator::Validate;

use crate::dtos::{PaymentSyncRequest, PaymentSyncResponse};
use crate::startup::AppState;

/// Apply an external payment lifecycle event to an invoice.
pub async fn sync_payment(
    State(state): State<AppState>,
    Json(payload): Json<PaymentSyncRequest>,
) -> Result<Json<PaymentSyncResponse>, AppError> {
    payload.validate()?;

    tracing::info!(
        organization_id = %payload.organization_id,
        invoice_id = %payload.invoice_id,
        event = ?payload.event,
        "Applying payment sync event"
    );

    let response = state.payments.apply(payload).await?;

    Ok(Json(response))
}
