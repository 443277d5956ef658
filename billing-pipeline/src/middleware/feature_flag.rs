//! Operational kill switch for the billing pipeline.
//!
//! When `billing_enabled` is off, every job endpoint answers 404 with a
//! `billing_disabled` body instead of reaching a handler.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::startup::AppState;

pub async fn billing_enabled_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.billing_enabled {
        tracing::debug!(path = req.uri().path(), "Billing pipeline disabled, rejecting job");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "billing_disabled" })),
        )
            .into_response();
    }
    next.run(req).await
}
