//! Application startup and lifecycle management.

use crate::config::PipelineConfig;
use crate::handlers::{build_invoice, record_usage_batch, run_aggregation, sync_payment};
use crate::middleware::billing_enabled_middleware;
use crate::services::{
    get_metrics, init_metrics, InvoiceBuilder, PaymentSyncEngine, UsageAggregator, UsageRecorder,
};
use crate::store::{PgStore, Store};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get,
    routing::post, Json, Router,
};
use pipeline_core::error::AppError;
use pipeline_core::middleware::metrics::metrics_middleware;
use pipeline_core::middleware::tracing::request_id_middleware;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: PipelineConfig,
    pub store: Arc<dyn Store>,
    pub recorder: Arc<UsageRecorder>,
    pub aggregator: Arc<UsageAggregator>,
    pub invoicer: Arc<InvoiceBuilder>,
    pub payments: Arc<PaymentSyncEngine>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "billing-pipeline",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "billing-pipeline",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against PostgreSQL, running migrations first.
    pub async fn build(config: PipelineConfig) -> Result<Self, AppError> {
        let store = PgStore::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        store.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        Self::with_store(config, Arc::new(store)).await
    }

    /// Build the application on top of an already constructed store.
    /// Used by tests to run the full HTTP surface against an in-memory store.
    pub async fn with_store(
        config: PipelineConfig,
        store: Arc<dyn Store>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let state = AppState {
            config: config.clone(),
            store: store.clone(),
            recorder: Arc::new(UsageRecorder::new(store.clone())),
            aggregator: Arc::new(UsageAggregator::new(store.clone())),
            invoicer: Arc::new(InvoiceBuilder::new(store.clone())),
            payments: Arc::new(PaymentSyncEngine::new(store)),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing pipeline listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        // Job routes sit behind the kill switch; probes and metrics do not.
        let job_routes = Router::new()
            .route("/usage-events", post(record_usage_batch))
            .route("/aggregate", post(run_aggregation))
            .route("/invoice", post(build_invoice))
            .route("/payment-sync", post(sync_payment))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                billing_enabled_middleware,
            ));

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .nest("/jobs", job_routes)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state);

        tracing::info!(port = self.port, "Billing pipeline HTTP server starting");

        axum::serve(self.listener, router).await
    }
}
