//! Service configuration, loaded from the environment.

use pipeline_core::config::Config as CoreConfig;
use pipeline_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    /// Operational kill switch for the whole pipeline.
    pub billing_enabled: bool,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let common = CoreConfig::load()?;

        let database_url = env::var("DATABASE_URL").map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("DATABASE_URL must be set"))
        })?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "16".to_string())
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid DATABASE_MAX_CONNECTIONS: {}", e))
            })?;
        let min_connections = env::var("DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid DATABASE_MIN_CONNECTIONS: {}", e))
            })?;

        let billing_enabled = env::var("BILLING_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        Ok(Self {
            common,
            service_name: "billing-pipeline".to_string(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: database_url,
                max_connections,
                min_connections,
            },
            billing_enabled,
        })
    }
}
