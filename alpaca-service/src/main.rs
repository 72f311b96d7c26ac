//! Alpaca Service Entry Point
//!
//! Loads configuration, connects the stores, starts background jobs and runs
//! until Ctrl-C.

use alpaca_core::AlpacaError;
use alpaca_service::{telemetry::init_tracing, AppState, ServiceConfig, ServiceError, ServiceResult};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    let config = ServiceConfig::from_env().map_err(|e| ServiceError::from(AlpacaError::from(e)))?;
    init_tracing(config.log_format)?;

    let mut state = AppState::build(config).await?;
    state.start_jobs();
    tracing::info!("Alpaca service started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ServiceError::operation_failed(format!("Failed to listen for Ctrl-C: {}", e)))?;
    tracing::info!("Shutdown signal received");

    state.shutdown().await
}
