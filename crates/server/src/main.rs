//! Forecast Server - per-tenant forecasting and anomaly model service
//!
//! Trains, versions and serves one forecast lineage per (app, target) and one
//! anomaly lineage per app, over HTTP.

use anyhow::{Context, Result};
use forecast_lib::{HealthRegistry, ModelService};
use forecast_server::{api, ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "text" {
        registry.with(fmt::layer()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(&config.log_format);

    info!(
        port = config.port,
        models_dir = %config.models_dir.display(),
        registry_file = %config.registry_file.display(),
        "Starting forecast-server"
    );

    let health_registry = HealthRegistry::for_service().await;
    let service = ModelService::open(config.service_config(), health_registry.clone())
        .context("Failed to initialize model service")?;
    service.refresh_health().await;

    service.logger().log_startup(
        SERVER_VERSION,
        &config.models_dir.display().to_string(),
        &config.registry_file.display().to_string(),
    );

    let state = Arc::new(api::AppState::new(service.clone()));
    health_registry.set_ready(true).await;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
    };
    api::serve(config.port, state, shutdown).await?;

    service.logger().log_shutdown("SIGINT received");
    info!("Shutting down");
    Ok(())
}
