//! Service entry point.
//!
//! Loads configuration, installs tracing, wires the adapters around one
//! process-wide fan-out executor and serves the HTTP API until Ctrl+C.

use std::process::ExitCode;

use multiples_sync::api::create_router;
use multiples_sync::infrastructure::{AppConfig, AppDependencies, init_tracing};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> ExitCode {
    let (config, config_error) = match AppConfig::from_env() {
        Ok(config) => (config, None),
        Err(error) => (AppConfig::default(), Some(error)),
    };
    init_tracing(config.log_format);

    tracing::info!("Starting multiples-sync...");
    if let Some(error) = config_error {
        tracing::warn!("Failed to load configuration from environment: {error}");
        tracing::info!("Using default configuration");
    }
    tracing::info!(
        "Configuration loaded: host={}, port={}, fan_out_workers={}",
        config.app_host,
        config.app_port,
        config.fan_out_workers
    );

    let bind_address = config.bind_address();
    let dependencies = match AppDependencies::connect(config).await {
        Ok(dependencies) => dependencies,
        Err(error) => {
            tracing::error!("Failed to initialise dependencies: {error}");
            return ExitCode::FAILURE;
        }
    };

    let app = create_router(dependencies).layer(TraceLayer::new_for_http());

    let listener = match TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!("Failed to bind {bind_address}: {error}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("multiples-sync started on http://{bind_address}");
    tracing::info!("Available endpoints:");
    tracing::info!("  POST /multiples/bulk-create - Create or extend a multiple");
    tracing::info!("  POST /multiples/bulk-update - Update, regroup or move cases");
    tracing::info!("  GET  /health                - Health check");

    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {error}");
        return ExitCode::FAILURE;
    }

    tracing::info!("multiples-sync stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(error) => {
            tracing::error!("Failed to listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    }
}
