use std::sync::Arc;

use anyhow::Context;

use greenlight_api::app::{build_app, services::build_services};
use greenlight_api::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    greenlight_observability::init();

    let config = Config::from_env()?;
    let services = Arc::new(build_services(&config).await?);
    let tracker = Arc::clone(&services.tracker);

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        env = %config.environment,
        "starting server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!(in_flight = tracker.in_flight(), "completing background tasks");
    tracker.wait().await;

    tracing::info!("stopped server");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}
