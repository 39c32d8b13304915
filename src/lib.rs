pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod license;
pub mod observability;
pub mod session;
pub mod wa;

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt};

use app::{AppState, HttpOptions, build_router};
use config::Config;
use gateway::Gateway;
use license::LicenseValidator;
use session::SessionManager;
use wa::BridgeConnector;

/// Starts the gateway runtime.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;

    if config.license_tokens.is_empty() {
        tracing::warn!("LICENSE_TOKENS is empty; every licensed request will be rejected");
    }
    if config.dev_routes_enabled() {
        tracing::warn!("development routes enabled; license validation can be bypassed");
    }

    let connector = BridgeConnector::new(config.wa_bridge_url.clone(), config.request_timeout);
    let sessions = SessionManager::new(Arc::new(connector), config.session_policy());
    let license = LicenseValidator::new(Arc::new(config.license_tokens.clone()));
    let gateway = Gateway::new(sessions, license, config.qr_wait);

    let state = AppState::new(gateway, config.dev_bypass).with_options(HttpOptions {
        body_limit_kb: config.server_body_limit_kb,
        cors_origins: config.cors_origins.clone(),
    });
    state.set_ready(true);

    tracing::info!(
        %bind_addr,
        bridge = %config.wa_bridge_url,
        "starting waziper-gateway"
    );

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("waziper-gateway stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
