#![allow(dead_code)]

pub mod wa_mock;
pub mod ws_mock;

use std::{sync::Arc, time::Duration};

use waziper_gateway::{
    config::Config,
    gateway::Gateway,
    license::{LicenseValidator, StaticTokenAuthority},
    session::{SessionManager, SessionPolicy},
};

use wa_mock::FakeConnector;

/// Session timings short enough for tests.
pub fn test_policy() -> SessionPolicy {
    SessionPolicy {
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(1),
        close_timeout: Duration::from_millis(300),
        reset_settle: Duration::from_millis(20),
        max_reconnect_attempts: 2,
    }
}

pub fn manager(connector: &FakeConnector) -> SessionManager {
    SessionManager::new(Arc::new(connector.clone()), test_policy())
}

pub fn gateway(connector: &FakeConnector, tokens: &str) -> anyhow::Result<Gateway> {
    let authority = StaticTokenAuthority::parse(tokens).map_err(anyhow::Error::msg)?;
    Ok(Gateway::new(
        manager(connector),
        LicenseValidator::new(Arc::new(authority)),
        Duration::from_millis(500),
    ))
}

/// Configuration with development routes switched on.
pub fn dev_config() -> anyhow::Result<Config> {
    Ok(Config::from_lookup(|key| {
        (key == "DEV_ROUTES_ENABLED").then(|| "true".to_owned())
    })?)
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn eventually<F>(what: &str, check: F) -> anyhow::Result<()>
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
