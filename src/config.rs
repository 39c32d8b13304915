use std::{net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;
use url::Url;

use crate::{
    license::{BypassGrant, StaticTokenAuthority},
    session::SessionPolicy,
};

const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:8085/instances";

/// Allowed CORS origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address for binding the HTTP server.
    pub bind_addr: SocketAddr,
    /// Max HTTP request body size in KiB.
    pub server_body_limit_kb: usize,
    pub cors_origins: CorsOrigins,
    /// Base websocket endpoint of the protocol bridge.
    pub wa_bridge_url: Url,
    pub connect_timeout: Duration,
    /// Upper bound for one transport connect attempt.
    pub handshake_timeout: Duration,
    pub qr_wait: Duration,
    pub reset_settle: Duration,
    pub close_timeout: Duration,
    pub reconnect_max_attempts: u32,
    /// Deadline for one bridge request/response exchange.
    pub request_timeout: Duration,
    pub license_tokens: StaticTokenAuthority,
    /// Present only when development routes are enabled.
    pub dev_bypass: Option<BypassGrant>,
}

impl Config {
    /// Loads runtime configuration using `.env` and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads runtime configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_owned())
                .filter(|raw| !raw.is_empty())
        };

        let port = match read("SERVER_PORT") {
            Some(raw) => u16::from_str(&raw).map_err(|_| ConfigError::InvalidPort(raw))?,
            None => 8000,
        };

        let server_body_limit_kb = match read("SERVER_BODY_LIMIT_KB") {
            Some(raw) => usize::from_str(&raw).map_err(|_| ConfigError::InvalidBodyLimit(raw))?,
            None => 256,
        };

        let cors_origins = match read("CORS_ORIGIN") {
            None => CorsOrigins::Any,
            Some(raw) if raw == "*" => CorsOrigins::Any,
            Some(raw) => CorsOrigins::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        };

        let wa_bridge_url = parse_bridge_url(
            read("WA_BRIDGE_URL")
                .as_deref()
                .unwrap_or(DEFAULT_BRIDGE_URL),
        )?;

        let millis = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match read(key) {
                Some(raw) => u64::from_str(&raw)
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
                None => Ok(Duration::from_millis(default)),
            }
        };

        let reconnect_max_attempts = match read("RECONNECT_MAX_ATTEMPTS") {
            Some(raw) => u32::from_str(&raw).map_err(|_| ConfigError::InvalidNumber {
                key: "RECONNECT_MAX_ATTEMPTS",
                value: raw,
            })?,
            None => 5,
        };

        let license_tokens = match read("LICENSE_TOKENS") {
            Some(raw) => StaticTokenAuthority::parse(&raw).map_err(ConfigError::InvalidLicenseTokens)?,
            None => StaticTokenAuthority::new(),
        };

        let dev_bypass = match read("DEV_ROUTES_ENABLED") {
            Some(raw) => parse_flag("DEV_ROUTES_ENABLED", &raw)?.then(BypassGrant::issue),
            None => None,
        };

        Ok(Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            server_body_limit_kb,
            cors_origins,
            wa_bridge_url,
            connect_timeout: millis("CONNECT_TIMEOUT_MS", 20_000)?,
            handshake_timeout: millis("HANDSHAKE_TIMEOUT_MS", 60_000)?,
            qr_wait: millis("QR_WAIT_MS", 10_000)?,
            reset_settle: millis("RESET_SETTLE_MS", 2_000)?,
            close_timeout: millis("CLOSE_TIMEOUT_MS", 5_000)?,
            reconnect_max_attempts,
            request_timeout: millis("REQUEST_TIMEOUT_MS", 15_000)?,
            license_tokens,
            dev_bypass,
        })
    }

    pub fn dev_routes_enabled(&self) -> bool {
        self.dev_bypass.is_some()
    }

    /// Session timing derived from this configuration.
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            close_timeout: self.close_timeout,
            reset_settle: self.reset_settle,
            max_reconnect_attempts: self.reconnect_max_attempts,
        }
    }
}

fn parse_bridge_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBridgeUrl(raw.to_owned()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        _ => Err(ConfigError::InvalidBridgeUrl(raw.to_owned())),
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            key,
            value: raw.to_owned(),
        }),
    }
}

/// Errors while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SERVER_PORT value: {0}")]
    InvalidPort(String),
    #[error("invalid SERVER_BODY_LIMIT_KB value: {0}")]
    InvalidBodyLimit(String),
    #[error("invalid WA_BRIDGE_URL value (expected ws:// or wss://): {0}")]
    InvalidBridgeUrl(String),
    #[error("invalid {key} value: {value}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid {key} value (expected true/false): {value}")]
    InvalidFlag { key: &'static str, value: String },
    #[error("invalid LICENSE_TOKENS value: {0}")]
    InvalidLicenseTokens(String),
}
