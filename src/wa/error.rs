use std::time::Duration;

use thiserror::Error;

/// Errors for the websocket link to the protocol bridge.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to connect transport: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),
    #[error("invalid bridge endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("transport closed by peer")]
    Closed,
    #[error("transport handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
}

/// Errors for request/response calls made through a connected client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("client is not connected")]
    NotConnected,
    #[error("request timed out")]
    Timeout,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}

/// Validation errors for outbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("recipient is required")]
    MissingRecipient,
    #[error("recipient is not a valid jid or phone number: {0}")]
    InvalidRecipient(String),
    #[error("message needs text or a media url")]
    EmptyContent,
}
