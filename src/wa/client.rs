use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::wa::{
    error::{ProtocolError, TransportError},
    events::ProtocolEvent,
    types::{AccountInfo, GroupInfo, OutgoingMessage},
};

/// Readiness of the connection owned by a protocol client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl TransportState {
    /// Stable string representation of a transport state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Messaging-platform client driven by exactly one instance runner.
///
/// The wire protocol lives behind this trait. `connect` resolves once the
/// transport is open and hands back the stream of protocol events; QR
/// payloads and login results arrive on that stream.
pub trait ProtocolClient: Send {
    /// Opens the transport and returns the event stream for this connection.
    fn connect(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<ProtocolEvent>, TransportError>>;

    /// Current readiness of the underlying connection.
    fn transport_state(&self) -> TransportState;

    /// Fetches the logged-in account profile.
    fn account_info(&mut self) -> BoxFuture<'_, Result<AccountInfo, ProtocolError>>;

    /// Lists groups the account participates in.
    fn fetch_groups(&mut self) -> BoxFuture<'_, Result<Vec<GroupInfo>, ProtocolError>>;

    /// Sends a message and returns the platform message id.
    fn send_message<'a>(
        &'a mut self,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, Result<String, ProtocolError>>;

    /// Logs the account out and releases the transport.
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Factory producing one fresh client per session creation.
pub trait ProtocolConnector: Send + Sync {
    fn client_for(&self, instance_id: &str) -> Box<dyn ProtocolClient>;
}
