use serde::{Deserialize, Serialize};

use crate::wa::types::AccountInfo;

/// Events pushed by a connected protocol client to its instance runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    /// New QR payload issued for login. Replaces any previous payload.
    QrCode(String),
    /// The current QR payload expired; a fresh one follows.
    QrExpired,
    /// Login completed for the given account.
    Authenticated(AccountInfo),
    /// The account session was revoked (logged out from the phone).
    LoggedOut,
    /// Underlying transport dropped.
    Disconnected { reason: String },
}

impl ProtocolEvent {
    /// Returns a stable event-type label.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::QrCode(_) => "qr_code",
            Self::QrExpired => "qr_expired",
            Self::Authenticated(_) => "authenticated",
            Self::LoggedOut => "logged_out",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}
