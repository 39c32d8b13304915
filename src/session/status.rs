use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    session::{
        handle::InstanceHandle,
        qr::{QrPhase, QrState},
    },
    wa::TransportState,
};

/// Authentication label reported by diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthStatus {
    #[serde(rename = "Logged in")]
    Authenticated,
    #[serde(rename = "Not logged in")]
    Unauthenticated,
}

/// Point-in-time view of one instance session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub has_client: bool,
    pub has_qrcode: bool,
    pub qrcode_value: QrState,
    pub qr_phase: QrPhase,
    pub user_info: AuthStatus,
    pub connection_state: TransportState,
    pub lifecycle: &'static str,
    pub generation: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
}

/// Reads the current state of a handle. Never mutates it.
pub fn describe(handle: &InstanceHandle) -> StatusSnapshot {
    let state = handle.state();
    let qr_state = state.qr.state();

    StatusSnapshot {
        has_client: true,
        has_qrcode: qr_state != QrState::Undefined,
        qrcode_value: qr_state,
        qr_phase: state.qr.phase(),
        user_info: if state.is_authenticated() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        },
        connection_state: state.transport,
        lifecycle: state.phase.as_str(),
        generation: handle.generation(),
        created_at: handle.created_at(),
        last_access_at: handle.last_access_at(),
    }
}
