use std::time::Duration;

use serde::Serialize;

use crate::{
    error::{Failure, GatewayError},
    license::{Access, LicenseValidator},
    session::{InstanceHandle, OperationError, QrPoll, SessionManager, StatusSnapshot, describe},
    wa::{AccountInfo, GroupInfo, OutgoingMessage},
};

pub type GatewayResult<T> = Result<Success<T>, Failure>;

/// Successful envelope: `{"status":"success", ...body}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Success<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: T,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub license_bypassed: bool,
}

impl<T> Success<T> {
    fn new(body: T, license_bypassed: bool) -> Self {
        Self {
            status: "success",
            message: None,
            body,
            license_bypassed,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub data: AccountInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QrDelivery {
    Ready,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrCodeBody {
    pub state: QrDelivery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qrcode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupList {
    pub data: Vec<GroupInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSent {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugInfo {
    pub debug_info: StatusSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ack {}

/// Boundary service for instance operations.
///
/// Every operation validates the caller's license first. A bypass only ever
/// arrives as [`Access::Bypass`], which request data cannot construct.
#[derive(Clone)]
pub struct Gateway {
    sessions: SessionManager,
    license: LicenseValidator,
    qr_wait: Duration,
}

impl Gateway {
    pub fn new(sessions: SessionManager, license: LicenseValidator, qr_wait: Duration) -> Self {
        Self {
            sessions,
            license,
            qr_wait,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Returns the logged-in account of an existing session.
    pub async fn get_instance_info(
        &self,
        access: &Access,
        instance_id: &str,
    ) -> GatewayResult<InstanceInfo> {
        let bypassed = access.is_bypass();
        let handle = self.admit(access, instance_id, false).await?;
        let account = handle
            .account_info()
            .await
            .map_err(|error| Failure::new(error, bypassed))?;

        Ok(Success::new(InstanceInfo { data: account }, bypassed))
    }

    /// Starts a session if needed and returns its current QR payload.
    pub async fn get_qrcode(&self, access: &Access, instance_id: &str) -> GatewayResult<QrCodeBody> {
        let bypassed = access.is_bypass();
        let handle = self.admit(access, instance_id, true).await?;

        match handle.wait_for_qr(self.qr_wait).await {
            QrPoll::Ready(payload) => Ok(Success::new(
                QrCodeBody {
                    state: QrDelivery::Ready,
                    qrcode: Some(payload),
                },
                bypassed,
            )),
            QrPoll::Pending => Ok(Success::new(
                QrCodeBody {
                    state: QrDelivery::Pending,
                    qrcode: None,
                },
                bypassed,
            )
            .with_message("QR code not issued yet, retry shortly")),
            QrPoll::LoggedIn => Err(Failure::new(OperationError::AlreadyLoggedIn, bypassed)),
            QrPoll::Closed => Err(Failure::new(OperationError::Unavailable, bypassed)),
        }
    }

    pub async fn get_groups(&self, access: &Access, instance_id: &str) -> GatewayResult<GroupList> {
        let bypassed = access.is_bypass();
        let handle = self.admit(access, instance_id, false).await?;
        let groups = handle
            .groups()
            .await
            .map_err(|error| Failure::new(error, bypassed))?;

        Ok(Success::new(GroupList { data: groups }, bypassed))
    }

    /// Ends the session for an instance. Succeeds when none exists.
    pub async fn logout(&self, access: &Access, instance_id: &str) -> GatewayResult<Ack> {
        let bypassed = access.is_bypass();
        let instance_id = require_instance_id(instance_id, bypassed)?;
        self.authorize(access, instance_id).await?;

        // Close failures are already logged; the slot is free either way.
        let _ = self.sessions.logout(instance_id).await;
        Ok(Success::new(Ack {}, bypassed).with_message("Logged out"))
    }

    pub async fn send_message(
        &self,
        access: &Access,
        instance_id: &str,
        message: OutgoingMessage,
    ) -> GatewayResult<MessageSent> {
        let bypassed = access.is_bypass();
        let handle = self.admit(access, instance_id, false).await?;
        let message = message
            .normalized()
            .map_err(|error| Failure::new(OperationError::from(error), bypassed))?;

        let message_id = handle
            .send_message(message)
            .await
            .map_err(|error| Failure::new(error, bypassed))?;
        tracing::debug!(instance = handle.instance_id(), message_id = %message_id, "message sent");

        Ok(Success::new(MessageSent { message_id }, bypassed))
    }

    /// Reports the session state without creating a session.
    pub async fn debug_status(&self, access: &Access, instance_id: &str) -> GatewayResult<DebugInfo> {
        let bypassed = access.is_bypass();
        let instance_id = require_instance_id(instance_id, bypassed)?;
        self.authorize(access, instance_id).await?;

        match self.sessions.status(instance_id) {
            Ok(snapshot) => Ok(Success::new(
                DebugInfo {
                    debug_info: snapshot,
                },
                bypassed,
            )),
            Err(error) => Err(Failure::new(error, bypassed).with_missing_client()),
        }
    }

    /// Tears down the session and starts a fresh one with a new QR flow.
    pub async fn reset_session(
        &self,
        access: &Access,
        instance_id: &str,
    ) -> GatewayResult<DebugInfo> {
        let bypassed = access.is_bypass();
        let instance_id = require_instance_id(instance_id, bypassed)?;
        self.authorize(access, instance_id).await?;

        let handle = self
            .sessions
            .reset(instance_id, || self.license.validate(access, instance_id))
            .await
            .map_err(|error| Failure::new(error, bypassed))?;

        let message = if bypassed {
            "Session reset successfully (license bypassed). Please try getting QR code again."
        } else {
            "Session reset successfully. Please try getting QR code again."
        };
        Ok(Success::new(
            DebugInfo {
                debug_info: describe(&handle),
            },
            bypassed,
        )
        .with_message(message))
    }

    async fn authorize(&self, access: &Access, instance_id: &str) -> Result<(), Failure> {
        self.license
            .validate(access, instance_id)
            .await
            .map_err(|error| Failure::new(error, access.is_bypass()))
    }

    async fn admit(
        &self,
        access: &Access,
        instance_id: &str,
        allow_login: bool,
    ) -> Result<InstanceHandle, Failure> {
        let bypassed = access.is_bypass();
        let instance_id = require_instance_id(instance_id, bypassed)?;
        self.authorize(access, instance_id).await?;

        self.sessions
            .get_or_create(instance_id, allow_login)
            .await
            .map_err(|error| Failure::new(error, bypassed))
    }
}

fn require_instance_id(raw: &str, bypassed: bool) -> Result<&str, Failure> {
    let instance_id = raw.trim();
    if instance_id.is_empty() {
        return Err(Failure::new(GatewayError::InvalidInstanceId, bypassed));
    }
    Ok(instance_id)
}
