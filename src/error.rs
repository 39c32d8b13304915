use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    license::LicenseError,
    session::{ConnectError, LogoutError, OperationError, ResetError},
};

/// Every failure the gateway can report to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("instance_id is required")]
    InvalidInstanceId,
    #[error("invalid request body: {reason}")]
    InvalidBody { status: StatusCode, reason: String },
    #[error(transparent)]
    License(#[from] LicenseError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Logout(#[from] LogoutError),
    #[error("failed to reset session: {0}")]
    Reset(#[from] ResetError),
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl GatewayError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInstanceId => "invalid_instance_id",
            Self::InvalidBody { .. } => "invalid_body",
            Self::License(LicenseError::Missing) => "license_missing",
            Self::License(LicenseError::Invalid) => "license_invalid",
            Self::License(LicenseError::Unavailable(_)) => "license_unavailable",
            Self::Connect(ConnectError::NotFound) => "instance_not_found",
            Self::Connect(ConnectError::TransportFailure(_)) => "transport_failure",
            Self::Connect(ConnectError::InFlight) => "creation_in_flight",
            Self::Connect(ConnectError::Cancelled) => "creation_cancelled",
            Self::Logout(LogoutError::TransportCloseFailed(_)) => "transport_close_failed",
            Self::Reset(ResetError::LogoutFailed(_)) => "reset_logout_failed",
            Self::Reset(ResetError::License(_)) => "reset_license_rejected",
            Self::Reset(ResetError::RecreateFailed(_)) => "reset_recreate_failed",
            Self::Operation(OperationError::NotLoggedIn) => "not_logged_in",
            Self::Operation(OperationError::AlreadyLoggedIn) => "already_logged_in",
            Self::Operation(OperationError::InvalidMessage(_)) => "invalid_message",
            Self::Operation(OperationError::Protocol(_)) => "protocol_error",
            Self::Operation(OperationError::Unavailable) => "instance_unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInstanceId => StatusCode::BAD_REQUEST,
            Self::InvalidBody { status, .. } => *status,
            Self::License(error) | Self::Reset(ResetError::License(error)) => match error {
                LicenseError::Missing => StatusCode::UNAUTHORIZED,
                LicenseError::Invalid => StatusCode::FORBIDDEN,
                LicenseError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Connect(ConnectError::NotFound) => StatusCode::NOT_FOUND,
            Self::Connect(ConnectError::TransportFailure(_)) => StatusCode::BAD_GATEWAY,
            Self::Connect(ConnectError::InFlight | ConnectError::Cancelled) => StatusCode::CONFLICT,
            Self::Logout(_) | Self::Reset(ResetError::LogoutFailed(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Reset(ResetError::RecreateFailed(_)) => StatusCode::BAD_GATEWAY,
            Self::Operation(OperationError::NotLoggedIn | OperationError::AlreadyLoggedIn) => {
                StatusCode::CONFLICT
            }
            Self::Operation(OperationError::InvalidMessage(_)) => StatusCode::BAD_REQUEST,
            Self::Operation(OperationError::Protocol(_)) => StatusCode::BAD_GATEWAY,
            Self::Operation(OperationError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Diagnostics attached when a status query finds no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissingClient {
    pub has_client: bool,
}

/// Structured failure returned by every gateway operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error: GatewayError,
    pub license_bypassed: bool,
    pub debug_info: Option<MissingClient>,
}

impl Failure {
    pub fn new(error: impl Into<GatewayError>, license_bypassed: bool) -> Self {
        Self {
            error: error.into(),
            license_bypassed,
            debug_info: None,
        }
    }

    pub fn with_missing_client(mut self) -> Self {
        self.debug_info = Some(MissingClient { has_client: false });
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    status: &'static str,
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_info: Option<MissingClient>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    license_bypassed: bool,
}

impl Failure {
    fn envelope(&self) -> ErrorEnvelope {
        let message = match (&self.error, self.debug_info) {
            (GatewayError::Connect(ConnectError::NotFound), Some(_)) => "No client found".to_owned(),
            (error, _) => error.to_string(),
        };

        ErrorEnvelope {
            status: "error",
            error: self.error.code(),
            message,
            debug_info: self.debug_info,
            license_bypassed: self.license_bypassed,
        }
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.error.status(), Json(self.envelope())).into_response()
    }
}
