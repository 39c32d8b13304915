use thiserror::Error;

use crate::{license::LicenseError, wa::MessageError};

/// Errors from looking up or creating an instance session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("no session exists for this instance")]
    NotFound,
    #[error("transport could not be established: {0}")]
    TransportFailure(String),
    #[error("session creation still in flight")]
    InFlight,
    #[error("session creation was cancelled")]
    Cancelled,
}

/// Logout failures. The registry slot is freed regardless.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogoutError {
    #[error("transport close failed: {0}")]
    TransportCloseFailed(String),
}

/// Reset failures, split by the step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResetError {
    #[error("could not tear down previous session: {0}")]
    LogoutFailed(#[source] LogoutError),
    #[error("license rejected during reset: {0}")]
    License(#[source] LicenseError),
    #[error("could not create new session: {0}")]
    RecreateFailed(#[source] ConnectError),
}

/// Errors from domain operations on a live session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("instance is not logged in")]
    NotLoggedIn,
    #[error("instance is already logged in")]
    AlreadyLoggedIn,
    #[error(transparent)]
    InvalidMessage(#[from] MessageError),
    #[error("protocol request failed: {0}")]
    Protocol(String),
    #[error("instance session is unavailable")]
    Unavailable,
}
