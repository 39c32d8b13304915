use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::AbortHandle,
    time::{Duration, timeout},
};
use uuid::Uuid;

use crate::{
    session::{
        error::{ConnectError, LogoutError, OperationError},
        qr::QrFlow,
    },
    wa::{AccountInfo, GroupInfo, OutgoingMessage, TransportState},
};

/// Lifecycle of the runner task behind a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// First connection attempt in progress.
    Starting,
    /// Transport open; protocol events flowing.
    Connected,
    /// Transport dropped; waiting before the next attempt.
    Reconnecting { attempt: u32 },
    /// Connection could not be (re)established.
    Failed { reason: String },
    /// Torn down before the first connection completed.
    Cancelled,
    /// Torn down after having been connected.
    Closed { reason: String },
}

impl LifecyclePhase {
    /// Stable string representation of a lifecycle phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Closed { .. } => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed { .. } | Self::Cancelled | Self::Closed { .. }
        )
    }
}

/// State owned by the instance runner and published to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: LifecyclePhase,
    pub transport: TransportState,
    pub qr: QrFlow,
    pub account: Option<AccountInfo>,
}

impl SessionState {
    pub fn starting() -> Self {
        Self {
            phase: LifecyclePhase::Starting,
            transport: TransportState::Connecting,
            qr: QrFlow::new(),
            account: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }
}

type Reply<T> = oneshot::Sender<Result<T, OperationError>>;

/// Commands accepted by an instance runner task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    AccountInfo { reply: Reply<AccountInfo> },
    FetchGroups { reply: Reply<Vec<GroupInfo>> },
    SendMessage {
        message: OutgoingMessage,
        reply: Reply<String>,
    },
    /// Logs out, closes the transport and stops the runner.
    Shutdown {
        reply: oneshot::Sender<Result<(), String>>,
    },
}

/// Result of waiting for a QR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrPoll {
    Ready(String),
    Pending,
    LoggedIn,
    Closed,
}

struct HandleInner {
    instance_id: String,
    generation: Uuid,
    created_at: DateTime<Utc>,
    last_access_ms: AtomicI64,
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    runner: OnceLock<AbortHandle>,
}

/// Handle used by other modules to interact with an instance session.
///
/// Cloning is cheap; every clone refers to the same session.
#[derive(Clone)]
pub struct InstanceHandle {
    inner: Arc<HandleInner>,
}

impl InstanceHandle {
    pub(crate) fn new(
        instance_id: String,
        commands: mpsc::Sender<SessionCommand>,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        let now = Utc::now();
        Self {
            inner: Arc::new(HandleInner {
                instance_id,
                generation: Uuid::new_v4(),
                created_at: now,
                last_access_ms: AtomicI64::new(now.timestamp_millis()),
                commands,
                state,
                runner: OnceLock::new(),
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// Identifier distinguishing this session from earlier ones of the same instance.
    pub fn generation(&self) -> Uuid {
        self.inner.generation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn last_access_at(&self) -> DateTime<Utc> {
        let millis = self.inner.last_access_ms.load(Ordering::Relaxed);
        DateTime::from_timestamp_millis(millis).unwrap_or(self.inner.created_at)
    }

    pub(crate) fn touch(&self) {
        self.inner
            .last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Returns true when both handles refer to the same session.
    pub fn same_session(&self, other: &InstanceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a copy of the current session state.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    pub(crate) fn attach_runner(&self, runner: AbortHandle) {
        let _ = self.inner.runner.set(runner);
    }

    /// Waits until the first connection attempt has settled.
    pub async fn wait_connected(&self, max_wait: Duration) -> Result<(), ConnectError> {
        let mut state = self.subscribe();
        let waited = timeout(
            max_wait,
            state.wait_for(|current| current.phase != LifecyclePhase::Starting),
        )
        .await;

        match waited {
            Err(_) => Err(ConnectError::InFlight),
            Ok(Err(_)) => Err(ConnectError::Cancelled),
            Ok(Ok(current)) => match &current.phase {
                LifecyclePhase::Connected | LifecyclePhase::Reconnecting { .. } => Ok(()),
                LifecyclePhase::Failed { reason } => {
                    Err(ConnectError::TransportFailure(reason.clone()))
                }
                LifecyclePhase::Cancelled | LifecyclePhase::Closed { .. } => {
                    Err(ConnectError::Cancelled)
                }
                LifecyclePhase::Starting => Err(ConnectError::InFlight),
            },
        }
    }

    /// Waits for a QR payload, login, or session end.
    pub async fn wait_for_qr(&self, max_wait: Duration) -> QrPoll {
        let mut state = self.subscribe();
        let waited = timeout(
            max_wait,
            state.wait_for(|current| {
                current.is_authenticated()
                    || current.qr.payload().is_some()
                    || current.phase.is_terminal()
            }),
        )
        .await;

        match waited {
            Err(_) => QrPoll::Pending,
            Ok(Err(_)) => QrPoll::Closed,
            Ok(Ok(current)) => {
                if current.is_authenticated() {
                    QrPoll::LoggedIn
                } else if let Some(payload) = current.qr.payload() {
                    QrPoll::Ready(payload.to_owned())
                } else {
                    QrPoll::Closed
                }
            }
        }
    }

    pub async fn account_info(&self) -> Result<AccountInfo, OperationError> {
        self.request(|reply| SessionCommand::AccountInfo { reply })
            .await
    }

    pub async fn groups(&self) -> Result<Vec<GroupInfo>, OperationError> {
        self.request(|reply| SessionCommand::FetchGroups { reply })
            .await
    }

    pub async fn send_message(&self, message: OutgoingMessage) -> Result<String, OperationError> {
        self.request(|reply| SessionCommand::SendMessage { message, reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, OperationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply_tx))
            .await
            .map_err(|_| OperationError::Unavailable)?;

        reply_rx.await.map_err(|_| OperationError::Unavailable)?
    }

    /// Asks the runner to log out and close; aborts it if it does not answer in time.
    pub(crate) async fn shutdown(&self, max_wait: Duration) -> Result<(), LogoutError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let acknowledged = timeout(max_wait, async {
            if self
                .inner
                .commands
                .send(SessionCommand::Shutdown { reply: reply_tx })
                .await
                .is_err()
            {
                return Ok(());
            }
            reply_rx.await.unwrap_or(Ok(()))
        })
        .await;

        match acknowledged {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(LogoutError::TransportCloseFailed(reason)),
            Err(_) => {
                if let Some(runner) = self.inner.runner.get() {
                    runner.abort();
                }
                Err(LogoutError::TransportCloseFailed(format!(
                    "runner did not acknowledge close within {}ms",
                    max_wait.as_millis()
                )))
            }
        }
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("instance_id", &self.inner.instance_id)
            .field("generation", &self.inner.generation)
            .finish()
    }
}
