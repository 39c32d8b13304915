use tokio::{
    sync::{mpsc, watch},
    time::Duration,
};

use crate::{
    session::{
        error::OperationError,
        handle::{LifecyclePhase, SessionCommand, SessionState},
    },
    wa::{ProtocolClient, ProtocolError, ProtocolEvent, TransportError, TransportState},
};

/// Channels and client owned by a runner that has not been spawned yet.
pub(crate) struct PendingRunner {
    pub client: Box<dyn ProtocolClient>,
    pub commands: mpsc::Receiver<SessionCommand>,
    pub state: watch::Sender<SessionState>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunnerPolicy {
    pub handshake_timeout: Duration,
    pub max_reconnect_attempts: u32,
}

/// Why a runner stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Termination {
    Shutdown,
    /// Every handle was dropped without a logout.
    Abandoned,
    LoggedOut,
    Failed(String),
    Exhausted(String),
}

impl Termination {
    /// Lifecycle phase published once the runner is gone.
    pub(crate) fn final_phase(&self, current: &LifecyclePhase) -> LifecyclePhase {
        match self {
            Self::Shutdown if *current == LifecyclePhase::Starting => LifecyclePhase::Cancelled,
            Self::Shutdown => LifecyclePhase::Closed {
                reason: "logout".to_owned(),
            },
            Self::Abandoned => LifecyclePhase::Closed {
                reason: "abandoned".to_owned(),
            },
            Self::LoggedOut => LifecyclePhase::Closed {
                reason: "logged_out".to_owned(),
            },
            Self::Failed(reason) => LifecyclePhase::Failed {
                reason: reason.clone(),
            },
            Self::Exhausted(reason) => LifecyclePhase::Failed {
                reason: format!("reconnect attempts exhausted: {reason}"),
            },
        }
    }
}

enum ConnectOutcome {
    Ready(mpsc::Receiver<ProtocolEvent>),
    Failed(TransportError),
    Stopped(Termination),
}

enum SessionEnd {
    Disconnected(String),
    Stopped(Termination),
}

/// Main task loop for a single instance session.
///
/// The runner is the only writer of the session state.
pub(crate) async fn run(
    instance_id: &str,
    mut client: Box<dyn ProtocolClient>,
    state: &watch::Sender<SessionState>,
    commands: &mut mpsc::Receiver<SessionCommand>,
    policy: RunnerPolicy,
) -> Termination {
    let mut connected_once = false;
    let mut attempt: u32 = 0;

    loop {
        let outcome = connect(
            instance_id,
            client.as_mut(),
            state,
            commands,
            policy.handshake_timeout,
        )
        .await;
        let reason = match outcome {
            ConnectOutcome::Ready(events) => {
                connected_once = true;
                attempt = 0;
                let transport = client.transport_state();
                state.send_modify(|current| {
                    current.phase = LifecyclePhase::Connected;
                    current.transport = transport;
                });
                tracing::info!(instance = instance_id, "protocol client connected");

                match serve(instance_id, client.as_mut(), state, commands, events).await {
                    SessionEnd::Disconnected(reason) => reason,
                    SessionEnd::Stopped(termination) => return termination,
                }
            }
            ConnectOutcome::Failed(error) if !connected_once => {
                tracing::warn!(instance = instance_id, error = %error, "initial connect failed");
                return Termination::Failed(error.to_string());
            }
            ConnectOutcome::Failed(error) => error.to_string(),
            ConnectOutcome::Stopped(termination) => return termination,
        };

        force_disconnected(instance_id, state, &reason);

        attempt = attempt.saturating_add(1);
        if attempt > policy.max_reconnect_attempts {
            tracing::warn!(
                instance = instance_id,
                attempts = policy.max_reconnect_attempts,
                "giving up on reconnect"
            );
            let _ = client.close().await;
            return Termination::Exhausted(reason);
        }

        let delay_secs = backoff_seconds(attempt - 1);
        state.send_modify(|current| {
            current.phase = LifecyclePhase::Reconnecting { attempt };
        });
        tracing::info!(instance = instance_id, attempt, delay_secs, "reconnect scheduled");

        if let Some(termination) = pause(
            client.as_mut(),
            commands,
            Duration::from_secs(delay_secs),
        )
        .await
        {
            return termination;
        }
    }
}

async fn connect(
    instance_id: &str,
    client: &mut dyn ProtocolClient,
    state: &watch::Sender<SessionState>,
    commands: &mut mpsc::Receiver<SessionCommand>,
    deadline: Duration,
) -> ConnectOutcome {
    state.send_modify(|current| current.transport = TransportState::Connecting);
    let expired = tokio::time::sleep(deadline);
    tokio::pin!(expired);
    let mut attempt = client.connect();

    loop {
        tokio::select! {
            _ = &mut expired => {
                drop(attempt);
                tracing::warn!(
                    instance = instance_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "connect attempt timed out"
                );
                let _ = client.close().await;
                return ConnectOutcome::Failed(TransportError::HandshakeTimeout(deadline));
            }
            result = &mut attempt => {
                return match result {
                    Ok(events) => ConnectOutcome::Ready(events),
                    Err(error) => ConnectOutcome::Failed(error),
                };
            }
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(SessionCommand::Shutdown { reply }) => {
                        drop(attempt);
                        tracing::info!(instance = instance_id, "shutdown requested while connecting");
                        let closed = client.close().await.map_err(|error| error.to_string());
                        let _ = reply.send(closed);
                        return ConnectOutcome::Stopped(Termination::Shutdown);
                    }
                    Some(command) => reject(command, OperationError::NotLoggedIn),
                    None => {
                        drop(attempt);
                        let _ = client.close().await;
                        return ConnectOutcome::Stopped(Termination::Abandoned);
                    }
                }
            }
        }
    }
}

async fn serve(
    instance_id: &str,
    client: &mut dyn ProtocolClient,
    state: &watch::Sender<SessionState>,
    commands: &mut mpsc::Receiver<SessionCommand>,
    mut events: mpsc::Receiver<ProtocolEvent>,
) -> SessionEnd {
    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    return SessionEnd::Disconnected("event stream closed".to_owned());
                };
                if let Some(end) = apply_event(instance_id, client, state, event).await {
                    return end;
                }
            }
            maybe_command = commands.recv() => {
                let Some(command) = maybe_command else {
                    let _ = client.close().await;
                    return SessionEnd::Stopped(Termination::Abandoned);
                };
                if let Some(termination) = handle_command(instance_id, client, state, command).await {
                    return SessionEnd::Stopped(termination);
                }
            }
        }
    }
}

async fn apply_event(
    instance_id: &str,
    client: &mut dyn ProtocolClient,
    state: &watch::Sender<SessionState>,
    event: ProtocolEvent,
) -> Option<SessionEnd> {
    tracing::debug!(instance = instance_id, event = event.event_type(), "protocol event");

    match event {
        ProtocolEvent::QrCode(payload) => {
            let mut accepted = false;
            state.send_modify(|current| accepted = current.qr.issue(payload));
            if accepted {
                tracing::info!(instance = instance_id, "qr code issued");
            } else {
                tracing::debug!(instance = instance_id, "ignoring qr code after login");
            }
        }
        ProtocolEvent::QrExpired => {
            state.send_if_modified(|current| current.qr.expire());
        }
        ProtocolEvent::Authenticated(account) => {
            tracing::info!(instance = instance_id, account = %account.id, "instance authenticated");
            state.send_modify(|current| {
                current.qr.authenticate();
                current.account = Some(account);
            });
        }
        ProtocolEvent::LoggedOut => {
            tracing::info!(instance = instance_id, "logged out by protocol peer");
            state.send_modify(|current| current.account = None);
            let _ = client.close().await;
            return Some(SessionEnd::Stopped(Termination::LoggedOut));
        }
        ProtocolEvent::Disconnected { reason } => {
            return Some(SessionEnd::Disconnected(reason));
        }
    }

    publish_transport(client, state);
    None
}

async fn handle_command(
    instance_id: &str,
    client: &mut dyn ProtocolClient,
    state: &watch::Sender<SessionState>,
    command: SessionCommand,
) -> Option<Termination> {
    let logged_in = state.borrow().is_authenticated();

    match command {
        SessionCommand::AccountInfo { reply } => {
            let result = if logged_in {
                client.account_info().await.map_err(protocol_failure)
            } else {
                Err(OperationError::NotLoggedIn)
            };
            let _ = reply.send(result);
        }
        SessionCommand::FetchGroups { reply } => {
            let result = if logged_in {
                client.fetch_groups().await.map_err(protocol_failure)
            } else {
                Err(OperationError::NotLoggedIn)
            };
            let _ = reply.send(result);
        }
        SessionCommand::SendMessage { message, reply } => {
            let result = if logged_in {
                client
                    .send_message(&message)
                    .await
                    .map_err(protocol_failure)
            } else {
                Err(OperationError::NotLoggedIn)
            };
            let _ = reply.send(result);
        }
        SessionCommand::Shutdown { reply } => {
            tracing::info!(instance = instance_id, "closing protocol client");
            let closed = client.close().await.map_err(|error| error.to_string());
            if let Err(error) = &closed {
                tracing::warn!(instance = instance_id, error = %error, "protocol client close failed");
            }
            let _ = reply.send(closed);
            return Some(Termination::Shutdown);
        }
    }

    publish_transport(client, state);
    None
}

/// Sleeps out a reconnect delay while still answering commands.
async fn pause(
    client: &mut dyn ProtocolClient,
    commands: &mut mpsc::Receiver<SessionCommand>,
    delay: Duration,
) -> Option<Termination> {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return None,
            maybe_command = commands.recv() => {
                match maybe_command {
                    Some(SessionCommand::Shutdown { reply }) => {
                        let closed = client.close().await.map_err(|error| error.to_string());
                        let _ = reply.send(closed);
                        return Some(Termination::Shutdown);
                    }
                    Some(command) => reject(command, OperationError::Unavailable),
                    None => {
                        let _ = client.close().await;
                        return Some(Termination::Abandoned);
                    }
                }
            }
        }
    }
}

fn reject(command: SessionCommand, error: OperationError) {
    match command {
        SessionCommand::AccountInfo { reply } => {
            let _ = reply.send(Err(error));
        }
        SessionCommand::FetchGroups { reply } => {
            let _ = reply.send(Err(error));
        }
        SessionCommand::SendMessage { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        SessionCommand::Shutdown { reply } => {
            let _ = reply.send(Ok(()));
        }
    }
}

fn force_disconnected(instance_id: &str, state: &watch::Sender<SessionState>, reason: &str) {
    tracing::warn!(instance = instance_id, reason, "protocol client disconnected");
    state.send_modify(|current| {
        current.transport = TransportState::Closed;
        current.qr.expire();
    });
}

fn publish_transport(client: &dyn ProtocolClient, state: &watch::Sender<SessionState>) {
    let transport = client.transport_state();
    state.send_if_modified(|current| {
        if current.transport == transport {
            return false;
        }
        current.transport = transport;
        true
    });
}

fn protocol_failure(error: ProtocolError) -> OperationError {
    OperationError::Protocol(error.to_string())
}

/// Reconnect delay in seconds for a zero-based attempt number.
pub fn backoff_seconds(attempt: u32) -> u64 {
    match attempt {
        0 => 1,
        1 => 2,
        2 => 4,
        3 => 8,
        4 => 16,
        _ => 30,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let delays: Vec<u64> = (0..7).map(backoff_seconds).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn shutdown_before_connect_reads_as_cancelled() {
        assert_eq!(
            Termination::Shutdown.final_phase(&LifecyclePhase::Starting),
            LifecyclePhase::Cancelled
        );
        assert_eq!(
            Termination::Shutdown.final_phase(&LifecyclePhase::Connected),
            LifecyclePhase::Closed {
                reason: "logout".to_owned()
            }
        );
    }
}
