pub mod error;
pub mod handle;
pub mod qr;
pub mod registry;
pub mod runner;
pub mod status;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};

use crate::{
    license::LicenseError,
    wa::{ProtocolConnector, TransportState},
};

pub use error::{ConnectError, LogoutError, OperationError, ResetError};
pub use handle::{InstanceHandle, LifecyclePhase, QrPoll, SessionState};
pub use qr::{QrFlow, QrPhase, QrState};
pub use registry::{InstanceRegistry, Slot};
pub use status::{AuthStatus, StatusSnapshot, describe};

use runner::{PendingRunner, RunnerPolicy};

const COMMAND_BUFFER: usize = 64;

/// Timing knobs for session lifecycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// How long a creating caller waits for the first connection to settle.
    pub connect_timeout: Duration,
    /// Deadline for a single connect attempt; an attempt past it counts as failed.
    pub handshake_timeout: Duration,
    /// How long logout waits for the runner to close the transport.
    pub close_timeout: Duration,
    /// Pause between teardown and recreation during a reset.
    pub reset_settle: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(20_000),
            handshake_timeout: Duration::from_millis(60_000),
            close_timeout: Duration::from_millis(5_000),
            reset_settle: Duration::from_millis(2_000),
            max_reconnect_attempts: 5,
        }
    }
}

/// Owns every live instance session and the rules for creating and removing them.
///
/// At most one handle exists per instance id. Concurrent creators of the same
/// id share one connection attempt, and logout is serialized with creation.
#[derive(Clone)]
pub struct SessionManager {
    registry: InstanceRegistry,
    connector: Arc<dyn ProtocolConnector>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn ProtocolConnector>, policy: SessionPolicy) -> Self {
        Self {
            registry: InstanceRegistry::new(),
            connector,
            policy,
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Returns the current total number of live sessions.
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    pub fn ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Returns the live handle for an id, creating and connecting one when allowed.
    pub async fn get_or_create(
        &self,
        instance_id: &str,
        allow_login: bool,
    ) -> Result<InstanceHandle, ConnectError> {
        let instance_id = instance_id.trim();
        if instance_id.is_empty() {
            return Err(ConnectError::NotFound);
        }

        if let Some(handle) = self.registry.get(instance_id) {
            if allow_login {
                handle.wait_connected(self.policy.connect_timeout).await?;
            }
            return Ok(handle);
        }

        if !allow_login {
            return Err(ConnectError::NotFound);
        }

        let handle = {
            let gate = self.registry.gate(instance_id);
            let _guard = gate.lock().await;

            match self
                .registry
                .get_or_insert_with(instance_id, || self.prepare(instance_id))
            {
                Slot::Existing(handle) => handle,
                Slot::Inserted(handle, pending) => {
                    tracing::info!(
                        instance = instance_id,
                        generation = %handle.generation(),
                        "creating instance session"
                    );
                    self.launch(&handle, pending);
                    handle
                }
            }
        };
        self.registry.release_gate(instance_id);

        handle.wait_connected(self.policy.connect_timeout).await?;
        Ok(handle)
    }

    /// Removes the session for an id and closes its transport.
    ///
    /// Unknown ids are a no-op. The slot is released even when closing fails.
    pub async fn logout(&self, instance_id: &str) -> Result<(), LogoutError> {
        let instance_id = instance_id.trim();
        if instance_id.is_empty() {
            return Ok(());
        }

        let result = {
            let gate = self.registry.gate(instance_id);
            let _guard = gate.lock().await;

            match self.registry.remove(instance_id) {
                Some(handle) => {
                    tracing::info!(
                        instance = instance_id,
                        generation = %handle.generation(),
                        "logging out instance session"
                    );
                    handle.shutdown(self.policy.close_timeout).await
                }
                None => {
                    tracing::debug!(instance = instance_id, "logout for unknown instance");
                    Ok(())
                }
            }
        };
        self.registry.release_gate(instance_id);

        if let Err(error) = &result {
            tracing::warn!(instance = instance_id, error = %error, "transport close failed");
        }
        result
    }

    /// Tears the session down and builds a fresh one with a new QR flow.
    ///
    /// `authorize` runs after the settle delay and before recreation.
    pub async fn reset<F, Fut>(
        &self,
        instance_id: &str,
        authorize: F,
    ) -> Result<InstanceHandle, ResetError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), LicenseError>>,
    {
        self.logout(instance_id)
            .await
            .map_err(ResetError::LogoutFailed)?;

        tokio::time::sleep(self.policy.reset_settle).await;
        authorize().await.map_err(ResetError::License)?;

        let handle = self
            .get_or_create(instance_id, true)
            .await
            .map_err(ResetError::RecreateFailed)?;
        tracing::info!(
            instance = instance_id,
            generation = %handle.generation(),
            "instance session reset"
        );
        Ok(handle)
    }

    /// Describes a live session without creating one.
    pub fn status(&self, instance_id: &str) -> Result<StatusSnapshot, ConnectError> {
        self.registry
            .peek(instance_id.trim())
            .map(|handle| describe(&handle))
            .ok_or(ConnectError::NotFound)
    }

    fn prepare(&self, instance_id: &str) -> (InstanceHandle, PendingRunner) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::starting());
        let handle = InstanceHandle::new(instance_id.to_owned(), command_tx, state_rx);
        let pending = PendingRunner {
            client: self.connector.client_for(instance_id),
            commands: command_rx,
            state: state_tx,
        };
        (handle, pending)
    }

    fn launch(&self, handle: &InstanceHandle, pending: PendingRunner) {
        let registry = self.registry.clone();
        let instance_id = handle.instance_id().to_owned();
        let generation = handle.generation();
        let policy = RunnerPolicy {
            handshake_timeout: self.policy.handshake_timeout,
            max_reconnect_attempts: self.policy.max_reconnect_attempts,
        };

        let task = tokio::spawn(async move {
            let PendingRunner {
                client,
                mut commands,
                state,
            } = pending;

            let termination =
                runner::run(&instance_id, client, &state, &mut commands, policy).await;

            registry.retract(&instance_id, generation);
            registry.release_gate(&instance_id);
            state.send_modify(|current| {
                current.transport = TransportState::Closed;
                current.phase = termination.final_phase(&current.phase);
            });
            tracing::info!(
                instance = %instance_id,
                generation = %generation,
                termination = ?termination,
                "instance runner stopped"
            );
        });
        handle.attach_runner(task.abort_handle());
    }
}
