#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use waziper_gateway::wa::{
    AccountInfo, GroupInfo, OutgoingMessage, ProtocolClient, ProtocolConnector, ProtocolError,
    ProtocolEvent, TransportError, TransportState,
};

pub const ACCOUNT_JID: &str = "5511999999999@s.whatsapp.net";
pub const GROUP_JID: &str = "120363000000000000@g.us";
pub const MESSAGE_ID: &str = "3EB0FAKE0001";

#[derive(Default)]
struct FakeInner {
    connects: AtomicUsize,
    closes: AtomicUsize,
    failing_connects: AtomicUsize,
    hang_close: AtomicBool,
    connect_delay: Mutex<Duration>,
    sent: Mutex<Vec<OutgoingMessage>>,
    events: Mutex<HashMap<String, mpsc::Sender<ProtocolEvent>>>,
}

/// Scripted protocol connector. Every successful connect immediately issues
/// the QR payload `"{instance}-qr-{connect number}"`.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<FakeInner>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        if let Ok(mut current) = self.inner.connect_delay.lock() {
            *current = delay;
        }
        self
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn hang_on_close(&self, hang: bool) {
        self.inner.hang_close.store(hang, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.inner
            .sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Pushes a protocol event to the live connection of an instance.
    pub async fn emit(&self, instance_id: &str, event: ProtocolEvent) -> anyhow::Result<()> {
        let sender = self
            .inner
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("event table poisoned"))?
            .get(instance_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no live connection for {instance_id}"))?;
        sender.send(event).await?;
        Ok(())
    }

    pub async fn authenticate(&self, instance_id: &str) -> anyhow::Result<()> {
        self.emit(
            instance_id,
            ProtocolEvent::Authenticated(AccountInfo {
                id: ACCOUNT_JID.to_owned(),
                name: Some("Fake Account".to_owned()),
            }),
        )
        .await
    }
}

impl ProtocolConnector for FakeConnector {
    fn client_for(&self, instance_id: &str) -> Box<dyn ProtocolClient> {
        Box::new(FakeClient {
            instance_id: instance_id.to_owned(),
            inner: self.inner.clone(),
            state: TransportState::Closed,
        })
    }
}

struct FakeClient {
    instance_id: String,
    inner: Arc<FakeInner>,
    state: TransportState,
}

impl FakeClient {
    fn take_failure(&self) -> bool {
        self.inner
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl ProtocolClient for FakeClient {
    fn connect(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<ProtocolEvent>, TransportError>> {
        Box::pin(async move {
            let attempt = self.inner.connects.fetch_add(1, Ordering::SeqCst) + 1;
            self.state = TransportState::Connecting;

            let delay = self
                .inner
                .connect_delay
                .lock()
                .map(|delay| *delay)
                .unwrap_or_default();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if self.take_failure() {
                self.state = TransportState::Closed;
                return Err(TransportError::Rejected("scripted connect failure".to_owned()));
            }

            let (event_tx, event_rx) = mpsc::channel(16);
            event_tx
                .send(ProtocolEvent::QrCode(format!("{}-qr-{attempt}", self.instance_id)))
                .await
                .map_err(|_| TransportError::Closed)?;
            if let Ok(mut events) = self.inner.events.lock() {
                events.insert(self.instance_id.clone(), event_tx);
            }

            self.state = TransportState::Open;
            Ok(event_rx)
        })
    }

    fn transport_state(&self) -> TransportState {
        self.state
    }

    fn account_info(&mut self) -> BoxFuture<'_, Result<AccountInfo, ProtocolError>> {
        Box::pin(async move {
            Ok(AccountInfo {
                id: ACCOUNT_JID.to_owned(),
                name: Some("Fake Account".to_owned()),
            })
        })
    }

    fn fetch_groups(&mut self) -> BoxFuture<'_, Result<Vec<GroupInfo>, ProtocolError>> {
        Box::pin(async move {
            Ok(vec![GroupInfo {
                id: GROUP_JID.to_owned(),
                subject: "Fake group".to_owned(),
                participants: vec![ACCOUNT_JID.to_owned()],
            }])
        })
    }

    fn send_message<'a>(
        &'a mut self,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, Result<String, ProtocolError>> {
        Box::pin(async move {
            if let Ok(mut sent) = self.inner.sent.lock() {
                sent.push(message.clone());
            }
            Ok(MESSAGE_ID.to_owned())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
            if self.inner.hang_close.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            if let Ok(mut events) = self.inner.events.lock() {
                events.remove(&self.instance_id);
            }
            self.state = TransportState::Closed;
            Ok(())
        })
    }
}
