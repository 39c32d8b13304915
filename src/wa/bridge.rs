use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use futures::{
    SinkExt, StreamExt,
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use crate::wa::{
    client::{ProtocolClient, ProtocolConnector, TransportState},
    error::{ProtocolError, TransportError},
    events::ProtocolEvent,
    types::{AccountInfo, GroupInfo, OutgoingMessage},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<BridgeReply>>>>;

const EVENT_BUFFER: usize = 64;

/// Frames pushed by the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Qr {
        qr: String,
    },
    QrExpired,
    Authenticated {
        user: AccountInfo,
    },
    LoggedOut,
    Response {
        id: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        error: Option<String>,
    },
}

impl Inbound {
    fn into_event(self) -> Option<ProtocolEvent> {
        match self {
            Self::Qr { qr } => Some(ProtocolEvent::QrCode(qr)),
            Self::QrExpired => Some(ProtocolEvent::QrExpired),
            Self::Authenticated { user } => Some(ProtocolEvent::Authenticated(user)),
            Self::LoggedOut => Some(ProtocolEvent::LoggedOut),
            Self::Response { .. } => None,
        }
    }
}

/// Frames sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Request {
        id: &'a str,
        op: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'a OutgoingMessage>,
    },
    Logout,
}

#[derive(Debug)]
struct BridgeReply {
    data: Value,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendReceipt {
    message_id: String,
}

/// Builds the per-instance bridge endpoint (`{base}/{instance_id}`).
pub fn instance_endpoint(base: &Url, instance_id: &str) -> Result<Url, TransportError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| TransportError::InvalidEndpoint(base.to_string()))?;
        segments.pop_if_empty().push(instance_id);
    }
    Ok(url)
}

/// Connector that reaches the protocol bridge over JSON websocket frames.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    base_url: Url,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(base_url: Url, request_timeout: Duration) -> Self {
        Self {
            base_url,
            request_timeout,
        }
    }
}

impl ProtocolConnector for BridgeConnector {
    fn client_for(&self, instance_id: &str) -> Box<dyn ProtocolClient> {
        let endpoint = match instance_endpoint(&self.base_url, instance_id) {
            Ok(endpoint) => Some(endpoint),
            Err(error) => {
                tracing::warn!(instance = instance_id, %error, "cannot build bridge endpoint");
                None
            }
        };

        Box::new(BridgeClient::new(
            instance_id.to_owned(),
            endpoint,
            self.request_timeout,
        ))
    }
}

/// Client for one instance session on the protocol bridge.
pub struct BridgeClient {
    instance_id: String,
    endpoint: Option<Url>,
    request_timeout: Duration,
    sink: Option<SplitSink<WsStream, Message>>,
    pending: PendingReplies,
    transport: Arc<AtomicU8>,
    reader: Option<JoinHandle<()>>,
}

impl BridgeClient {
    pub fn new(instance_id: String, endpoint: Option<Url>, request_timeout: Duration) -> Self {
        Self {
            instance_id,
            endpoint,
            request_timeout,
            sink: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            transport: Arc::new(AtomicU8::new(TransportState::Closed.to_u8())),
            reader: None,
        }
    }

    fn set_transport(&self, state: TransportState) {
        self.transport.store(state.to_u8(), Ordering::Release);
    }

    async fn open(&mut self) -> Result<mpsc::Receiver<ProtocolEvent>, TransportError> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| TransportError::InvalidEndpoint(self.instance_id.clone()))?;

        self.set_transport(TransportState::Connecting);
        let (stream, response) = match connect_async(endpoint.as_str()).await {
            Ok(connected) => connected,
            Err(error) => {
                self.set_transport(TransportState::Closed);
                return Err(TransportError::Connect(error));
            }
        };
        tracing::debug!(
            instance = %self.instance_id,
            status = response.status().as_u16(),
            "bridge websocket upgrade completed"
        );

        let (sink, source) = stream.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        self.sink = Some(sink);
        self.set_transport(TransportState::Open);
        self.reader = Some(tokio::spawn(read_loop(
            self.instance_id.clone(),
            source,
            event_tx,
            self.pending.clone(),
            self.transport.clone(),
        )));

        Ok(event_rx)
    }

    async fn request<T: DeserializeOwned>(
        &mut self,
        op: &'static str,
        message: Option<&OutgoingMessage>,
    ) -> Result<T, ProtocolError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(ProtocolError::NotConnected);
        };

        let id = Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&Outbound::Request {
            id: &id,
            op,
            message,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), reply_tx);

        if let Err(error) = sink.send(Message::Text(frame.into())).await {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::from(error).into());
        }

        let reply = match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(TransportError::Closed.into()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ProtocolError::Timeout);
            }
        };

        if let Some(error) = reply.error {
            return Err(ProtocolError::Remote(error));
        }
        Ok(serde_json::from_value(reply.data)?)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        let Some(mut sink) = self.sink.take() else {
            self.set_transport(TransportState::Closed);
            return Ok(());
        };

        self.set_transport(TransportState::Closing);
        let result = match serde_json::to_string(&Outbound::Logout) {
            Ok(frame) => sink.send(Message::Text(frame.into())).await,
            Err(error) => {
                tracing::warn!(instance = %self.instance_id, %error, "failed to encode logout frame");
                Ok(())
            }
        };
        let closed = sink.close().await;

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.pending.lock().await.clear();
        self.set_transport(TransportState::Closed);

        result?;
        closed?;
        Ok(())
    }
}

impl ProtocolClient for BridgeClient {
    fn connect(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<ProtocolEvent>, TransportError>> {
        Box::pin(self.open())
    }

    fn transport_state(&self) -> TransportState {
        TransportState::from_u8(self.transport.load(Ordering::Acquire))
    }

    fn account_info(&mut self) -> BoxFuture<'_, Result<AccountInfo, ProtocolError>> {
        Box::pin(self.request("account_info", None))
    }

    fn fetch_groups(&mut self) -> BoxFuture<'_, Result<Vec<GroupInfo>, ProtocolError>> {
        Box::pin(self.request("fetch_groups", None))
    }

    fn send_message<'a>(
        &'a mut self,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, Result<String, ProtocolError>> {
        Box::pin(async move {
            let receipt: SendReceipt = self.request("send_message", Some(message)).await?;
            Ok(receipt.message_id)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.shutdown())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    instance_id: String,
    mut source: SplitStream<WsStream>,
    events: mpsc::Sender<ProtocolEvent>,
    pending: PendingReplies,
    transport: Arc<AtomicU8>,
) {
    let reason = loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(error)) => break format!("websocket error: {error}"),
            None => break "bridge stream ended".to_owned(),
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<Inbound>(&text) {
                Ok(Inbound::Response { id, data, error }) => {
                    match pending.lock().await.remove(&id) {
                        Some(reply_tx) => {
                            let _ = reply_tx.send(BridgeReply { data, error });
                        }
                        None => {
                            tracing::debug!(instance = %instance_id, request_id = %id, "reply for unknown request");
                        }
                    }
                }
                Ok(frame) => {
                    let Some(event) = frame.into_event() else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(instance = %instance_id, %error, "ignoring malformed bridge frame");
                }
            },
            Message::Close(frame) => {
                tracing::warn!(instance = %instance_id, ?frame, "bridge closed connection");
                break "closed by bridge".to_owned();
            }
            _ => continue,
        }
    };

    transport.store(TransportState::Closed.to_u8(), Ordering::Release);
    pending.lock().await.clear();
    let _ = events.send(ProtocolEvent::Disconnected { reason }).await;
}
