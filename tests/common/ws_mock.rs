#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

pub struct WsTestServer {
    pub url: String,
    task: JoinHandle<anyhow::Result<()>>,
}

impl WsTestServer {
    pub async fn finish(self) -> anyhow::Result<()> {
        self.task.await??;
        Ok(())
    }
}

pub async fn start_single_client_server<H, F>(handler: H) -> anyhow::Result<WsTestServer>
where
    H: FnOnce(WebSocketStream<TcpStream>) -> F + Send + 'static,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let websocket = accept_async(stream).await?;
        handler(websocket).await
    });

    Ok(WsTestServer {
        url: format!("ws://{addr}"),
        task,
    })
}

/// Reads the next text frame as JSON, skipping control frames.
pub async fn read_json(ws: &mut WebSocketStream<TcpStream>) -> anyhow::Result<serde_json::Value> {
    loop {
        let Some(message) = ws.next().await else {
            anyhow::bail!("client closed the websocket");
        };
        match message? {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("unexpected frame: {other:?}"),
        }
    }
}

/// TCP listener that accepts connections and never answers the websocket upgrade.
pub struct SilentServer {
    pub url: String,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl SilentServer {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start_silent_server() -> anyhow::Result<SilentServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    let task = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            open.push(stream);
        }
    });

    Ok(SilentServer {
        url: format!("ws://{addr}/instances"),
        accepted,
        task,
    })
}
