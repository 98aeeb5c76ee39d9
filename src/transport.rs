use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Global counter for CDP message ids. Jobs run sequentially over one
/// session, so ids never collide across targets.
static GLOBAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a unique incremental id for command messages.
pub(crate) fn next_id() -> u64 {
    GLOBAL_ID_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

/// Commands sent to the transport actor.
#[derive(Debug)]
enum TransportMessage {
    /// A CDP command with a response sender.
    Command(Value, oneshot::Sender<Result<Value>>),
    /// Shut the browser down and close the socket.
    Shutdown,
}

/// The wire shape of a CDP command response. Frames without an `id`
/// (protocol events) never deserialize into this and are dropped.
#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<CdpError>,
}

#[derive(Debug, Deserialize)]
struct CdpError {
    code: i64,
    message: String,
}

/// Actor owning the WebSocket and routing responses to pending commands.
struct TransportActor {
    pending: HashMap<u64, oneshot::Sender<Result<Value>>>,
    ws_sink: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    command_rx: mpsc::Receiver<TransportMessage>,
}

impl TransportActor {
    async fn run(mut self, mut ws_stream: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>) {
        loop {
            tokio::select! {
                Some(msg) = ws_stream.next() => {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Ok(response) = serde_json::from_str::<Response>(&text)
                                && let Some(sender) = self.pending.remove(&response.id)
                            {
                                let payload = match response.error {
                                    Some(e) => Err(anyhow!("CDP error {}: {}", e.code, e.message)),
                                    None => Ok(response.result),
                                };
                                let _ = sender.send(payload);
                            }
                        }
                        Err(_) => break,
                        _ => {}
                    }
                }
                Some(msg) = self.command_rx.recv() => {
                    match msg {
                        TransportMessage::Command(cmd, tx) => {
                            if let Some(id) = cmd["id"].as_u64()
                                && let Ok(text) = serde_json::to_string(&cmd)
                            {
                                if self.ws_sink.send(Message::Text(text)).await.is_ok() {
                                    self.pending.insert(id, tx);
                                } else {
                                    let _ = tx.send(Err(anyhow!("WebSocket send failed")));
                                }
                            }
                        }
                        TransportMessage::Shutdown => {
                            let _ = self.ws_sink.send(Message::Text(json!({
                                "id": next_id(),
                                "method": "Browser.close",
                                "params": {}
                            }).to_string())).await;
                            let _ = self.ws_sink.close().await;
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    }
}

/// Asynchronous interface to the Chrome DevTools Protocol over WebSocket.
///
/// Commands carry flat `sessionId` fields, so a single socket serves both
/// browser-level and page-level messages.
#[derive(Debug)]
pub(crate) struct Transport {
    tx: mpsc::Sender<TransportMessage>,
}

impl Transport {
    /// Connects to the DevTools WebSocket URL and spawns the actor.
    pub(crate) async fn new(ws_url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (ws_sink, ws_stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            let actor = TransportActor {
                pending: HashMap::new(),
                ws_sink,
                command_rx: rx,
            };
            actor.run(ws_stream).await;
        });

        Ok(Self { tx })
    }

    /// Sends a command and awaits its `result` payload.
    pub(crate) async fn send(&self, command: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(TransportMessage::Command(command, tx))
            .await
            .map_err(|_| anyhow!("Transport actor dropped"))?;
        time::timeout(Duration::from_secs(30), rx)
            .await
            .map_err(|_| anyhow!("Timeout waiting for CDP response"))?
            .map_err(|_| anyhow!("Response channel closed"))?
    }

    /// Initiates a graceful shutdown of browser and socket.
    pub(crate) async fn shutdown(&self) {
        let _ = self.tx.send(TransportMessage::Shutdown).await;
    }
}
