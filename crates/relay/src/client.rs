//! Host and agent sides of the bridge.
//!
//! The host client lives inside the creative application's companion
//! process: it keeps a supervised connection to the relay, re-registering
//! after every drop, and executes commands through a [`CommandHandler`].
//! The agent client issues commands and correlates replies by request id;
//! timeouts are its responsibility, never the relay's.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use atelier_core::{Envelope, Error, Result, Role};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const DEFAULT_BACKOFF: Duration = Duration::from_secs(3);

/// Executes commands delivered to the host role.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &str, payload: Value) -> Result<Value>;
}

/// The embedded side of the bridge. Connects, registers as `host`, and
/// keeps reconnecting with a fixed backoff until shut down.
pub struct HostClient {
    url: String,
    handler: Arc<dyn CommandHandler>,
    backoff: Duration,
}

impl HostClient {
    pub fn new(url: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            url: url.into(),
            handler,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Supervised connection loop. Returns only when the shutdown channel
    /// fires; connection failures are logged and retried without limit.
    pub async fn run_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(url = %self.url, "Host client starting");
        loop {
            tokio::select! {
                result = self.connect_and_run() => {
                    match result {
                        Ok(()) => info!("Host connection closed, reconnecting"),
                        Err(e) => error!(error = %e, "Host connection error, reconnecting"),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {}
                        _ = shutdown.recv() => {
                            info!("Host client shutting down");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Host client shutting down");
                    break;
                }
            }
        }
    }

    async fn connect_and_run(&self) -> Result<()> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Relay(format!("connect failed: {}", e)))?;
        info!(url = %self.url, "Connected to relay");

        let (mut write, mut read) = ws_stream.split();
        send_envelope(&mut write, &Envelope::register(Role::Host)).await?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::Relay(format!("receive failed: {}", e)))?;
            let text = match msg {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let envelope: Envelope = match serde_json::from_str(&text) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed envelope");
                    continue;
                }
            };
            if envelope.target != Role::Host || envelope.is_register() {
                continue;
            }

            let reply = self.execute(envelope).await;
            send_envelope(&mut write, &reply).await?;
        }
        Ok(())
    }

    async fn execute(&self, envelope: Envelope) -> Envelope {
        let id = envelope.id.clone();
        let Some(command) = envelope.command.clone() else {
            return Envelope::error_reply(Role::Agent, id, "missing command");
        };
        let payload = envelope.payload.unwrap_or(Value::Null);

        debug!(command = %command, "Executing host command");
        match self.handler.handle(&command, payload).await {
            Ok(result) => match id {
                Some(id) => Envelope::reply(Role::Agent, id, result),
                None => Envelope {
                    target: Role::Agent,
                    command: None,
                    id: None,
                    payload: Some(result),
                    error: None,
                    extra: serde_json::Map::new(),
                },
            },
            Err(e) => Envelope::error_reply(Role::Agent, id, e.to_string()),
        }
    }
}

async fn send_envelope(write: &mut WsSink, envelope: &Envelope) -> Result<()> {
    let json = serde_json::to_string(envelope)?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::Relay(format!("send failed: {}", e)))
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>;

/// The automation driver's side of the bridge. One outstanding request per
/// generated id; replies are matched by id, everything else is discarded.
pub struct AgentClient {
    sink: Mutex<WsSink>,
    pending: PendingMap,
    reader: JoinHandle<()>,
}

impl AgentClient {
    /// Connect to the relay and register as `agent`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Relay(format!("connect failed: {}", e)))?;
        let (mut write, read) = ws_stream.split();
        send_envelope(&mut write, &Envelope::register(Role::Agent)).await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_replies(read, pending.clone()));

        Ok(Self {
            sink: Mutex::new(write),
            pending,
            reader,
        })
    }

    /// Send a command to the host and wait for the correlated reply.
    /// Commands the host never answers time out here; the relay will not.
    pub async fn request(
        &self,
        command: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Envelope> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = Envelope::command(Role::Host, command, id.clone(), payload);
        {
            let mut sink = self.sink.lock().await;
            if let Err(e) = send_envelope(&mut sink, &envelope).await {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Relay("connection closed while waiting".to_string()))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!("no reply for command '{}'", command)))
            }
        }
    }

    pub async fn close(self) -> Result<()> {
        self.reader.abort();
        let mut sink = self.sink.into_inner();
        let _ = sink.send(WsMessage::Close(None)).await;
        Ok(())
    }
}

async fn read_replies(mut read: WsSource, pending: PendingMap) {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed envelope");
                continue;
            }
        };
        if envelope.target != Role::Agent {
            continue;
        }
        let Some(id) = envelope.id.clone() else {
            debug!("Discarding reply without id");
            continue;
        };
        if let Some(tx) = pending.lock().await.remove(&id) {
            let _ = tx.send(envelope);
        } else {
            debug!(id = %id, "Discarding reply with unknown id");
        }
    }
    // Connection gone: wake every waiter with a closed channel.
    pending.lock().await.clear();
}
