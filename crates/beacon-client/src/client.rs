//! The connection task and its handle.
//!
//! [`BeaconClient::spawn`] starts one task that owns the socket. It
//! reconnects with [`Backoff`] whenever the connection drops and reports
//! what happens as [`Notice`]s. Frames queued with [`BeaconClient::emit`]
//! while disconnected are sent once a connection is up again.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use beacon_types::ServerFrame;

use crate::backoff::Backoff;
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the outbound and notice queues.
const QUEUE_CAPACITY: usize = 256;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker endpoint, e.g. `ws://127.0.0.1:8081/ws`.
    pub url: String,
    /// Bearer token sent in the `Authorization` header.
    pub token: Option<String>,
    /// Reconnect policy.
    pub backoff: Backoff,
}

impl ClientConfig {
    /// Connect to `url` without a token, retrying forever.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            backoff: Backoff::default(),
        }
    }

    fn request(&self) -> Result<Request<()>, ClientError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::Config(format!("token is not a valid header: {e}")))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        Ok(request)
    }
}

/// What the connection task reports.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A connection is up.
    Connected,
    /// A frame arrived from the broker.
    Frame(ServerFrame),
    /// The connection dropped; a reconnect follows unless retries are spent.
    Disconnected(String),
    /// The retry limit was reached; the task has stopped.
    GaveUp,
}

/// Handle to a running client.
#[derive(Debug)]
pub struct BeaconClient {
    outbound: mpsc::Sender<Value>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl BeaconClient {
    /// Start the connection task.
    ///
    /// Fails only when the configuration cannot form a request; connection
    /// failures are retried and reported as [`Notice`]s.
    pub fn spawn(config: ClientConfig) -> Result<(Self, mpsc::Receiver<Notice>), ClientError> {
        config.request()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (notice_tx, notice_rx) = mpsc::channel(QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let connection = Connection {
            backoff: config.backoff.clone(),
            config,
            outbound: outbound_rx,
            notices: notice_tx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(connection.run());
        let client = Self {
            outbound: outbound_tx,
            shutdown,
            task,
        };
        Ok((client, notice_rx))
    }

    /// Queue an event for the broker.
    pub async fn emit(&self, event: &str, data: Value) -> Result<(), ClientError> {
        self.outbound
            .send(json!({ "event": event, "data": data }))
            .await
            .map_err(|e| {
                debug!(error = %e, "emit after client stopped");
                ClientError::Closed
            })
    }

    /// Close the connection and stop reconnecting.
    pub async fn close(self) {
        self.shutdown.cancel();
        if let Err(err) = self.task.await {
            warn!(error = %err, "client task failed");
        }
    }
}

/// Why a connection ended.
enum Ended {
    /// The socket dropped; reconnect.
    Dropped(String),
    /// The owner closed the client, or stopped listening.
    Stopped,
}

struct Connection {
    config: ClientConfig,
    backoff: Backoff,
    outbound: mpsc::Receiver<Value>,
    notices: mpsc::Sender<Notice>,
    shutdown: CancellationToken,
}

impl Connection {
    async fn run(mut self) {
        loop {
            let request = match self.config.request() {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "cannot build handshake request");
                    return;
                }
            };
            let attempt = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                attempt = connect_async(request) => attempt,
            };
            let reason = match attempt {
                Ok((ws, _response)) => {
                    info!(url = %self.config.url, "connected to broker");
                    self.backoff.reset();
                    if self.notices.send(Notice::Connected).await.is_err() {
                        return;
                    }
                    match self.serve(ws).await {
                        Ended::Stopped => return,
                        Ended::Dropped(reason) => reason,
                    }
                }
                Err(err) => err.to_string(),
            };

            if self.notices.send(Notice::Disconnected(reason.clone())).await.is_err() {
                return;
            }
            let Some(delay) = self.backoff.next_delay() else {
                warn!(attempts = self.backoff.attempts(), %reason, "giving up on broker");
                if self.notices.send(Notice::GaveUp).await.is_err() {
                    debug!("notice receiver already dropped");
                }
                return;
            };
            debug!(delay_ms = delay.as_millis(), %reason, "reconnecting");
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump one live connection. Pings are answered by the protocol layer.
    async fn serve(&mut self, ws: WsStream) -> Ended {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    if let Err(err) = sink.send(Message::Close(None)).await {
                        debug!(error = %err, "close frame not sent");
                    }
                    return Ended::Stopped;
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else { return Ended::Stopped };
                    if let Err(err) = sink.send(Message::Text(frame.to_string().into())).await {
                        return Ended::Dropped(err.to_string());
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(frame) => {
                                if self.notices.send(Notice::Frame(frame)).await.is_err() {
                                    return Ended::Stopped;
                                }
                            }
                            Err(err) => warn!(error = %err, "unreadable frame from broker"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "closed by broker".to_owned(),
                            |f| {
                                let code = u16::from(f.code);
                                format!("closed by broker: {code} {}", f.reason.as_str())
                            },
                        );
                        return Ended::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Ended::Dropped(err.to_string()),
                    None => return Ended::Dropped("connection reset".to_owned()),
                },
            }
        }
    }
}
