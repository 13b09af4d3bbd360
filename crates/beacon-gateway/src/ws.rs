//! `WebSocket` transport for broker sessions.
//!
//! `GET /ws` authenticates the upgrade request before accepting it, so a
//! refused client gets an HTTP error instead of a socket that closes at once.
//! Each accepted socket runs [`run_session`]: one task that drains the
//! session's outbound queue and feeds inbound text frames to the broker.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, HeaderName, header};
use axum::response::{IntoResponse, Response};
use beacon_core::{Broker, CredentialSources, SessionSignal};
use beacon_types::{DisconnectReason, Identity};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::extract::{ClientAddr, Params};
use crate::state::AppState;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Bearer token, for clients that cannot set headers.
    #[serde(default)]
    pub token: Option<String>,
}

/// Authenticate and upgrade a connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_connect(
    State(state): State<Arc<AppState>>,
    ClientAddr(addr): ClientAddr,
    Params(params): Params<ConnectParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    let credentials = CredentialSources {
        query: params.token,
        authorization: header_value(&headers, &header::AUTHORIZATION),
        protocol: header_value(&headers, &header::SEC_WEBSOCKET_PROTOCOL),
    };
    let identity = state.broker.admit(addr, &credentials)?;
    let mut upgrade =
        upgrade.map_err(|rejection| GatewayError::BadRequest(rejection.body_text()))?;
    if credentials.protocol.is_some() {
        upgrade = upgrade.protocols(["bearer"]);
    }

    let broker = Arc::clone(&state.broker);
    Ok(upgrade
        .on_upgrade(move |socket| run_session(socket, broker, identity))
        .into_response())
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Close code sent when the broker ends a session.
const fn close_code(reason: DisconnectReason) -> u16 {
    match reason {
        DisconnectReason::ServerShutdown => 1001,
        DisconnectReason::SlowConsumer => 1008,
        DisconnectReason::TransportClosed | DisconnectReason::HeartbeatTimeout => 1000,
    }
}

/// Pump one session until either side ends it.
pub async fn run_session(mut socket: WebSocket, broker: Arc<Broker>, identity: Identity) {
    let mut handle = broker.connect(identity);
    let session = handle.id;

    let reason = loop {
        tokio::select! {
            signal = handle.outbound.recv() => match signal {
                Some(SessionSignal::Deliver(frame)) => {
                    let json = match serde_json::to_string(&*frame) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(
                                session_id = %session,
                                event = %frame.event,
                                error = %err,
                                "frame not serializable"
                            );
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break DisconnectReason::TransportClosed;
                    }
                }
                Some(SessionSignal::Probe) => {
                    if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                        break DisconnectReason::TransportClosed;
                    }
                }
                Some(SessionSignal::Close(reason)) => {
                    let frame = CloseFrame {
                        code: close_code(reason),
                        reason: Utf8Bytes::from_static(reason.as_str()),
                    };
                    if let Err(err) = socket.send(Message::Close(Some(frame))).await {
                        debug!(session_id = %session, error = %err, "close frame not sent");
                    }
                    break reason;
                }
                None => break DisconnectReason::TransportClosed,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => broker.handle_frame(session, text.as_str()),
                Some(Ok(Message::Pong(_))) => broker.sessions().acknowledge_probe(session),
                Some(Ok(Message::Ping(_) | Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::TransportClosed,
                Some(Err(err)) => {
                    debug!(session_id = %session, error = %err, "socket error");
                    break DisconnectReason::TransportClosed;
                }
            },
        }
    };

    broker.disconnect(session, reason);
}
