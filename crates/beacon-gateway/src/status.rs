//! Status pages, statistics and the generic broadcast route.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::Html;
use beacon_core::Topic;
use beacon_types::{ResponderStatus, Severity};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::extract::Payload;
use crate::state::AppState;

/// `GET /` -- minimal HTML status page.
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let stats = state.broker.statistics();
    Html(format!(
        "<!DOCTYPE html>\
         <html><head><title>Beacon</title></head>\
         <body>\
         <h1>Beacon</h1>\
         <p>Emergency coordination broker v{}</p>\
         <p>Sessions: {} | Active incidents: {} | Responders online: {}</p>\
         <p>WebSocket: <code>/ws</code> | API: <code>/api/statistics</code></p>\
         </body></html>",
        stats.version, stats.connected_users, stats.active_incidents, stats.online_responders,
    ))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime": state.broker.uptime_seconds(),
        "connections": state.broker.sessions().len(),
        "cache": state.cache_status(),
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /api/statistics`
pub async fn statistics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.broker.statistics()))
}

/// `GET /api/connected-users`
pub async fn connected_users(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.broker.sessions().connected_users()))
}

/// `GET /api/websocket/status`
pub async fn websocket_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let rooms: Vec<Value> = state
        .broker
        .sessions()
        .topics()
        .into_iter()
        .map(|(topic, connections)| {
            json!({ "room": topic.to_string(), "connections": connections })
        })
        .collect();
    let heartbeat = &state.broker.config().heartbeat;
    Json(json!({
        "totalConnections": state.broker.sessions().len(),
        "rooms": rooms,
        "server": {
            "transports": ["websocket"],
            "pingIntervalSecs": heartbeat.interval().as_secs(),
        },
    }))
}

/// `GET /api/emergency/status`
pub async fn emergency_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let broker = &state.broker;
    Json(json!({
        "isEmergencyMode": broker.config().session.emergency_mode,
        "criticalIncidents": broker.incidents().count_severity(Severity::Critical),
        "availableResponders": broker
            .responders()
            .count_status(ResponderStatus::Available),
        "systemHealth": {
            "cache": state.cache_status(),
            "connections": broker.sessions().len(),
            "uptime": broker.uptime_seconds(),
        },
    }))
}

/// `POST /api/auth/guest` -- a short-lived citizen token.
pub async fn guest_token(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let (identity, token) = state.broker.auth().issue_guest()?;
    tracing::info!(user_id = %identity.id, "guest token issued");
    Ok(Json(json!({
        "token": token,
        "user": identity,
        "expiresIn": state.broker.config().auth.guest_token_ttl_secs,
    })))
}

/// Body of `POST /api/broadcast`.
#[derive(Debug, Default, Deserialize)]
pub struct BroadcastBody {
    /// Event name to emit.
    #[serde(default)]
    pub event: String,
    /// Payload; objects are stamped, anything else is wrapped.
    #[serde(default)]
    pub data: Value,
    /// Topic to address, e.g. `incident:<id>` or `role:responder`; every
    /// session when absent.
    #[serde(default)]
    pub room: Option<String>,
    /// Urgency; MEDIUM when absent.
    #[serde(default)]
    pub priority: Option<Severity>,
}

/// `POST /api/broadcast`
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    Payload(body): Payload<BroadcastBody>,
) -> Result<Json<Value>, GatewayError> {
    let topic = body
        .room
        .as_deref()
        .map(Topic::from_str)
        .transpose()
        .map_err(|err| GatewayError::BadRequest(err.to_string()))?;
    let delivery =
        state
            .broker
            .external_broadcast(&body.event, body.data, topic.as_ref(), body.priority)?;
    Ok(Json(json!({
        "success": true,
        "recipients": delivery.delivered,
    })))
}
