//! Integration routes for responders, under `/api/external/responders`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use beacon_core::sanitize::strip_tags;
use beacon_core::{BrokerError, NearbySearch};
use beacon_types::{
    IncidentId, IncidentStatus, LocationUpdate, ResponderId, ResponderStatus, ResponderType,
    Severity,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::extract::{Params, Payload};
use crate::state::AppState;

/// Body of `POST /api/external/responders/{id}/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBody {
    /// New availability.
    pub status: ResponderStatus,
    /// Incident the change relates to.
    #[serde(default)]
    pub incident_id: Option<IncidentId>,
}

/// `POST /api/external/responders/{id}/status`
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<StatusBody>,
) -> Result<Json<Value>, GatewayError> {
    let responder = ResponderId::from(id);
    let entry = state
        .broker
        .set_responder_status(&responder, body.status, body.incident_id)?;
    Ok(Json(json!({
        "success": true,
        "responderId": responder,
        "status": body.status,
        "entry": entry,
        "message": "Responder status updated",
    })))
}

/// Body of `POST /api/external/responders/{id}/location`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationBody {
    /// The position report.
    #[serde(flatten)]
    pub update: LocationUpdate,
    /// Kind of unit, when the backend knows it.
    #[serde(default, rename = "type", alias = "responderType")]
    pub responder_type: Option<ResponderType>,
}

/// `POST /api/external/responders/{id}/location`
pub async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<LocationBody>,
) -> Result<Json<Value>, GatewayError> {
    let responder = ResponderId::from(id);
    let entry = state
        .broker
        .record_location(&responder, body.responder_type, &body.update)?;
    Ok(Json(json!({
        "success": true,
        "location": entry,
        "message": "Location updated",
    })))
}

/// Query of `GET /api/external/responders/nearby`.
#[derive(Debug, Default, Deserialize)]
pub struct NearbyParams {
    /// Query point latitude.
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    /// Query point longitude.
    #[serde(default, alias = "lon", alias = "longitude")]
    pub lng: Option<f64>,
    /// Radius in meters.
    #[serde(default)]
    pub radius: Option<f64>,
    /// Only responders of this kind.
    #[serde(default, rename = "type")]
    pub responder_type: Option<ResponderType>,
}

/// `GET /api/external/responders/nearby`
pub async fn nearby(
    State(state): State<Arc<AppState>>,
    Params(params): Params<NearbyParams>,
) -> Result<Json<Value>, GatewayError> {
    let (Some(latitude), Some(longitude)) = (params.lat, params.lng) else {
        return Err(
            BrokerError::invalid("latitude", "Latitude and longitude are required").into(),
        );
    };
    let search = NearbySearch {
        latitude,
        longitude,
        radius_m: params.radius,
        responder_type: params.responder_type,
    };
    let responders = state.broker.responders().nearest(search)?;
    Ok(Json(json!({
        "responders": responders,
        "count": responders.len(),
        "searchCenter": { "latitude": latitude, "longitude": longitude },
        "radius": params.radius.unwrap_or(state.broker.config().location.default_radius_m),
    })))
}

/// Query of `GET /api/external/responders/active`.
#[derive(Debug, Default, Deserialize)]
pub struct ActiveParams {
    /// Only responders of this kind.
    #[serde(default, rename = "type")]
    pub responder_type: Option<ResponderType>,
    /// Only responders with this status.
    #[serde(default)]
    pub status: Option<ResponderStatus>,
}

/// `GET /api/external/responders/active`
pub async fn list_active(
    State(state): State<Arc<AppState>>,
    Params(params): Params<ActiveParams>,
) -> Json<Value> {
    let responders: Vec<_> = state
        .broker
        .responders()
        .all()
        .into_iter()
        .filter(|r| params.responder_type.is_none_or(|t| r.responder_type == Some(t)))
        .filter(|r| params.status.is_none_or(|s| r.status == s))
        .collect();
    Json(json!({
        "responders": responders,
        "count": responders.len(),
        "timestamp": chrono::Utc::now(),
    }))
}

/// `GET /api/external/responders/{id}`
pub async fn details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let responder = ResponderId::from(id);
    let entry = state
        .broker
        .responders()
        .get(&responder)
        .ok_or_else(|| BrokerError::responder_not_found(&responder))?;
    Ok(Json(json!({ "responder": entry })))
}

/// Body of the responder messaging routes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    /// Text to deliver.
    #[serde(default)]
    pub message: String,
    /// Urgency.
    #[serde(default)]
    pub priority: Option<Severity>,
    /// Sender shown to the unit.
    #[serde(default)]
    pub from: Option<String>,
    /// Broadcast only: restrict to one kind of unit.
    #[serde(default, rename = "type", alias = "responderType")]
    pub responder_type: Option<ResponderType>,
}

/// `POST /api/external/responders/{id}/message`
pub async fn message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<MessageBody>,
) -> Result<Json<Value>, GatewayError> {
    let responder = ResponderId::from(id);
    let from = body.from.unwrap_or_else(|| "Command Center".to_owned());
    let delivery = state.broker.message_responder(
        &responder,
        &strip_tags(&body.message),
        body.priority,
        &from,
    )?;
    Ok(Json(json!({
        "success": true,
        "delivered": delivery.delivered > 0,
        "message": "Message sent to responder",
    })))
}

/// `POST /api/external/responders/broadcast`
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    Payload(body): Payload<MessageBody>,
) -> Result<Json<Value>, GatewayError> {
    let delivery = state.broker.broadcast_to_responders(
        body.responder_type,
        &strip_tags(&body.message),
        body.priority,
    )?;
    let target = body
        .responder_type
        .map_or_else(|| "ALL".to_owned(), |t| t.to_string());
    Ok(Json(json!({
        "success": true,
        "targetType": target,
        "recipients": delivery.delivered,
        "message": "Broadcast sent to responders",
    })))
}

/// Body of `POST /api/external/responders/emergency-recall`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallBody {
    /// Why units are recalled.
    #[serde(default)]
    pub reason: Option<String>,
    /// Urgency; CRITICAL when absent.
    #[serde(default)]
    pub priority: Option<Severity>,
    /// Who ordered the recall.
    #[serde(default)]
    pub issued_by: Option<String>,
}

/// `POST /api/external/responders/emergency-recall`
pub async fn emergency_recall(
    State(state): State<Arc<AppState>>,
    Payload(body): Payload<RecallBody>,
) -> Json<Value> {
    let by = body.issued_by.unwrap_or_else(|| "system".to_owned());
    let reason = body.reason.map(|r| strip_tags(&r));
    let (recall, delivery) = state.broker.emergency_recall(reason, body.priority, &by);
    Json(json!({
        "success": true,
        "recall": recall,
        "recipients": delivery.delivered,
        "message": "Emergency recall issued to all responders",
    }))
}

/// Query of `GET /api/external/responders/{id}/assignments`.
#[derive(Debug, Default, Deserialize)]
pub struct AssignmentParams {
    /// Only incidents in this status.
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    /// At most this many; 10 when absent.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /api/external/responders/{id}/assignments`
pub async fn assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Params(params): Params<AssignmentParams>,
) -> Json<Value> {
    let responder = ResponderId::from(id);
    let limit = params.limit.unwrap_or(10).min(100);
    let incidents = state
        .broker
        .responder_assignments(&responder, params.status, limit);
    Json(json!({
        "responderId": responder,
        "assignments": incidents,
        "count": incidents.len(),
    }))
}
