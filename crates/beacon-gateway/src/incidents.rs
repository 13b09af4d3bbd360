//! Integration routes for incidents, under `/api/external/incidents`.
//!
//! These are how a dispatch backend feeds the broker. Every change made here
//! is broadcast to connected sessions exactly as if it had arrived over a
//! socket.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use beacon_core::sanitize::{Sanitize, strip_tags};
use beacon_core::{Reporter, Topic};
use beacon_types::{
    ActiveIncidentsQuery, AlertAudience, CreateIncident, EmergencyAlertRequest, IncidentId,
    IncidentStatus, NotificationKind, ReportSource, ResponderId, Severity,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::extract::{Params, Payload};
use crate::state::AppState;

/// Actor name recorded for changes made through these routes.
const BACKEND: &str = "external_api";

/// Parse an incident id from a path segment.
pub(crate) fn parse_incident_id(raw: &str) -> Result<IncidentId, GatewayError> {
    raw.parse()
        .map_err(|err| GatewayError::BadRequest(format!("Invalid incident id '{raw}': {err}")))
}

/// `POST /api/external/incidents`
pub async fn create(
    State(state): State<Arc<AppState>>,
    Payload(mut data): Payload<CreateIncident>,
) -> Result<(StatusCode, Json<Value>), GatewayError> {
    data.sanitize();
    let incident = state.broker.report_incident(
        data,
        Reporter {
            user: None,
            source: ReportSource::Backend,
        },
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "incident": incident,
            "message": "Incident created and broadcasted",
        })),
    ))
}

/// `GET /api/external/incidents/active`
pub async fn list_active(
    State(state): State<Arc<AppState>>,
    Params(query): Params<ActiveIncidentsQuery>,
) -> Result<Json<Value>, GatewayError> {
    let page = state.broker.incidents().list(&query)?;
    Ok(Json(json!(page)))
}

/// `GET /api/external/incidents/{id}`
pub async fn details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let incident = state.broker.incidents().get(parse_incident_id(&id)?)?;
    Ok(Json(json!({ "incident": incident })))
}

/// Body of `POST /api/external/incidents/{id}/update`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    /// New status.
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    /// Free-text update, stored as the incident notes.
    #[serde(default)]
    pub message: Option<String>,
    /// New severity.
    #[serde(default)]
    pub priority: Option<Severity>,
}

/// `POST /api/external/incidents/{id}/update`
pub async fn post_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<UpdateBody>,
) -> Result<Json<Value>, GatewayError> {
    let id = parse_incident_id(&id)?;
    let message = body.message.map(|m| strip_tags(&m));
    let delivery = state
        .broker
        .post_incident_update(id, body.status, message, body.priority)?;
    Ok(Json(json!({
        "success": true,
        "message": "Incident update broadcasted",
        "subscriberCount": state.broker.sessions().subscriber_count(&Topic::Incident(id)),
        "recipients": delivery.delivered,
    })))
}

/// Body of `POST /api/external/incidents/{id}/assign`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    /// Units to assign.
    #[serde(default)]
    pub responder_ids: Vec<ResponderId>,
    /// Urgency passed on to the units.
    #[serde(default)]
    pub priority: Option<Severity>,
    /// Estimated minutes to arrival.
    #[serde(default)]
    pub estimated_arrival: Option<u32>,
}

/// `POST /api/external/incidents/{id}/assign`
pub async fn assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<AssignBody>,
) -> Result<Json<Value>, GatewayError> {
    let id = parse_incident_id(&id)?;
    let (_, assignment) = state.broker.assign_responders(
        id,
        &body.responder_ids,
        body.priority,
        body.estimated_arrival,
        BACKEND,
    )?;
    Ok(Json(json!({
        "success": true,
        "assignment": assignment,
        "message": "Responders assigned successfully",
    })))
}

/// Body of `POST /api/external/incidents/{id}/alert`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBody {
    /// Text shown to recipients.
    #[serde(default)]
    pub message: String,
    /// Alert kind.
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    /// Urgency; HIGH when absent.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Recipients; everyone when absent.
    #[serde(default)]
    pub target_audience: Option<AlertAudience>,
    /// Minutes until recipients may dismiss it.
    #[serde(default)]
    pub expires_in_minutes: Option<u32>,
}

/// `POST /api/external/incidents/{id}/alert`
pub async fn alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<AlertBody>,
) -> Result<Json<Value>, GatewayError> {
    let id = parse_incident_id(&id)?;
    // Alerts only go out for incidents the broker knows about.
    state.broker.incidents().get(id)?;

    let mut request = EmergencyAlertRequest {
        kind: body.kind,
        message: body.message,
        severity: body.severity.unwrap_or(Severity::High),
        target_audience: body.target_audience.unwrap_or(AlertAudience::All),
        incident_id: Some(id),
        expires_in_minutes: body.expires_in_minutes,
    };
    request.sanitize();
    let (alert, delivery) = state.broker.issue_alert(request, BACKEND)?;
    Ok(Json(json!({
        "success": true,
        "alert": alert,
        "recipients": delivery.delivered,
        "message": "Emergency alert sent",
    })))
}

/// Body of `POST /api/external/incidents/{id}/close`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseBody {
    /// Closing notes.
    #[serde(default)]
    pub resolution_notes: Option<String>,
    /// Who closed it; `system` when absent.
    #[serde(default)]
    pub closed_by: Option<String>,
}

/// `POST /api/external/incidents/{id}/close`
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Payload(body): Payload<CloseBody>,
) -> Result<Json<Value>, GatewayError> {
    let id = parse_incident_id(&id)?;
    let closed_by = body
        .closed_by
        .filter(|by| !by.trim().is_empty())
        .unwrap_or_else(|| "system".to_owned());
    let notes = body.resolution_notes.map(|n| strip_tags(&n));
    let incident = state
        .broker
        .finish_incident(id, IncidentStatus::Closed, notes, &closed_by)?;
    Ok(Json(json!({
        "success": true,
        "closure": {
            "incidentId": incident.id,
            "status": incident.status,
            "resolutionNotes": incident.notes,
            "closedBy": closed_by,
            "closedAt": incident.last_update,
        },
        "message": "Incident closed successfully",
    })))
}
