//! The inbound event protocol and the outbound frame envelope.
//!
//! Every frame on a live connection is a JSON object `{ "event": <name>,
//! "data": <payload> }`. Inbound names come from a fixed allow-list
//! ([`EventName`]); anything else is refused before the payload is looked
//! at. A known name is decoded into the matching [`ClientEvent`] variant so
//! handlers receive typed payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use validator::Validate;

use crate::enums::{
    AlertAudience, IncidentCategory, IncidentStatus, NotificationKind, ResponderStatus,
    ResponderType, Severity,
};
use crate::ids::{IncidentId, UserId};
use crate::structs::IncidentLocation;

// ---------------------------------------------------------------------------
// Event allow-list
// ---------------------------------------------------------------------------

/// Every event name a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum EventName {
    /// `incident:create`
    #[serde(rename = "incident:create")]
    IncidentCreate,
    /// `incident:update_status`
    #[serde(rename = "incident:update_status")]
    IncidentUpdateStatus,
    /// `incident:resolve`
    #[serde(rename = "incident:resolve")]
    IncidentResolve,
    /// `incident:get_active`
    #[serde(rename = "incident:get_active")]
    IncidentGetActive,
    /// `incident:get_details`
    #[serde(rename = "incident:get_details")]
    IncidentGetDetails,
    /// `incident:subscribe`
    #[serde(rename = "incident:subscribe")]
    IncidentSubscribe,
    /// `incident:unsubscribe`
    #[serde(rename = "incident:unsubscribe")]
    IncidentUnsubscribe,
    /// `responder:register`
    #[serde(rename = "responder:register")]
    ResponderRegister,
    /// `responder:update_status`
    #[serde(rename = "responder:update_status")]
    ResponderUpdateStatus,
    /// `responder:acknowledge_assignment`
    #[serde(rename = "responder:acknowledge_assignment")]
    ResponderAcknowledgeAssignment,
    /// `responder:field_update`
    #[serde(rename = "responder:field_update")]
    ResponderFieldUpdate,
    /// `location:update`
    #[serde(rename = "location:update")]
    LocationUpdate,
    /// `location:get_nearby_responders`
    #[serde(rename = "location:get_nearby_responders")]
    LocationGetNearbyResponders,
    /// `location:get_all_responders`
    #[serde(rename = "location:get_all_responders")]
    LocationGetAllResponders,
    /// `notification:emergency_alert`
    #[serde(rename = "notification:emergency_alert")]
    NotificationEmergencyAlert,
    /// `notification:incident`
    #[serde(rename = "notification:incident")]
    NotificationIncident,
}

impl EventName {
    /// The complete allow-list.
    pub const ALL: [Self; 16] = [
        Self::IncidentCreate,
        Self::IncidentUpdateStatus,
        Self::IncidentResolve,
        Self::IncidentGetActive,
        Self::IncidentGetDetails,
        Self::IncidentSubscribe,
        Self::IncidentUnsubscribe,
        Self::ResponderRegister,
        Self::ResponderUpdateStatus,
        Self::ResponderAcknowledgeAssignment,
        Self::ResponderFieldUpdate,
        Self::LocationUpdate,
        Self::LocationGetNearbyResponders,
        Self::LocationGetAllResponders,
        Self::NotificationEmergencyAlert,
        Self::NotificationIncident,
    ];

    /// Wire name of the event.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncidentCreate => "incident:create",
            Self::IncidentUpdateStatus => "incident:update_status",
            Self::IncidentResolve => "incident:resolve",
            Self::IncidentGetActive => "incident:get_active",
            Self::IncidentGetDetails => "incident:get_details",
            Self::IncidentSubscribe => "incident:subscribe",
            Self::IncidentUnsubscribe => "incident:unsubscribe",
            Self::ResponderRegister => "responder:register",
            Self::ResponderUpdateStatus => "responder:update_status",
            Self::ResponderAcknowledgeAssignment => "responder:acknowledge_assignment",
            Self::ResponderFieldUpdate => "responder:field_update",
            Self::LocationUpdate => "location:update",
            Self::LocationGetNearbyResponders => "location:get_nearby_responders",
            Self::LocationGetAllResponders => "location:get_all_responders",
            Self::NotificationEmergencyAlert => "notification:emergency_alert",
            Self::NotificationIncident => "notification:incident",
        }
    }

    /// Look up a wire name in the allow-list.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    /// Protocol domain (`incident`, `responder`, `location`, `notification`).
    ///
    /// Error replies for this event are sent as `<domain>:error`.
    pub const fn domain(self) -> &'static str {
        match self {
            Self::IncidentCreate
            | Self::IncidentUpdateStatus
            | Self::IncidentResolve
            | Self::IncidentGetActive
            | Self::IncidentGetDetails
            | Self::IncidentSubscribe
            | Self::IncidentUnsubscribe => "incident",
            Self::ResponderRegister
            | Self::ResponderUpdateStatus
            | Self::ResponderAcknowledgeAssignment
            | Self::ResponderFieldUpdate => "responder",
            Self::LocationUpdate
            | Self::LocationGetNearbyResponders
            | Self::LocationGetAllResponders => "location",
            Self::NotificationEmergencyAlert | Self::NotificationIncident => "notification",
        }
    }
}

impl core::fmt::Display for EventName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Incident payloads
// ---------------------------------------------------------------------------

/// Payload of `incident:create`, also the body of the REST create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CreateIncident {
    /// Short summary.
    #[validate(length(min = 5, message = "Title must be at least 5 characters long"))]
    pub title: String,
    /// What the reporter saw.
    #[validate(length(min = 10, message = "Description must be at least 10 characters long"))]
    pub description: String,
    /// Kind of incident.
    #[serde(default)]
    pub category: IncidentCategory,
    /// Urgency.
    pub severity: Severity,
    /// Where it happened.
    #[serde(default)]
    #[validate(nested)]
    pub location: Option<IncidentLocation>,
    /// Reporter's name.
    #[serde(default)]
    #[validate(length(max = 120, message = "Reporter name is too long"))]
    pub reporter_name: Option<String>,
    /// Reporter's phone number (Indian format).
    #[serde(default)]
    pub reporter_phone: Option<String>,
    /// Reporter's email address.
    #[serde(default)]
    #[validate(email(message = "Invalid email address"))]
    pub reporter_email: Option<String>,
}

/// Payload of `incident:update_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct UpdateIncidentStatus {
    /// Incident to update.
    pub incident_id: IncidentId,
    /// New status.
    pub status: IncidentStatus,
    /// Operator notes.
    #[serde(default)]
    #[validate(length(max = 2000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

/// Payload of `incident:resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ResolveIncident {
    /// Incident to resolve.
    pub incident_id: IncidentId,
    /// How it was resolved.
    #[serde(default, alias = "notes")]
    #[validate(length(max = 2000, message = "Resolution notes are too long"))]
    pub resolution_notes: Option<String>,
}

/// Reference to one incident: a bare id or `{ "incidentId": id }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum IncidentRef {
    /// A bare id string.
    Bare(IncidentId),
    /// An object carrying the id.
    Wrapped {
        /// The referenced incident.
        #[serde(rename = "incidentId")]
        incident_id: IncidentId,
    },
}

impl IncidentRef {
    /// The referenced incident id.
    pub const fn id(self) -> IncidentId {
        match self {
            Self::Bare(id) | Self::Wrapped { incident_id: id } => id,
        }
    }
}

/// Payload of `incident:get_active` and query of the REST listing.
///
/// `page` and `limit` stay signed so that a negative value reaches the
/// store and fails there with a field-level reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ActiveIncidentsQuery {
    /// Only incidents of this severity.
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Only incidents in this status.
    #[serde(default)]
    pub status: Option<IncidentStatus>,
    /// One-based page number (default 1).
    #[serde(default)]
    pub page: Option<i64>,
    /// Page size (default 50, capped at 100).
    #[serde(default)]
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Responder payloads
// ---------------------------------------------------------------------------

/// Payload of `responder:register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RegisterResponder {
    /// Kind of unit.
    #[serde(rename = "type", alias = "responderType")]
    pub responder_type: ResponderType,
    /// Vehicle call sign.
    #[serde(default)]
    #[validate(length(max = 64, message = "Vehicle id is too long"))]
    pub vehicle_id: Option<String>,
}

/// Payload of `responder:update_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ResponderStatusChange {
    /// New availability.
    pub status: ResponderStatus,
    /// Incident the change relates to, if any.
    #[serde(default)]
    pub incident_id: Option<IncidentId>,
}

/// Payload of `responder:acknowledge_assignment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AcknowledgeAssignment {
    /// Incident the responder was assigned to.
    pub incident_id: IncidentId,
    /// Estimated minutes until arrival.
    #[serde(default)]
    #[validate(range(max = 1440, message = "ETA must be at most 1440 minutes"))]
    pub eta: Option<u32>,
}

/// Payload of `responder:field_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct FieldUpdate {
    /// Incident the report concerns.
    pub incident_id: IncidentId,
    /// What the responder observed.
    #[validate(length(min = 1, max = 2000, message = "Message is required"))]
    pub message: String,
    /// Links to photos or video.
    #[serde(default)]
    pub media: Vec<String>,
    /// How urgently the command center should read it.
    #[serde(default)]
    pub priority: Option<Severity>,
}

// ---------------------------------------------------------------------------
// Location payloads
// ---------------------------------------------------------------------------

/// Payload of `location:update`, also the body of the REST location call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LocationUpdate {
    /// Latitude in degrees.
    #[serde(alias = "lat")]
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be a number between -90 and 90"))]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(alias = "lon", alias = "lng")]
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be a number between -180 and 180"))]
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Accuracy must be a positive number"))]
    pub accuracy: Option<f64>,
    /// Direction of travel in degrees.
    #[serde(default)]
    #[validate(range(min = 0.0, exclusive_max = 360.0, message = "Heading must be a number between 0 and 359"))]
    pub heading: Option<f64>,
    /// Ground speed in meters per second.
    #[serde(default)]
    #[validate(range(min = 0.0, message = "Speed must be a positive number"))]
    pub speed: Option<f64>,
    /// New availability, if it changed with the move.
    #[serde(default)]
    pub status: Option<ResponderStatus>,
}

/// Payload of `location:get_nearby_responders`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct NearbyQuery {
    /// Query point latitude.
    #[serde(alias = "lat")]
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be a number between -90 and 90"))]
    pub latitude: f64,
    /// Query point longitude.
    #[serde(alias = "lon", alias = "lng")]
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be a number between -180 and 180"))]
    pub longitude: f64,
    /// Search radius in meters; the configured default when absent.
    #[serde(default)]
    #[validate(range(exclusive_min = 0.0, message = "Radius must be a positive number"))]
    pub radius: Option<f64>,
    /// Only responders of this kind.
    #[serde(default, alias = "type")]
    pub responder_type: Option<ResponderType>,
}

// ---------------------------------------------------------------------------
// Notification payloads
// ---------------------------------------------------------------------------

/// Payload of `notification:emergency_alert`, also the REST alert body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct EmergencyAlertRequest {
    /// Alert kind.
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    /// Text shown to recipients.
    #[validate(length(min = 1, max = 1000, message = "Message is required"))]
    pub message: String,
    /// Urgency.
    #[serde(default)]
    pub severity: Severity,
    /// Who receives it.
    pub target_audience: AlertAudience,
    /// Incident the alert concerns.
    #[serde(default)]
    pub incident_id: Option<IncidentId>,
    /// Minutes until recipients may dismiss it.
    #[serde(default)]
    #[validate(range(min = 1, max = 10080, message = "Expiry must be between 1 and 10080 minutes"))]
    pub expires_in_minutes: Option<u32>,
}

/// Payload of `notification:incident`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct IncidentNotificationRequest {
    /// Incident the notification concerns.
    pub incident_id: IncidentId,
    /// Notification kind.
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    /// Text shown to recipients.
    #[validate(length(min = 1, max = 1000, message = "Message is required"))]
    pub message: String,
    /// Explicit recipients; empty means the incident's subscribers.
    #[serde(default)]
    pub recipients: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Decoded inbound event
// ---------------------------------------------------------------------------

/// A client event with its payload decoded.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "event", content = "data")]
#[ts(export, export_to = "bindings/")]
pub enum ClientEvent {
    /// Report a new incident.
    #[serde(rename = "incident:create")]
    CreateIncident(CreateIncident),
    /// Change an incident's status.
    #[serde(rename = "incident:update_status")]
    UpdateIncidentStatus(UpdateIncidentStatus),
    /// Resolve an incident and drop it from the registry.
    #[serde(rename = "incident:resolve")]
    ResolveIncident(ResolveIncident),
    /// List active incidents.
    #[serde(rename = "incident:get_active")]
    GetActiveIncidents(ActiveIncidentsQuery),
    /// Fetch one incident.
    #[serde(rename = "incident:get_details")]
    GetIncidentDetails(IncidentRef),
    /// Follow an incident's topic.
    #[serde(rename = "incident:subscribe")]
    SubscribeIncident(IncidentRef),
    /// Stop following an incident's topic.
    #[serde(rename = "incident:unsubscribe")]
    UnsubscribeIncident(IncidentRef),
    /// Register the session's responder profile.
    #[serde(rename = "responder:register")]
    RegisterResponder(RegisterResponder),
    /// Change the responder's availability.
    #[serde(rename = "responder:update_status")]
    UpdateResponderStatus(ResponderStatusChange),
    /// Accept an assignment.
    #[serde(rename = "responder:acknowledge_assignment")]
    AcknowledgeAssignment(AcknowledgeAssignment),
    /// Report from the scene.
    #[serde(rename = "responder:field_update")]
    FieldUpdate(FieldUpdate),
    /// Report the responder's position.
    #[serde(rename = "location:update")]
    UpdateLocation(LocationUpdate),
    /// Find responders around a point.
    #[serde(rename = "location:get_nearby_responders")]
    GetNearbyResponders(NearbyQuery),
    /// List every tracked responder.
    #[serde(rename = "location:get_all_responders")]
    GetAllResponders,
    /// Broadcast an emergency alert.
    #[serde(rename = "notification:emergency_alert")]
    EmergencyAlert(EmergencyAlertRequest),
    /// Notify users about an incident.
    #[serde(rename = "notification:incident")]
    IncidentNotification(IncidentNotificationRequest),
}

impl ClientEvent {
    /// Decode the payload of an allow-listed event.
    ///
    /// A missing or `null` payload is read as an empty object, so events
    /// whose fields are all optional may omit `data`.
    pub fn decode(name: EventName, data: Value) -> Result<Self, serde_json::Error> {
        let data = if data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            data
        };
        let event = match name {
            EventName::IncidentCreate => Self::CreateIncident(serde_json::from_value(data)?),
            EventName::IncidentUpdateStatus => {
                Self::UpdateIncidentStatus(serde_json::from_value(data)?)
            }
            EventName::IncidentResolve => Self::ResolveIncident(serde_json::from_value(data)?),
            EventName::IncidentGetActive => Self::GetActiveIncidents(serde_json::from_value(data)?),
            EventName::IncidentGetDetails => {
                Self::GetIncidentDetails(serde_json::from_value(data)?)
            }
            EventName::IncidentSubscribe => Self::SubscribeIncident(serde_json::from_value(data)?),
            EventName::IncidentUnsubscribe => {
                Self::UnsubscribeIncident(serde_json::from_value(data)?)
            }
            EventName::ResponderRegister => Self::RegisterResponder(serde_json::from_value(data)?),
            EventName::ResponderUpdateStatus => {
                Self::UpdateResponderStatus(serde_json::from_value(data)?)
            }
            EventName::ResponderAcknowledgeAssignment => {
                Self::AcknowledgeAssignment(serde_json::from_value(data)?)
            }
            EventName::ResponderFieldUpdate => Self::FieldUpdate(serde_json::from_value(data)?),
            EventName::LocationUpdate => Self::UpdateLocation(serde_json::from_value(data)?),
            EventName::LocationGetNearbyResponders => {
                Self::GetNearbyResponders(serde_json::from_value(data)?)
            }
            EventName::LocationGetAllResponders => Self::GetAllResponders,
            EventName::NotificationEmergencyAlert => {
                Self::EmergencyAlert(serde_json::from_value(data)?)
            }
            EventName::NotificationIncident => {
                Self::IncidentNotification(serde_json::from_value(data)?)
            }
        };
        Ok(event)
    }

    /// The allow-list entry this event was decoded from.
    pub const fn name(&self) -> EventName {
        match self {
            Self::CreateIncident(_) => EventName::IncidentCreate,
            Self::UpdateIncidentStatus(_) => EventName::IncidentUpdateStatus,
            Self::ResolveIncident(_) => EventName::IncidentResolve,
            Self::GetActiveIncidents(_) => EventName::IncidentGetActive,
            Self::GetIncidentDetails(_) => EventName::IncidentGetDetails,
            Self::SubscribeIncident(_) => EventName::IncidentSubscribe,
            Self::UnsubscribeIncident(_) => EventName::IncidentUnsubscribe,
            Self::RegisterResponder(_) => EventName::ResponderRegister,
            Self::UpdateResponderStatus(_) => EventName::ResponderUpdateStatus,
            Self::AcknowledgeAssignment(_) => EventName::ResponderAcknowledgeAssignment,
            Self::FieldUpdate(_) => EventName::ResponderFieldUpdate,
            Self::UpdateLocation(_) => EventName::LocationUpdate,
            Self::GetNearbyResponders(_) => EventName::LocationGetNearbyResponders,
            Self::GetAllResponders => EventName::LocationGetAllResponders,
            Self::EmergencyAlert(_) => EventName::NotificationEmergencyAlert,
            Self::IncidentNotification(_) => EventName::NotificationIncident,
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// The raw inbound envelope, before the name is checked.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Event name as sent by the client.
    pub event: String,
    /// Payload, decoded later against the named event.
    #[serde(default)]
    pub data: Value,
}

/// An outbound frame: event name plus JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ServerFrame {
    /// Outbound event name, e.g. `incident:new`.
    pub event: String,
    /// Event payload.
    pub data: Value,
}

impl ServerFrame {
    /// Build a frame from any serializable payload.
    ///
    /// A payload that fails to serialize becomes `null`; every payload type
    /// in this crate serializes infallibly.
    pub fn new(event: impl Into<String>, data: &impl Serialize) -> Self {
        Self {
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// Build a frame from an already-built JSON value.
    pub fn from_value(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
