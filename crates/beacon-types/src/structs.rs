//! Core entity structs: identities, incidents, responder positions, alerts.
//!
//! Field names serialize in `camelCase` on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use validator::Validate;

use crate::enums::{
    AlertAudience, IncidentCategory, IncidentStatus, NotificationKind, ReportSource,
    ResponderStatus,
    ResponderType, Role, Severity,
};
use crate::ids::{AlertId, IncidentId, NotificationId, ResponderId, UserId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who is on the other end of a session. Fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Identity {
    /// User identifier from the credential (or synthesized in open mode).
    pub id: UserId,
    /// Human-readable name shown in broadcasts.
    pub display_name: String,
    /// Role, which decides topic membership and authorization.
    pub role: Role,
    /// Responder unit id; present exactly when `role` is RESPONDER.
    pub responder_id: Option<ResponderId>,
}

/// Details a responder supplies when registering on its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ResponderProfile {
    /// Kind of unit.
    pub responder_type: ResponderType,
    /// Vehicle call sign, if any.
    pub vehicle_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// Where an incident happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct IncidentLocation {
    /// Latitude in degrees.
    #[serde(alias = "lat")]
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be a number between -90 and 90"))]
    pub latitude: f64,
    /// Longitude in degrees.
    #[serde(alias = "lon", alias = "lng")]
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be a number between -180 and 180"))]
    pub longitude: f64,
    /// Street address or landmark, free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A tracked emergency in the live registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Incident {
    /// Server-assigned identifier.
    pub id: IncidentId,
    /// Short summary.
    pub title: String,
    /// What the reporter saw.
    pub description: String,
    /// Kind of incident.
    pub category: IncidentCategory,
    /// Urgency.
    pub severity: Severity,
    /// Lifecycle status.
    pub status: IncidentStatus,
    /// Where it happened, if the reporter shared a position.
    pub location: Option<IncidentLocation>,
    /// Reporter's name, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_name: Option<String>,
    /// Reporter's phone number, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_phone: Option<String>,
    /// Reporter's email address, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_email: Option<String>,
    /// User that reported it over a live connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<UserId>,
    /// Entry point of the report.
    pub source: ReportSource,
    /// When the incident entered the registry.
    pub created_at: DateTime<Utc>,
    /// When the incident was last modified.
    pub last_update: DateTime<Utc>,
    /// Responders assigned to or acknowledging the incident.
    #[serde(default)]
    pub assigned_responders: Vec<ResponderId>,
    /// Latest operator notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Pagination metadata returned with a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Pagination {
    /// One-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Number of incidents matching the filter.
    pub total: u32,
    /// Number of pages at this page size.
    pub pages: u32,
}

/// One page of a filtered incident listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IncidentPage {
    /// Incidents on this page, newest first.
    pub incidents: Vec<Incident>,
    /// Where this page sits in the full listing.
    pub pagination: Pagination,
}

// ---------------------------------------------------------------------------
// Responder positions
// ---------------------------------------------------------------------------

/// The latest known position and status of one responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ResponderLocationEntry {
    /// Responder unit (unique key in the index).
    pub responder_id: ResponderId,
    /// Kind of unit, known once the responder has registered.
    pub responder_type: Option<ResponderType>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Direction of travel in degrees, `[0, 360)`.
    pub heading: Option<f64>,
    /// Ground speed in meters per second.
    pub speed: Option<f64>,
    /// Availability.
    pub status: ResponderStatus,
    /// When the position was reported.
    pub timestamp: DateTime<Utc>,
}

/// A responder returned by a nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NearbyResponder {
    /// The indexed entry.
    #[serde(flatten)]
    pub entry: ResponderLocationEntry,
    /// Great-circle distance from the query point, in meters.
    pub distance: f64,
}

// ---------------------------------------------------------------------------
// Alerts and notifications
// ---------------------------------------------------------------------------

/// An emergency alert. Broadcast only, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Alert {
    /// Server-assigned identifier.
    pub id: AlertId,
    /// Alert kind.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Text shown to recipients.
    pub message: String,
    /// Urgency.
    pub severity: Severity,
    /// Who receives it.
    pub target_audience: AlertAudience,
    /// Incident the alert concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,
    /// Sender display name.
    pub issued_by: String,
    /// When it was sent.
    pub issued_at: DateTime<Utc>,
    /// When recipients may stop showing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A notification about one incident, delivered to named users or to the
/// incident's subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct IncidentNotification {
    /// Server-assigned identifier.
    pub id: NotificationId,
    /// Incident the notification concerns.
    pub incident_id: IncidentId,
    /// Notification kind.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Text shown to recipients.
    pub message: String,
    /// Explicit recipients; empty means the incident's subscribers.
    pub recipients: Vec<UserId>,
    /// Sender display name.
    pub sent_by: String,
    /// When it was sent.
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Aggregate broker counters, served by status endpoints and cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SystemStatistics {
    /// Live sessions.
    pub connected_users: u64,
    /// Incidents in the live registry.
    pub active_incidents: u64,
    /// Incidents with CRITICAL severity.
    pub critical_incidents: u64,
    /// Responders with a fresh position.
    pub online_responders: u64,
    /// Responders reporting AVAILABLE.
    pub available_responders: u64,
    /// Seconds since the broker started.
    pub uptime_seconds: u64,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Broker version.
    pub version: String,
}
