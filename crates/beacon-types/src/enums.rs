//! Enumeration types shared by the broker and its clients.
//!
//! All enums serialize as `SCREAMING_SNAKE_CASE` strings, matching the
//! values the citizen portal and command-center dashboard already send.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

/// The role an authenticated identity holds for its whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum Role {
    /// A member of the public reporting incidents.
    #[serde(alias = "citizen")]
    Citizen,
    /// A command-center operator.
    #[serde(alias = "operator")]
    Operator,
    /// A command-center administrator.
    #[serde(alias = "admin")]
    Admin,
    /// A field responder unit.
    #[serde(alias = "responder")]
    Responder,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Self; 4] = [Self::Citizen, Self::Operator, Self::Admin, Self::Responder];

    /// Lowercase name used in the `role:<name>` topic.
    pub const fn topic_name(self) -> &'static str {
        match self {
            Self::Citizen => "citizen",
            Self::Operator => "operator",
            Self::Admin => "admin",
            Self::Responder => "responder",
        }
    }

    /// Whether this role staffs the command center.
    pub const fn is_command_center(self) -> bool {
        matches!(self, Self::Operator | Self::Admin)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Citizen => "CITIZEN",
            Self::Operator => "OPERATOR",
            Self::Admin => "ADMIN",
            Self::Responder => "RESPONDER",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Incidents
// ---------------------------------------------------------------------------

/// How urgent an incident (or alert, or field update) is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum Severity {
    /// Life-threatening, respond immediately.
    Critical,
    /// Serious, respond quickly.
    High,
    /// Needs attention.
    #[default]
    Medium,
    /// Routine.
    Low,
}

impl Severity {
    /// Estimated minutes until a responder arrives, quoted back to reporters.
    pub const fn estimated_response_minutes(self) -> u32 {
        match self {
            Self::Critical => 5,
            Self::High => 10,
            Self::Medium => 30,
            Self::Low => 60,
        }
    }
}

/// What kind of incident was reported.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum IncidentCategory {
    /// A threat involving explosives.
    BombThreat,
    /// Unattended packages, loitering, and similar.
    SuspiciousActivity,
    /// A general emergency (fire, medical, accident).
    Emergency,
    /// Unauthorized access to a secured area.
    SecurityBreach,
    /// Anything else.
    #[default]
    Other,
}

/// Lifecycle status of an incident.
///
/// The ordering below is advisory only: any status may follow any other.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum IncidentStatus {
    /// Newly reported, nobody assigned yet.
    #[default]
    Reported,
    /// One or more responders assigned.
    Assigned,
    /// Responders are working the incident.
    InProgress,
    /// Resolved; removed from the live registry.
    Resolved,
    /// Administratively closed; removed from the live registry.
    Closed,
}

impl IncidentStatus {
    /// Whether reaching this status removes the incident from the registry.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

/// Where an incident report entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ReportSource {
    /// Reported over a persistent connection (citizen portal or dashboard).
    CitizenPortal,
    /// Reported through the REST surface by an integrated backend.
    Backend,
    /// Restored from the cache snapshot at startup.
    CacheRestore,
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

/// Availability of a responder unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ResponderStatus {
    /// Ready for dispatch.
    #[default]
    Available,
    /// Occupied with a non-incident task.
    Busy,
    /// Travelling to an incident.
    EnRoute,
    /// At an incident scene.
    OnScene,
    /// Off duty.
    Unavailable,
    /// Disconnected from the broker.
    Offline,
}

/// Kind of field unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ResponderType {
    /// Police patrol.
    Police,
    /// Fire brigade.
    Fire,
    /// Ambulance or paramedics.
    Medical,
    /// Explosive ordnance disposal.
    BombSquad,
    /// Tactical unit.
    SpecialForces,
}

impl ResponderType {
    /// Wire name, also used in the `responder_type:<TYPE>` topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Police => "POLICE",
            Self::Fire => "FIRE",
            Self::Medical => "MEDICAL",
            Self::BombSquad => "BOMB_SQUAD",
            Self::SpecialForces => "SPECIAL_FORCES",
        }
    }
}

impl core::fmt::Display for ResponderType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ResponderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POLICE" => Ok(Self::Police),
            "FIRE" => Ok(Self::Fire),
            "MEDICAL" => Ok(Self::Medical),
            "BOMB_SQUAD" => Ok(Self::BombSquad),
            "SPECIAL_FORCES" => Ok(Self::SpecialForces),
            other => Err(format!("unknown responder type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts and sessions
// ---------------------------------------------------------------------------

/// Who an emergency alert is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum AlertAudience {
    /// Every connected session.
    All,
    /// Sessions with the RESPONDER role.
    Responders,
    /// Sessions with the OPERATOR or ADMIN role.
    CommandCenter,
}

/// Kind of an alert or incident notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum NotificationKind {
    /// Broadcast emergency alert (evacuation, shelter in place).
    EmergencyAlert,
    /// Progress on an incident.
    IncidentUpdate,
    /// A responder was assigned.
    Assignment,
    /// Anything else.
    #[default]
    General,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum DisconnectReason {
    /// The client closed the connection or the transport failed.
    TransportClosed,
    /// The client missed a liveness probe.
    HeartbeatTimeout,
    /// The client's outbound queue stayed full.
    SlowConsumer,
    /// The broker is shutting down.
    ServerShutdown,
}

impl DisconnectReason {
    /// Stable string form, as written to logs and close frames.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransportClosed => "transport_closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl core::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_accept_lowercase_claims() {
        let role: Role = serde_json::from_str("\"operator\"").unwrap_or(Role::Citizen);
        assert_eq!(role, Role::Operator);
        let role: Role = serde_json::from_str("\"RESPONDER\"").unwrap_or(Role::Citizen);
        assert_eq!(role, Role::Responder);
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&IncidentStatus::InProgress).unwrap_or_default();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let json = serde_json::to_string(&ResponderStatus::EnRoute).unwrap_or_default();
        assert_eq!(json, "\"EN_ROUTE\"");
    }

    #[test]
    fn response_time_estimates() {
        assert_eq!(Severity::Critical.estimated_response_minutes(), 5);
        assert_eq!(Severity::Low.estimated_response_minutes(), 60);
    }

    #[test]
    fn responder_type_parses_wire_names() {
        assert_eq!("BOMB_SQUAD".parse::<ResponderType>(), Ok(ResponderType::BombSquad));
        assert!("TANK".parse::<ResponderType>().is_err());
    }
}
