//! Shared type definitions for the Beacon coordination broker.
//!
//! This crate is the single source of truth for every type that crosses the
//! wire. Types flow downstream to `TypeScript` via `ts-rs` for the citizen
//! portal and the command-center dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier wrappers
//! - [`enums`] -- Roles, severities, statuses, responder kinds
//! - [`structs`] -- Identities, incidents, responder positions, alerts
//! - [`events`] -- Inbound event allow-list, payloads and outbound frames

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    AlertAudience, DisconnectReason, IncidentCategory, IncidentStatus, NotificationKind,
    ReportSource, ResponderStatus, ResponderType, Role, Severity,
};
pub use events::{
    AcknowledgeAssignment, ActiveIncidentsQuery, ClientEvent, CreateIncident,
    EmergencyAlertRequest, EventName, FieldUpdate, InboundFrame, IncidentNotificationRequest,
    IncidentRef, LocationUpdate, NearbyQuery, RegisterResponder, ResolveIncident,
    ResponderStatusChange, ServerFrame, UpdateIncidentStatus,
};
pub use ids::{AlertId, IncidentId, NotificationId, ResponderId, SessionId, UserId};
pub use structs::{
    Alert, Identity, Incident, IncidentLocation, IncidentNotification, IncidentPage,
    NearbyResponder, Pagination, ResponderLocationEntry, ResponderProfile, SystemStatistics,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Types with #[ts(export)] write their bindings to `bindings/`
        // relative to the crate root when exported.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::IncidentId::export_all();
        let _ = crate::ids::SessionId::export_all();
        let _ = crate::ids::AlertId::export_all();
        let _ = crate::ids::NotificationId::export_all();
        let _ = crate::ids::UserId::export_all();
        let _ = crate::ids::ResponderId::export_all();

        // Enums
        let _ = crate::enums::Role::export_all();
        let _ = crate::enums::Severity::export_all();
        let _ = crate::enums::IncidentCategory::export_all();
        let _ = crate::enums::IncidentStatus::export_all();
        let _ = crate::enums::ResponderStatus::export_all();
        let _ = crate::enums::ResponderType::export_all();
        let _ = crate::enums::AlertAudience::export_all();
        let _ = crate::enums::NotificationKind::export_all();

        // Structs
        let _ = crate::structs::Incident::export_all();
        let _ = crate::structs::IncidentPage::export_all();
        let _ = crate::structs::NearbyResponder::export_all();
        let _ = crate::structs::Alert::export_all();
        let _ = crate::structs::IncidentNotification::export_all();
        let _ = crate::structs::SystemStatistics::export_all();

        // Events
        let _ = crate::events::EventName::export_all();
        let _ = crate::events::ClientEvent::export_all();
        let _ = crate::events::ServerFrame::export_all();
    }
}
