//! Per-event handlers for live sessions.
//!
//! [`Broker::dispatch`] is the static dispatch table over [`ClientEvent`].
//! Handlers run after the pipeline in `router` has authorized and validated
//! the event; a handler's error goes back to the caller as `<domain>:error`.

use std::slice;

use beacon_types::{
    AcknowledgeAssignment, ActiveIncidentsQuery, ClientEvent, CreateIncident, FieldUpdate,
    IncidentNotification, IncidentNotificationRequest, IncidentRef, IncidentStatus, NearbyQuery,
    NotificationId, RegisterResponder, ReportSource, ResolveIncident, ResponderId,
    ResponderProfile, ResponderStatus, ResponderStatusChange, UpdateIncidentStatus,
};
use chrono::Utc;
use serde_json::json;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::incidents::{IncidentPatch, Reporter};
use crate::operations::incident_audience;
use crate::responders::NearbySearch;
use crate::router::Caller;
use crate::topic::Topic;

fn responder_of(caller: &Caller) -> Result<&ResponderId, BrokerError> {
    caller
        .identity
        .responder_id
        .as_ref()
        .ok_or_else(|| BrokerError::Authorization("Session has no responder unit".to_owned()))
}

impl Broker {
    pub(crate) fn dispatch(&self, caller: &Caller, event: ClientEvent) -> Result<(), BrokerError> {
        match event {
            ClientEvent::CreateIncident(data) => self.on_create_incident(caller, data),
            ClientEvent::UpdateIncidentStatus(update) => {
                self.on_update_incident_status(caller, update)
            }
            ClientEvent::ResolveIncident(resolve) => self.on_resolve_incident(caller, resolve),
            ClientEvent::GetActiveIncidents(query) => self.on_get_active(caller, &query),
            ClientEvent::GetIncidentDetails(incident) => self.on_get_details(caller, incident),
            ClientEvent::SubscribeIncident(incident) => self.on_subscribe(caller, incident),
            ClientEvent::UnsubscribeIncident(incident) => {
                self.on_unsubscribe(caller, incident);
                Ok(())
            }
            ClientEvent::RegisterResponder(register) => self.on_register(caller, register),
            ClientEvent::UpdateResponderStatus(change) => self.on_responder_status(caller, change),
            ClientEvent::AcknowledgeAssignment(ack) => self.on_acknowledge(caller, ack),
            ClientEvent::FieldUpdate(update) => self.on_field_update(caller, &update),
            ClientEvent::UpdateLocation(update) => {
                let responder = responder_of(caller)?;
                let kind = self
                    .sessions()
                    .profile(caller.session)
                    .map(|p| p.responder_type);
                self.record_location(responder, kind, &update).map(drop)
            }
            ClientEvent::GetNearbyResponders(query) => self.on_nearby(caller, query),
            ClientEvent::GetAllResponders => {
                self.send(caller.session, "location:all_responders", &self.responders().all());
                Ok(())
            }
            ClientEvent::EmergencyAlert(request) => self
                .issue_alert(request, &caller.identity.display_name)
                .map(drop),
            ClientEvent::IncidentNotification(request) => self.on_notification(caller, request),
        }
    }

    // -----------------------------------------------------------------------
    // incident:*
    // -----------------------------------------------------------------------

    fn on_create_incident(&self, caller: &Caller, data: CreateIncident) -> Result<(), BrokerError> {
        let reporter = Reporter {
            user: Some(caller.identity.id.clone()),
            source: ReportSource::CitizenPortal,
        };
        let incident = self.report_incident(data, reporter)?;
        self.sessions()
            .subscribe(caller.session, Topic::Incident(incident.id));
        self.send(
            caller.session,
            "incident:created",
            &json!({
                "message": "Incident reported successfully",
                "incidentId": incident.id,
                "estimatedResponseTime": incident.severity.estimated_response_minutes(),
                "incident": incident,
            }),
        );
        Ok(())
    }

    fn on_update_incident_status(
        &self,
        caller: &Caller,
        update: UpdateIncidentStatus,
    ) -> Result<(), BrokerError> {
        let patch = IncidentPatch {
            status: Some(update.status),
            severity: None,
            notes: update.notes,
        };
        self.update_incident(update.incident_id, patch, &caller.identity.display_name)
            .map(drop)
    }

    fn on_resolve_incident(
        &self,
        caller: &Caller,
        resolve: ResolveIncident,
    ) -> Result<(), BrokerError> {
        self.finish_incident(
            resolve.incident_id,
            IncidentStatus::Resolved,
            resolve.resolution_notes,
            &caller.identity.display_name,
        )
        .map(drop)
    }

    fn on_get_active(
        &self,
        caller: &Caller,
        query: &ActiveIncidentsQuery,
    ) -> Result<(), BrokerError> {
        let page = self.incidents().list(query)?;
        self.send(caller.session, "incident:active_list", &page);
        Ok(())
    }

    fn on_get_details(&self, caller: &Caller, incident: IncidentRef) -> Result<(), BrokerError> {
        let incident = self.incidents().get(incident.id())?;
        self.send(caller.session, "incident:details", &incident);
        Ok(())
    }

    fn on_subscribe(&self, caller: &Caller, incident: IncidentRef) -> Result<(), BrokerError> {
        let id = self.incidents().get(incident.id())?.id;
        self.sessions().subscribe(caller.session, Topic::Incident(id));
        tracing::debug!(session_id = %caller.session, incident_id = %id, "subscribed to incident");
        self.send(caller.session, "incident:subscribed", &json!({ "incidentId": id }));
        Ok(())
    }

    fn on_unsubscribe(&self, caller: &Caller, incident: IncidentRef) {
        let id = incident.id();
        self.sessions()
            .unsubscribe(caller.session, &Topic::Incident(id));
        self.send(caller.session, "incident:unsubscribed", &json!({ "incidentId": id }));
    }

    // -----------------------------------------------------------------------
    // responder:*
    // -----------------------------------------------------------------------

    fn on_register(&self, caller: &Caller, register: RegisterResponder) -> Result<(), BrokerError> {
        let responder = responder_of(caller)?;
        let profile = ResponderProfile {
            responder_type: register.responder_type,
            vehicle_id: register.vehicle_id,
        };
        self.sessions().set_profile(caller.session, profile.clone());
        self.responders()
            .set_type(responder, profile.responder_type);

        self.broadcast(
            &Topic::COMMAND_CENTER,
            "responder:online",
            &json!({
                "responderId": responder,
                "type": profile.responder_type,
                "vehicleId": profile.vehicle_id,
                "status": ResponderStatus::Available,
                "connectedAt": Utc::now(),
            }),
        );
        self.send(
            caller.session,
            "responder:registered",
            &json!({
                "message": "Responder registered successfully",
                "responderId": responder,
                "type": profile.responder_type,
            }),
        );
        tracing::info!(
            responder_id = %responder,
            kind = %profile.responder_type,
            "responder registered"
        );
        Ok(())
    }

    fn on_responder_status(
        &self,
        caller: &Caller,
        change: ResponderStatusChange,
    ) -> Result<(), BrokerError> {
        let responder = responder_of(caller)?;
        self.set_responder_status(responder, change.status, change.incident_id)
            .map(drop)
    }

    fn on_acknowledge(
        &self,
        caller: &Caller,
        ack: AcknowledgeAssignment,
    ) -> Result<(), BrokerError> {
        let responder = responder_of(caller)?;
        let incident = self
            .incidents()
            .assign(ack.incident_id, slice::from_ref(responder))?;
        self.broadcast(
            &incident_audience(ack.incident_id),
            "responder:assignment_acknowledged",
            &json!({
                "responderId": responder,
                "incidentId": ack.incident_id,
                "eta": ack.eta,
                "incidentStatus": incident.status,
                "acknowledgedAt": Utc::now(),
            }),
        );
        self.sessions()
            .subscribe(caller.session, Topic::Incident(ack.incident_id));
        self.send(
            caller.session,
            "responder:acknowledgment_sent",
            &json!({ "message": "Assignment acknowledged", "incidentId": ack.incident_id }),
        );
        self.snapshot_incidents();
        tracing::info!(
            responder_id = %responder,
            incident_id = %ack.incident_id,
            "assignment acknowledged"
        );
        Ok(())
    }

    fn on_field_update(&self, caller: &Caller, update: &FieldUpdate) -> Result<(), BrokerError> {
        let responder = responder_of(caller)?;
        self.incidents().get(update.incident_id)?;
        self.broadcast(
            &incident_audience(update.incident_id),
            "responder:field_update",
            &json!({
                "responderId": responder,
                "incidentId": update.incident_id,
                "message": update.message,
                "media": update.media,
                "priority": update.priority,
                "timestamp": Utc::now(),
            }),
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // location:*
    // -----------------------------------------------------------------------

    fn on_nearby(&self, caller: &Caller, query: NearbyQuery) -> Result<(), BrokerError> {
        let nearby = self.responders().nearest(NearbySearch {
            latitude: query.latitude,
            longitude: query.longitude,
            radius_m: query.radius,
            responder_type: query.responder_type,
        })?;
        self.send(caller.session, "location:nearby_responders", &nearby);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // notification:*
    // -----------------------------------------------------------------------

    fn on_notification(
        &self,
        caller: &Caller,
        request: IncidentNotificationRequest,
    ) -> Result<(), BrokerError> {
        self.incidents().get(request.incident_id)?;
        let notification = IncidentNotification {
            id: NotificationId::new(),
            incident_id: request.incident_id,
            kind: request.kind,
            message: request.message,
            recipients: request.recipients,
            sent_by: caller.identity.display_name.clone(),
            sent_at: Utc::now(),
        };
        let topics: Vec<Topic> = if notification.recipients.is_empty() {
            vec![Topic::Incident(notification.incident_id)]
        } else {
            notification
                .recipients
                .iter()
                .cloned()
                .map(Topic::User)
                .collect()
        };
        let delivery = self.broadcast(&topics, "notification:incident", &notification);
        tracing::info!(
            incident_id = %notification.incident_id,
            recipients = delivery.delivered,
            "incident notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use beacon_types::{IncidentId, Role, ServerFrame};
    use serde_json::{Value, json};

    use super::*;
    use crate::config::BrokerConfig;
    use crate::session::SessionHandle;
    use crate::test_support::{drain, events, identity};

    fn send(broker: &Broker, handle: &SessionHandle, event: &str, data: &Value) {
        broker.handle_frame(handle.id, &json!({ "event": event, "data": data }).to_string());
    }

    fn only(frames: Vec<ServerFrame>, event: &str) -> Vec<ServerFrame> {
        frames.into_iter().filter(|f| f.event == event).collect()
    }

    fn create_payload() -> Value {
        json!({
            "title": "Suspicious Activity",
            "description": "Unattended package",
            "severity": "MEDIUM",
            "location": { "lat": 28.6139, "lon": 77.2090 },
        })
    }

    #[test]
    fn create_then_resolve_end_to_end() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut citizen = broker.connect(identity("cit", Role::Citizen));
        let mut operator = broker.connect(identity("op", Role::Operator));
        drain(&mut citizen);
        drain(&mut operator);

        send(&broker, &citizen, "incident:create", &create_payload());
        let created = only(drain(&mut citizen), "incident:created");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].data["estimatedResponseTime"], 30);
        assert_eq!(created[0].data["incident"]["status"], "REPORTED");
        let id: IncidentId = serde_json::from_value(created[0].data["incidentId"].clone()).unwrap();

        assert_eq!(events(&mut operator), vec!["incident:new"]);

        send(&broker, &operator, "incident:get_active", &json!({}));
        let listed = only(drain(&mut operator), "incident:active_list");
        assert_eq!(listed[0].data["pagination"]["total"], 1);
        assert_eq!(listed[0].data["incidents"][0]["id"], json!(id));

        send(
            &broker,
            &operator,
            "incident:resolve",
            &json!({ "incidentId": id, "resolutionNotes": "Package was lunch" }),
        );
        // The reporter follows its incident and sees exactly one terminal event.
        assert_eq!(events(&mut citizen), vec!["incident:resolved"]);
        assert_eq!(events(&mut operator), vec!["incident:resolved"]);

        send(&broker, &operator, "incident:get_active", &json!({}));
        let listed = only(drain(&mut operator), "incident:active_list");
        assert_eq!(listed[0].data["pagination"]["total"], 0);
        assert_eq!(broker.sessions().subscriber_count(&Topic::Incident(id)), 0);
    }

    #[test]
    fn details_of_unknown_incident_is_not_found() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut citizen = broker.connect(identity("cit", Role::Citizen));
        drain(&mut citizen);

        send(&broker, &citizen, "incident:get_details", &json!(IncidentId::new()));
        let frames = drain(&mut citizen);
        assert_eq!(frames[0].event, "incident:error");
        assert_eq!(frames[0].data["code"], "NOT_FOUND");
    }

    #[test]
    fn status_update_reaches_followers() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut citizen = broker.connect(identity("cit", Role::Citizen));
        let mut operator = broker.connect(identity("op", Role::Operator));
        send(&broker, &citizen, "incident:create", &create_payload());
        let id = broker.incidents().all()[0].id;
        drain(&mut citizen);
        drain(&mut operator);

        send(
            &broker,
            &operator,
            "incident:update_status",
            &json!({ "incidentId": id, "status": "IN_PROGRESS" }),
        );
        let frames = drain(&mut citizen);
        assert_eq!(frames[0].event, "incident:status_updated");
        assert_eq!(frames[0].data["status"], "IN_PROGRESS");
        assert_eq!(frames[0].data["updatedBy"], "op");
    }

    #[test]
    fn registered_responder_is_found_by_type() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut unit = broker.connect(identity("unit-3", Role::Responder));
        let mut operator = broker.connect(identity("op", Role::Operator));

        send(
            &broker,
            &unit,
            "responder:register",
            &json!({ "type": "MEDICAL", "vehicleId": "AMB-12" }),
        );
        send(
            &broker,
            &unit,
            "location:update",
            &json!({ "latitude": 28.6140, "longitude": 77.2091 }),
        );
        assert!(events(&mut unit).contains(&"responder:registered".to_owned()));
        drain(&mut operator);

        send(
            &broker,
            &operator,
            "location:get_nearby_responders",
            &json!({
                "latitude": 28.6139,
                "longitude": 77.2090,
                "radius": 1000,
                "type": "MEDICAL",
            }),
        );
        let found = only(drain(&mut operator), "location:nearby_responders");
        assert_eq!(found[0].data[0]["responderId"], "unit-3");
        assert_eq!(found[0].data[0]["responderType"], "MEDICAL");

        send(
            &broker,
            &operator,
            "location:get_nearby_responders",
            &json!({ "latitude": 28.6139, "longitude": 77.2090, "type": "FIRE" }),
        );
        let found = only(drain(&mut operator), "location:nearby_responders");
        assert_eq!(found[0].data, json!([]));
    }

    #[test]
    fn acknowledgement_assigns_and_subscribes() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let citizen = broker.connect(identity("cit", Role::Citizen));
        send(&broker, &citizen, "incident:create", &create_payload());
        let id = broker.incidents().all()[0].id;
        let mut unit = broker.connect(identity("unit-1", Role::Responder));
        drain(&mut unit);

        send(
            &broker,
            &unit,
            "responder:acknowledge_assignment",
            &json!({ "incidentId": id, "eta": 6 }),
        );
        assert_eq!(events(&mut unit), vec!["responder:acknowledgment_sent"]);

        let incident = broker.incidents().get(id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Assigned);
        assert_eq!(incident.assigned_responders, vec![ResponderId::from("unit-1")]);
        assert_eq!(broker.sessions().subscriber_count(&Topic::Incident(id)), 2);
    }

    #[test]
    fn notification_goes_to_named_users() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let citizen = broker.connect(identity("cit", Role::Citizen));
        send(&broker, &citizen, "incident:create", &create_payload());
        let id = broker.incidents().all()[0].id;
        let operator = broker.connect(identity("op", Role::Operator));
        let mut alice = broker.connect(identity("alice", Role::Citizen));
        let mut bob = broker.connect(identity("bob", Role::Citizen));
        drain(&mut alice);
        drain(&mut bob);

        send(
            &broker,
            &operator,
            "notification:incident",
            &json!({ "incidentId": id, "message": "Road closed", "recipients": ["alice"] }),
        );
        assert_eq!(events(&mut alice), vec!["notification:incident"]);
        assert!(events(&mut bob).is_empty());
    }

    #[test]
    fn responder_events_need_a_unit() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut unit = broker.connect(beacon_types::Identity {
            id: "anon".into(),
            display_name: "Anon".to_owned(),
            role: Role::Responder,
            responder_id: None,
        });
        drain(&mut unit);

        send(&broker, &unit, "location:update", &json!({ "latitude": 28.6, "longitude": 77.2 }));
        let frames = drain(&mut unit);
        assert_eq!(frames[0].event, "location:error");
        assert_eq!(frames[0].data["code"], "AUTHORIZATION_ERROR");
        assert_eq!(broker.responders().count(), 0);
    }
}
