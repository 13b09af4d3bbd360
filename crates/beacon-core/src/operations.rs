//! Broker operations shared by live sessions and the REST surface.
//!
//! Each operation mutates a registry, broadcasts the result to the topics
//! that care, and queues the cache snapshot. Session-only concerns
//! (acknowledging the sender, subscribing it to topics) stay in the event
//! handlers.

use std::slice;

use beacon_types::{
    Alert, AlertAudience, AlertId, EmergencyAlertRequest, Incident, IncidentId, IncidentStatus,
    LocationUpdate, ResponderId, ResponderLocationEntry, ResponderStatus, ResponderType, Role,
    Severity,
};
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use validator::Validate;

use crate::broker::Broker;
use crate::cache::CacheWrite;
use crate::error::BrokerError;
use crate::incidents::{IncidentPatch, Reporter};
use crate::responders::NearbySearch;
use crate::session::Delivery;
use crate::topic::Topic;

/// The incident's followers plus the command center.
pub const fn incident_audience(id: IncidentId) -> [Topic; 3] {
    [
        Topic::Incident(id),
        Topic::Role(Role::Admin),
        Topic::Role(Role::Operator),
    ]
}

fn non_empty(field: &str, value: &str, message: &str) -> Result<(), BrokerError> {
    if value.trim().is_empty() {
        Err(BrokerError::invalid(field, message))
    } else {
        Ok(())
    }
}

impl Broker {
    // -----------------------------------------------------------------------
    // Incidents
    // -----------------------------------------------------------------------

    /// Create an incident, tell the command center, and alert responders
    /// near its location.
    pub fn report_incident(
        &self,
        data: beacon_types::CreateIncident,
        reporter: Reporter,
    ) -> Result<Incident, BrokerError> {
        let incident = self.incidents().create(data, reporter)?;
        self.broadcast(&Topic::COMMAND_CENTER, "incident:new", &incident);
        let alerted = self.alert_nearby_responders(&incident);
        if alerted > 0 {
            tracing::info!(
                incident_id = %incident.id,
                responders = alerted,
                "nearby responders alerted"
            );
        }
        self.snapshot_incidents();
        Ok(incident)
    }

    fn alert_nearby_responders(&self, incident: &Incident) -> usize {
        let Some(location) = incident.location.as_ref() else {
            return 0;
        };
        let search = NearbySearch {
            latitude: location.latitude,
            longitude: location.longitude,
            radius_m: None,
            responder_type: None,
        };
        let nearby = match self.responders().nearest(search) {
            Ok(nearby) => nearby,
            Err(err) => {
                tracing::warn!(
                    incident_id = %incident.id,
                    error = %err,
                    "nearby responder search failed"
                );
                return 0;
            }
        };
        for responder in &nearby {
            self.broadcast(
                &[Topic::Responder(responder.entry.responder_id.clone())],
                "incident:nearby",
                &json!({ "incident": incident, "distance": responder.distance }),
            );
        }
        nearby.len()
    }

    /// Apply a patch and broadcast `incident:status_updated`. A terminal
    /// status finishes the incident instead.
    pub fn update_incident(
        &self,
        id: IncidentId,
        patch: IncidentPatch,
        by: &str,
    ) -> Result<Incident, BrokerError> {
        if let Some(status) = patch.status
            && status.is_terminal()
        {
            return self.finish_incident(id, status, patch.notes, by);
        }
        let incident = self.incidents().update(id, patch)?;
        self.broadcast(
            &incident_audience(id),
            "incident:status_updated",
            &json!({
                "incidentId": id,
                "status": incident.status,
                "notes": incident.notes,
                "updatedBy": by,
                "updatedAt": incident.last_update,
                "incident": incident,
            }),
        );
        self.snapshot_incidents();
        Ok(incident)
    }

    /// Broadcast a free-form `incident:update` from an integrated backend,
    /// merging what it carries into the record.
    pub fn post_incident_update(
        &self,
        id: IncidentId,
        status: Option<IncidentStatus>,
        message: Option<String>,
        priority: Option<Severity>,
    ) -> Result<Delivery, BrokerError> {
        let patch = IncidentPatch {
            status,
            severity: priority,
            notes: message.clone(),
        };
        if patch.is_empty() {
            return Err(BrokerError::invalid(
                "status",
                "At least one update field is required",
            ));
        }
        if let Some(status) = status
            && status.is_terminal()
        {
            self.finish_incident(id, status, message, "backend")?;
            return Ok(Delivery::default());
        }
        let incident = self.incidents().update(id, patch)?;
        let delivery = self.broadcast(
            &incident_audience(id),
            "incident:update",
            &json!({
                "incidentId": id,
                "status": status,
                "message": message,
                "priority": priority,
                "updatedAt": incident.last_update,
                "source": "backend",
            }),
        );
        self.snapshot_incidents();
        Ok(delivery)
    }

    /// Remove an incident with a terminal status.
    ///
    /// The terminal event (`incident:resolved` or `incident:closed`) goes
    /// out before the incident topic is dropped, so its followers see it.
    pub fn finish_incident(
        &self,
        id: IncidentId,
        status: IncidentStatus,
        notes: Option<String>,
        by: &str,
    ) -> Result<Incident, BrokerError> {
        let (event, by_key, at_key) = match status {
            IncidentStatus::Resolved => ("incident:resolved", "resolvedBy", "resolvedAt"),
            IncidentStatus::Closed => ("incident:closed", "closedBy", "closedAt"),
            IncidentStatus::Reported | IncidentStatus::Assigned | IncidentStatus::InProgress => {
                return Err(BrokerError::invalid(
                    "status",
                    "Only RESOLVED or CLOSED finish an incident",
                ));
            }
        };
        let incident = self.incidents().finish(id, status, notes)?;

        let mut payload = json!({
            "incidentId": id,
            "status": status,
            "resolutionNotes": incident.notes,
            "incident": incident,
        });
        if let Value::Object(map) = &mut payload {
            map.insert(by_key.to_owned(), json!(by));
            map.insert(at_key.to_owned(), json!(incident.last_update));
        }
        self.broadcast(&incident_audience(id), event, &payload);
        self.sessions().drop_topic(&Topic::Incident(id));
        self.snapshot_incidents();
        Ok(incident)
    }

    /// Assign responders to an incident and notify each of them.
    pub fn assign_responders(
        &self,
        id: IncidentId,
        responders: &[ResponderId],
        priority: Option<Severity>,
        eta: Option<u32>,
        by: &str,
    ) -> Result<(Incident, Value), BrokerError> {
        if responders.is_empty() {
            return Err(BrokerError::invalid(
                "responderIds",
                "Responder IDs are required",
            ));
        }
        let incident = self.incidents().assign(id, responders)?;
        let assignment = json!({
            "incidentId": id,
            "responderIds": responders,
            "priority": priority.unwrap_or_default(),
            "eta": eta,
            "assignedAt": incident.last_update,
            "assignedBy": by,
        });
        for responder in responders {
            self.broadcast(
                &[Topic::Responder(responder.clone())],
                "responder:assignment",
                &assignment,
            );
        }
        self.broadcast(&incident_audience(id), "incident:assignment", &assignment);
        self.snapshot_incidents();
        tracing::info!(incident_id = %id, responders = responders.len(), "responders assigned");
        Ok((incident, assignment))
    }

    /// Incidents a responder is assigned to, newest first.
    pub fn responder_assignments(
        &self,
        responder: &ResponderId,
        status: Option<IncidentStatus>,
        limit: usize,
    ) -> Vec<Incident> {
        self.incidents()
            .all()
            .into_iter()
            .filter(|i| i.assigned_responders.contains(responder))
            .filter(|i| status.is_none_or(|s| i.status == s))
            .take(limit)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Responders
    // -----------------------------------------------------------------------

    /// Record a responder's position and show it to the command center.
    pub fn record_location(
        &self,
        responder: &ResponderId,
        responder_type: Option<ResponderType>,
        update: &LocationUpdate,
    ) -> Result<ResponderLocationEntry, BrokerError> {
        let entry = self.responders().upsert(responder, responder_type, update)?;
        self.broadcast(&Topic::COMMAND_CENTER, "location:responder_update", &entry);
        self.snapshot_sink()
            .submit(CacheWrite::ResponderLocation(entry.clone()));
        tracing::debug!(
            responder_id = %responder,
            latitude = entry.latitude,
            longitude = entry.longitude,
            "responder location updated"
        );
        Ok(entry)
    }

    /// Change a responder's availability.
    ///
    /// OFFLINE is refused: the broker sets it itself when the responder's
    /// last session leaves.
    pub fn set_responder_status(
        &self,
        responder: &ResponderId,
        status: ResponderStatus,
        incident_id: Option<IncidentId>,
    ) -> Result<Option<ResponderLocationEntry>, BrokerError> {
        if status == ResponderStatus::Offline {
            return Err(BrokerError::invalid(
                "status",
                "OFFLINE is set by the broker when a responder disconnects",
            ));
        }
        let entry = self.responders().set_status(responder, status);
        if let Some(entry) = entry.as_ref() {
            self.snapshot_sink()
                .submit(CacheWrite::ResponderLocation(entry.clone()));
        }

        let update = json!({
            "responderId": responder,
            "status": status,
            "incidentId": incident_id,
            "updatedAt": Utc::now(),
        });
        self.broadcast(&Topic::COMMAND_CENTER, "responder:status_update", &update);
        if let Some(incident) = incident_id {
            self.broadcast(
                &[Topic::Incident(incident)],
                "responder:incident_status_update",
                &update,
            );
        }
        self.broadcast(
            &[Topic::Responder(responder.clone())],
            "responder:status_confirmed",
            &update,
        );
        tracing::info!(responder_id = %responder, ?status, "responder status updated");
        Ok(entry)
    }

    /// Send a direct message to one responder unit.
    pub fn message_responder(
        &self,
        responder: &ResponderId,
        message: &str,
        priority: Option<Severity>,
        from: &str,
    ) -> Result<Delivery, BrokerError> {
        non_empty("message", message, "Message is required")?;
        Ok(self.broadcast(
            &[Topic::Responder(responder.clone())],
            "responder:message",
            &json!({
                "responderId": responder,
                "message": message,
                "priority": priority.unwrap_or_default(),
                "from": from,
                "sentAt": Utc::now(),
            }),
        ))
    }

    /// Message every responder, or every responder of one kind.
    pub fn broadcast_to_responders(
        &self,
        responder_type: Option<ResponderType>,
        message: &str,
        priority: Option<Severity>,
    ) -> Result<Delivery, BrokerError> {
        non_empty("message", message, "Message is required")?;
        let topic = responder_type.map_or(Topic::Role(Role::Responder), Topic::ResponderType);
        Ok(self.broadcast(
            slice::from_ref(&topic),
            "responder:broadcast",
            &json!({
                "message": message,
                "responderType": responder_type,
                "priority": priority.unwrap_or_default(),
                "sentAt": Utc::now(),
            }),
        ))
    }

    /// Order every responder back to base.
    pub fn emergency_recall(
        &self,
        reason: Option<String>,
        priority: Option<Severity>,
        by: &str,
    ) -> (Value, Delivery) {
        let order = json!({
            "id": AlertId::new(),
            "type": "EMERGENCY_RECALL",
            "reason": reason
                .unwrap_or_else(|| "Emergency situation requires immediate return".to_owned()),
            "priority": priority.unwrap_or(Severity::Critical),
            "issuedAt": Utc::now(),
            "issuedBy": by,
        });
        let delivery = self.broadcast(
            &[Topic::Role(Role::Responder)],
            "responder:emergency_recall",
            &order,
        );
        self.broadcast(&Topic::COMMAND_CENTER, "system:emergency_recall_issued", &order);
        tracing::warn!(issued_by = by, recipients = delivery.delivered, "emergency recall issued");
        (order, delivery)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Validate and broadcast an emergency alert to its audience.
    pub fn issue_alert(
        &self,
        request: EmergencyAlertRequest,
        by: &str,
    ) -> Result<(Alert, Delivery), BrokerError> {
        request.validate()?;
        let issued_at = Utc::now();
        let alert = Alert {
            id: AlertId::new(),
            kind: request.kind,
            message: request.message,
            severity: request.severity,
            target_audience: request.target_audience,
            incident_id: request.incident_id,
            issued_by: by.to_owned(),
            issued_at,
            expires_at: request
                .expires_in_minutes
                .and_then(|minutes| TimeDelta::try_minutes(i64::from(minutes)))
                .and_then(|ttl| issued_at.checked_add_signed(ttl)),
        };
        let event = "notification:emergency_alert";
        let delivery = match alert.target_audience {
            AlertAudience::All => self.broadcast_all(event, &alert),
            AlertAudience::Responders => {
                self.broadcast(&[Topic::Role(Role::Responder)], event, &alert)
            }
            AlertAudience::CommandCenter => self.broadcast(&Topic::COMMAND_CENTER, event, &alert),
        };
        tracing::warn!(
            alert_id = %alert.id,
            audience = ?alert.target_audience,
            severity = ?alert.severity,
            issued_by = by,
            recipients = delivery.delivered,
            "emergency alert issued"
        );
        Ok((alert, delivery))
    }

    /// Relay an arbitrary event from an integrated backend to one topic or
    /// to every session.
    pub fn external_broadcast(
        &self,
        event: &str,
        data: Value,
        topic: Option<&Topic>,
        priority: Option<Severity>,
    ) -> Result<Delivery, BrokerError> {
        non_empty("event", event, "Event and data are required")?;
        if data.is_null() {
            return Err(BrokerError::invalid("data", "Event and data are required"));
        }
        let mut payload = match data {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".to_owned(), other);
                map
            }
        };
        payload.insert("timestamp".to_owned(), json!(Utc::now()));
        payload.insert("priority".to_owned(), json!(priority.unwrap_or_default()));
        payload.insert("source".to_owned(), json!("external_api"));

        let delivery = match topic {
            Some(topic) => self.broadcast(slice::from_ref(topic), event, &payload),
            None => self.broadcast_all(event, &payload),
        };
        tracing::info!(
            event,
            topic = ?topic,
            recipients = delivery.delivered,
            "external broadcast sent"
        );
        Ok(delivery)
    }
}
