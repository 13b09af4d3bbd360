//! Inbound event pipeline.
//!
//! Every frame a session sends runs these stages in order; the first
//! failure ends processing and is reported to that session alone:
//!
//! 1. Envelope -- is the frame a JSON `{event, data}` object?
//! 2. Allow-list -- is `event` a known [`EventName`]?
//! 3. Rate limit -- has this session sent this event too often?
//! 4. Decode -- does `data` match the event's payload type?
//! 5. Sanitize -- strip markup from free-text fields
//! 6. Authorize -- may the session's role send this event?
//! 7. Validate -- field-level checks on the payload
//! 8. Dispatch -- run the handler, isolating panics
//!
//! Envelope, allow-list and rate-limit failures are reported with the plain
//! `error` event; later failures use `<domain>:error` for the event's
//! domain.

use std::panic::{AssertUnwindSafe, catch_unwind};

use beacon_types::{ClientEvent, EventName, Identity, InboundFrame, Role, SessionId};
use serde::Serialize;
use validator::Validate;

use crate::broker::Broker;
use crate::error::{BrokerError, FieldError};
use crate::sanitize::Sanitize;

/// Roles allowed to send an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Every authenticated session.
    Anyone,
    /// ADMIN and OPERATOR.
    CommandCenter,
    /// RESPONDER only.
    Responder,
    /// ADMIN, OPERATOR and RESPONDER.
    Staff,
}

impl Access {
    /// Access rule for each allow-listed event.
    pub const fn of(event: EventName) -> Self {
        match event {
            EventName::IncidentCreate
            | EventName::IncidentGetDetails
            | EventName::IncidentSubscribe
            | EventName::IncidentUnsubscribe => Self::Anyone,
            EventName::IncidentUpdateStatus
            | EventName::IncidentResolve
            | EventName::IncidentGetActive
            | EventName::LocationGetNearbyResponders
            | EventName::LocationGetAllResponders
            | EventName::NotificationEmergencyAlert => Self::CommandCenter,
            EventName::ResponderRegister
            | EventName::ResponderUpdateStatus
            | EventName::ResponderAcknowledgeAssignment
            | EventName::ResponderFieldUpdate
            | EventName::LocationUpdate => Self::Responder,
            EventName::NotificationIncident => Self::Staff,
        }
    }

    /// Whether `role` satisfies the rule.
    pub const fn permits(self, role: Role) -> bool {
        match self {
            Self::Anyone => true,
            Self::CommandCenter => role.is_command_center(),
            Self::Responder => matches!(role, Role::Responder),
            Self::Staff => !matches!(role, Role::Citizen),
        }
    }
}

/// The session an event came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Originating session.
    pub session: SessionId,
    /// Its identity.
    pub identity: Identity,
}

/// Body of an error frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReply<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
}

/// Stage 1: parse the envelope.
pub fn parse_envelope(text: &str) -> Result<InboundFrame, BrokerError> {
    serde_json::from_str(text).map_err(|e| BrokerError::malformed(&e))
}

/// Stage 2: look the event name up in the allow-list.
pub fn allow_listed(name: &str) -> Result<EventName, BrokerError> {
    EventName::parse(name).ok_or_else(|| BrokerError::invalid("event", "Unknown event"))
}

/// Stage 6: check the caller's role against the event's access rule.
pub fn authorize(role: Role, event: EventName) -> Result<(), BrokerError> {
    if Access::of(event).permits(role) {
        Ok(())
    } else {
        Err(BrokerError::Authorization(format!(
            "Role {role} may not send {event}"
        )))
    }
}

/// Stage 7: payload validation.
///
/// Payloads the REST surface shares (incident reports, positions, alerts,
/// responder status) are validated by the operation itself, so both entry
/// points apply the same rules; listing bounds are checked by the store.
pub fn validate(event: &ClientEvent) -> Result<(), BrokerError> {
    match event {
        ClientEvent::UpdateIncidentStatus(p) => p.validate()?,
        ClientEvent::ResolveIncident(p) => p.validate()?,
        ClientEvent::RegisterResponder(p) => p.validate()?,
        ClientEvent::AcknowledgeAssignment(p) => p.validate()?,
        ClientEvent::FieldUpdate(p) => p.validate()?,
        ClientEvent::GetNearbyResponders(p) => p.validate()?,
        ClientEvent::IncidentNotification(p) => p.validate()?,
        ClientEvent::CreateIncident(_)
        | ClientEvent::GetActiveIncidents(_)
        | ClientEvent::GetIncidentDetails(_)
        | ClientEvent::SubscribeIncident(_)
        | ClientEvent::UnsubscribeIncident(_)
        | ClientEvent::UpdateResponderStatus(_)
        | ClientEvent::UpdateLocation(_)
        | ClientEvent::GetAllResponders
        | ClientEvent::EmergencyAlert(_) => {}
    }
    Ok(())
}

impl Broker {
    /// Run one inbound text frame through the pipeline.
    ///
    /// Frames from one session must be fed in arrival order by a single
    /// task; that is what orders a session's events and broadcasts. A
    /// disconnect that arrives mid-event is applied once the event is done.
    pub fn handle_frame(&self, session: SessionId, text: &str) {
        let Some(identity) = self.sessions().begin_event(session) else {
            return;
        };
        self.process_frame(&Caller { session, identity }, text);
        if let Some(departed) = self.sessions().end_event(session) {
            self.clean_up(&departed);
        }
    }

    fn process_frame(&self, caller: &Caller, text: &str) {
        let session = caller.session;

        let frame = match parse_envelope(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(session_id = %session, error = %err, "malformed frame");
                self.reply_error(session, "error", None, &err);
                return;
            }
        };
        let name = match allow_listed(&frame.event) {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(
                    target: "security",
                    session_id = %session,
                    user_id = %caller.identity.id,
                    event = %frame.event,
                    "unknown event rejected"
                );
                self.reply_error(session, "error", Some(&frame.event), &err);
                return;
            }
        };
        if let Err(err) = self.limiter().check_event(session, name) {
            self.reply_error(session, "error", Some(name.as_str()), &err);
            return;
        }

        let domain_error = format!("{}:error", name.domain());
        let result = ClientEvent::decode(name, frame.data)
            .map_err(|e| BrokerError::malformed(&e))
            .and_then(|mut event| {
                event.sanitize();
                authorize(caller.identity.role, name)?;
                validate(&event)?;
                Ok(event)
            })
            .and_then(|event| self.dispatch_isolated(caller, event));

        if let Err(err) = result {
            if let BrokerError::Authorization(reason) = &err {
                tracing::warn!(
                    target: "security",
                    session_id = %session,
                    role = %caller.identity.role,
                    event = %name,
                    reason,
                    "event refused"
                );
            }
            self.reply_error(session, &domain_error, Some(name.as_str()), &err);
        }
    }

    /// Stage 8: run the handler, turning a panic into an internal error.
    fn dispatch_isolated(&self, caller: &Caller, event: ClientEvent) -> Result<(), BrokerError> {
        let name = event.name();
        catch_unwind(AssertUnwindSafe(|| self.dispatch(caller, event))).unwrap_or_else(|payload| {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!(
                session_id = %caller.session,
                event = %name,
                detail,
                "event handler panicked"
            );
            Err(BrokerError::Internal(format!("handler for {name} panicked")))
        })
    }

    fn reply_error(
        &self,
        session: SessionId,
        event: &str,
        origin: Option<&str>,
        err: &BrokerError,
    ) {
        if let BrokerError::Internal(detail) | BrokerError::CacheUnavailable(detail) = err {
            tracing::error!(session_id = %session, error = %detail, "event failed");
        }
        let reply = ErrorReply {
            code: err.code(),
            message: err.client_message(),
            errors: err.field_errors(),
            retry_after: match err {
                BrokerError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            },
            event: origin,
        };
        self.send(session, event, &reply);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use serde_json::json;

    use super::*;
    use crate::config::{BrokerConfig, RateLimitConfig};
    use crate::test_support::{drain, identity};

    fn frame(event: &str, data: &serde_json::Value) -> String {
        json!({ "event": event, "data": data }).to_string()
    }

    #[test]
    fn access_table_matches_roles() {
        assert!(Access::of(EventName::IncidentCreate).permits(Role::Citizen));
        assert!(!Access::of(EventName::IncidentResolve).permits(Role::Citizen));
        assert!(!Access::of(EventName::IncidentResolve).permits(Role::Responder));
        assert!(Access::of(EventName::IncidentResolve).permits(Role::Operator));
        assert!(!Access::of(EventName::LocationUpdate).permits(Role::Admin));
        assert!(Access::of(EventName::LocationUpdate).permits(Role::Responder));
        assert!(Access::of(EventName::NotificationIncident).permits(Role::Responder));
        assert!(!Access::of(EventName::NotificationIncident).permits(Role::Citizen));
    }

    #[test]
    fn unknown_event_gets_generic_error() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut citizen = broker.connect(identity("c", Role::Citizen));
        drain(&mut citizen);

        broker.handle_frame(citizen.id, &frame("admin:drop_everything", &json!({})));
        let replies = drain(&mut citizen);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].event, "error");
        assert_eq!(replies[0].data["event"], "admin:drop_everything");
    }

    #[test]
    fn malformed_envelope_is_reported() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut citizen = broker.connect(identity("c", Role::Citizen));
        drain(&mut citizen);

        broker.handle_frame(citizen.id, "not json");
        let replies = drain(&mut citizen);
        assert_eq!(replies[0].event, "error");
        assert_eq!(replies[0].data["code"], "VALIDATION_ERROR");
    }

    #[test]
    fn wrong_role_is_refused_to_sender_only() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut citizen = broker.connect(identity("c", Role::Citizen));
        let mut operator = broker.connect(identity("op", Role::Operator));
        drain(&mut citizen);
        drain(&mut operator);

        broker.handle_frame(citizen.id, &frame("location:get_all_responders", &json!(null)));
        let replies = drain(&mut citizen);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].event, "location:error");
        assert_eq!(replies[0].data["code"], "AUTHORIZATION_ERROR");
        assert!(drain(&mut operator).is_empty());
    }

    #[test]
    fn validation_errors_carry_field_reasons() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut responder = broker.connect(identity("unit", Role::Responder));
        drain(&mut responder);

        broker.handle_frame(
            responder.id,
            &frame("location:update", &json!({ "latitude": 95.0, "longitude": 10.0 })),
        );
        let replies = drain(&mut responder);
        assert_eq!(replies[0].event, "location:error");
        assert_eq!(replies[0].data["errors"][0]["field"], "latitude");
    }

    #[test]
    fn offline_status_cannot_be_sent() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut responder = broker.connect(identity("unit", Role::Responder));
        drain(&mut responder);

        broker.handle_frame(
            responder.id,
            &frame("responder:update_status", &json!({ "status": "OFFLINE" })),
        );
        let replies = drain(&mut responder);
        assert_eq!(replies[0].event, "responder:error");
        assert_eq!(replies[0].data["errors"][0]["field"], "status");
    }

    #[test]
    fn events_past_the_limit_are_dropped() {
        let broker = Broker::in_memory(BrokerConfig {
            rate_limit: RateLimitConfig {
                event_max: 3,
                ..RateLimitConfig::default()
            },
            ..BrokerConfig::default()
        });
        let mut operator = broker.connect(identity("op", Role::Operator));
        drain(&mut operator);

        for _ in 0..5 {
            broker.handle_frame(operator.id, &frame("incident:get_active", &json!({})));
        }
        let replies = drain(&mut operator);
        let events: Vec<&str> = replies.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(
            events,
            vec![
                "incident:active_list",
                "incident:active_list",
                "incident:active_list",
                "error",
                "error",
            ]
        );
        assert_eq!(replies[3].data["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[test]
    fn frames_from_unknown_sessions_are_ignored() {
        let broker = Broker::in_memory(BrokerConfig::default());
        broker.handle_frame(SessionId::new(), &frame("incident:get_active", &json!({})));
        assert!(broker.sessions().is_empty());
    }
}
