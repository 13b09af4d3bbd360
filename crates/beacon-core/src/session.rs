//! Live session tracking.
//!
//! [`SessionRegistry`] owns every session and the [`TopicMap`] that
//! addresses them. Each session gets a bounded outbound queue; the transport
//! task drains it. Publishing never blocks: a frame that does not fit in a
//! full queue is dropped and the session is reported as a slow consumer so
//! the broker can disconnect it.
//!
//! All mutation happens under one lock, so `touch`, `leave` and the
//! heartbeat sweep on the same session serialize. `leave` returns the
//! departed session exactly once, which is what makes disconnect cleanup
//! idempotent.
//!
//! A session may be inside an event (between [`SessionRegistry::begin_event`]
//! and [`SessionRegistry::end_event`]). A `leave` that arrives then is
//! recorded and carried out by `end_event`, so an event's registry writes
//! always land before its session's cleanup, never after.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use beacon_types::{
    DisconnectReason, Identity, ResponderProfile, Role, ServerFrame, SessionId, UserId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::topic::{Topic, TopicMap};

/// What the broker asks a session's transport task to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// Write a frame to the client.
    Deliver(Arc<ServerFrame>),
    /// Send a liveness probe (a WebSocket ping).
    Probe,
    /// Close the connection.
    Close(DisconnectReason),
}

/// Returned by [`SessionRegistry::join`]; the transport side of a session.
#[derive(Debug)]
pub struct SessionHandle {
    /// Session identifier, valid until the session leaves.
    pub id: SessionId,
    /// Identity fixed at join time.
    pub identity: Identity,
    /// Frames and control signals for the transport to act on.
    pub outbound: mpsc::Receiver<SessionSignal>,
}

/// What remains of a session after [`SessionRegistry::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartedSession {
    /// The session that left.
    pub id: SessionId,
    /// Its identity.
    pub identity: Identity,
    /// Responder profile registered during the session, if any.
    pub profile: Option<ResponderProfile>,
    /// When it joined.
    pub connected_at: DateTime<Utc>,
    /// Why it left.
    pub reason: DisconnectReason,
    /// Whether no other live session carries the same responder id.
    pub last_for_responder: bool,
}

/// Result of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sessions the frame was queued for.
    pub delivered: usize,
    /// Sessions whose queue was full; the frame was dropped for them.
    pub slow: Vec<SessionId>,
}

/// Public view of one live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedUser {
    /// Session identifier.
    pub session_id: SessionId,
    /// User behind the session.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Role.
    pub role: Role,
    /// When the session joined.
    pub connected_at: DateTime<Utc>,
    /// Seconds since the last inbound event.
    pub idle_seconds: u64,
}

#[derive(Debug)]
struct SessionEntry {
    identity: Identity,
    topics: BTreeSet<Topic>,
    profile: Option<ResponderProfile>,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
    awaiting_probe: bool,
    in_event: bool,
    pending_leave: Option<DisconnectReason>,
    sender: mpsc::Sender<SessionSignal>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    topics: TopicMap,
}

/// Registry of live sessions and their topic subscriptions.
#[derive(Debug)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    queue_capacity: usize,
}

impl SessionRegistry {
    /// An empty registry whose sessions buffer `queue_capacity` frames.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session for `identity` and subscribe it to its role topic,
    /// its user topic and, for responders, its responder topic.
    pub fn join(&self, identity: Identity) -> SessionHandle {
        let id = SessionId::new();
        let (sender, outbound) = mpsc::channel(self.queue_capacity);

        let mut topics = BTreeSet::new();
        topics.insert(Topic::Role(identity.role));
        topics.insert(Topic::User(identity.id.clone()));
        if let Some(responder) = identity.responder_id.as_ref() {
            topics.insert(Topic::Responder(responder.clone()));
        }

        let mut inner = self.write();
        for topic in &topics {
            inner.topics.join(topic.clone(), id);
        }
        inner.sessions.insert(
            id,
            SessionEntry {
                identity: identity.clone(),
                topics,
                profile: None,
                connected_at: Utc::now(),
                last_activity: Instant::now(),
                awaiting_probe: false,
                in_event: false,
                pending_leave: None,
                sender,
            },
        );
        drop(inner);

        tracing::debug!(
            session_id = %id,
            user_id = %identity.id,
            role = %identity.role,
            "session joined"
        );
        SessionHandle {
            id,
            identity,
            outbound,
        }
    }

    /// Record inbound activity. Returns `false` for an unknown session.
    pub fn touch(&self, id: SessionId) -> bool {
        let mut inner = self.write();
        inner.sessions.get_mut(&id).is_some_and(|entry| {
            entry.last_activity = Instant::now();
            true
        })
    }

    /// Mark `id` as processing an inbound event and record the activity.
    ///
    /// Returns its identity, or `None` for a session that has left or is
    /// about to.
    pub fn begin_event(&self, id: SessionId) -> Option<Identity> {
        let mut inner = self.write();
        let entry = inner.sessions.get_mut(&id)?;
        if entry.pending_leave.is_some() {
            return None;
        }
        entry.last_activity = Instant::now();
        entry.in_event = true;
        Some(entry.identity.clone())
    }

    /// Finish the event started by [`begin_event`](Self::begin_event).
    ///
    /// If a `leave` arrived meanwhile, the session departs now and the
    /// departure is returned for the caller to clean up.
    pub fn end_event(&self, id: SessionId) -> Option<DepartedSession> {
        let mut inner = self.write();
        let entry = inner.sessions.get_mut(&id)?;
        entry.in_event = false;
        let reason = entry.pending_leave.take()?;
        Self::depart(inner, id, reason)
    }

    /// Remove a session, unsubscribe it everywhere and tell its transport to
    /// close. Returns `None` if it had already left, or if it is inside an
    /// event: the departure is then deferred to [`end_event`](Self::end_event).
    pub fn leave(&self, id: SessionId, reason: DisconnectReason) -> Option<DepartedSession> {
        let mut inner = self.write();
        let entry = inner.sessions.get_mut(&id)?;
        if entry.in_event {
            if entry.pending_leave.is_none() {
                entry.pending_leave = Some(reason);
                tracing::debug!(session_id = %id, %reason, "leave deferred until event completes");
            }
            return None;
        }
        Self::depart(inner, id, reason)
    }

    fn depart(
        mut inner: RwLockWriteGuard<'_, Inner>,
        id: SessionId,
        reason: DisconnectReason,
    ) -> Option<DepartedSession> {
        let entry = inner.sessions.remove(&id)?;
        for topic in &entry.topics {
            inner.topics.leave(topic, id);
        }
        let last_for_responder = entry.identity.responder_id.as_ref().is_some_and(|responder| {
            inner.topics.subscriber_count(&Topic::Responder(responder.clone())) == 0
        });
        drop(inner);

        // Best effort: if the queue is full the dropped sender still ends
        // the transport's receive loop.
        let _ = entry.sender.try_send(SessionSignal::Close(reason));
        tracing::debug!(session_id = %id, user_id = %entry.identity.id, %reason, "session left");
        Some(DepartedSession {
            id,
            identity: entry.identity,
            profile: entry.profile,
            connected_at: entry.connected_at,
            reason,
            last_for_responder,
        })
    }

    /// Whether `id` is a live session.
    pub fn contains(&self, id: SessionId) -> bool {
        self.read().sessions.contains_key(&id)
    }

    /// The identity of a live session.
    pub fn identity(&self, id: SessionId) -> Option<Identity> {
        self.read().sessions.get(&id).map(|e| e.identity.clone())
    }

    /// The responder profile registered on a session.
    pub fn profile(&self, id: SessionId) -> Option<ResponderProfile> {
        self.read().sessions.get(&id).and_then(|e| e.profile.clone())
    }

    /// Attach a responder profile to a session and subscribe it to its
    /// `responder_type:<TYPE>` topic.
    pub fn set_profile(&self, id: SessionId, profile: ResponderProfile) -> bool {
        let mut inner = self.write();
        let Inner { sessions, topics } = &mut *inner;
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        if let Some(previous) = entry.profile.as_ref() {
            let old = Topic::ResponderType(previous.responder_type);
            topics.leave(&old, id);
            entry.topics.remove(&old);
        }
        let topic = Topic::ResponderType(profile.responder_type);
        topics.join(topic.clone(), id);
        entry.topics.insert(topic);
        entry.profile = Some(profile);
        true
    }

    /// Subscribe a live session to `topic`.
    pub fn subscribe(&self, id: SessionId, topic: Topic) -> bool {
        let mut inner = self.write();
        let Inner { sessions, topics } = &mut *inner;
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        topics.join(topic.clone(), id);
        entry.topics.insert(topic);
        true
    }

    /// Unsubscribe a live session from `topic`.
    pub fn unsubscribe(&self, id: SessionId, topic: &Topic) -> bool {
        let mut inner = self.write();
        let Inner { sessions, topics } = &mut *inner;
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        entry.topics.remove(topic);
        topics.leave(topic, id)
    }

    /// Drop a topic entirely (e.g. after an incident is resolved).
    pub fn drop_topic(&self, topic: &Topic) {
        let mut inner = self.write();
        let Inner { sessions, topics } = &mut *inner;
        for id in topics.drop_topic(topic) {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.topics.remove(topic);
            }
        }
    }

    /// Queue `frame` for every session subscribed to any of `topics`. A
    /// session subscribed to several of them receives it once.
    pub fn publish<'a>(
        &self,
        topics: impl IntoIterator<Item = &'a Topic>,
        frame: ServerFrame,
    ) -> Delivery {
        let inner = self.read();
        let targets = inner.topics.resolve(topics);
        let senders = targets
            .into_iter()
            .filter_map(|id| inner.sessions.get(&id).map(|e| (id, e.sender.clone())));
        deliver(senders, &Arc::new(frame))
    }

    /// Queue `frame` for every live session.
    pub fn publish_all(&self, frame: ServerFrame) -> Delivery {
        let inner = self.read();
        let senders = inner
            .sessions
            .iter()
            .map(|(id, e)| (*id, e.sender.clone()));
        deliver(senders, &Arc::new(frame))
    }

    /// Queue `frame` for one session.
    pub fn send_to(&self, id: SessionId, frame: ServerFrame) -> Delivery {
        let inner = self.read();
        let sender = inner.sessions.get(&id).map(|e| (id, e.sender.clone()));
        deliver(sender, &Arc::new(frame))
    }

    /// One heartbeat round: sessions still owing an answer to the previous
    /// probe are returned as dead; every other session is probed again.
    pub fn probe_sweep(&self) -> Vec<SessionId> {
        let mut inner = self.write();
        let mut dead = Vec::new();
        for (id, entry) in &mut inner.sessions {
            if entry.awaiting_probe {
                dead.push(*id);
                continue;
            }
            entry.awaiting_probe = true;
            if let Err(TrySendError::Closed(_)) = entry.sender.try_send(SessionSignal::Probe) {
                dead.push(*id);
            }
        }
        dead
    }

    /// Record the answer to a liveness probe.
    pub fn acknowledge_probe(&self, id: SessionId) {
        if let Some(entry) = self.write().sessions.get_mut(&id) {
            entry.awaiting_probe = false;
        }
    }

    /// Live topics with their subscriber counts, sorted by topic.
    pub fn topics(&self) -> Vec<(Topic, usize)> {
        self.read().topics.topics()
    }

    /// Every live session id.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.read().sessions.keys().copied().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.read().sessions.is_empty()
    }

    /// Live sessions per role.
    pub fn count_by_role(&self) -> HashMap<Role, usize> {
        let mut counts = HashMap::new();
        for entry in self.read().sessions.values() {
            let count = counts.entry(entry.identity.role).or_insert(0_usize);
            *count = count.saturating_add(1);
        }
        counts
    }

    /// Subscribers of one topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.read().topics.subscriber_count(topic)
    }

    /// Public view of every live session, oldest first.
    pub fn connected_users(&self) -> Vec<ConnectedUser> {
        let inner = self.read();
        let mut users: Vec<ConnectedUser> = inner
            .sessions
            .iter()
            .map(|(id, e)| ConnectedUser {
                session_id: *id,
                user_id: e.identity.id.clone(),
                display_name: e.identity.display_name.clone(),
                role: e.identity.role,
                connected_at: e.connected_at,
                idle_seconds: e.last_activity.elapsed().as_secs(),
            })
            .collect();
        users.sort_by_key(|u| u.connected_at);
        users
    }
}

fn deliver(
    senders: impl IntoIterator<Item = (SessionId, mpsc::Sender<SessionSignal>)>,
    frame: &Arc<ServerFrame>,
) -> Delivery {
    let mut delivery = Delivery::default();
    for (id, sender) in senders {
        match sender.try_send(SessionSignal::Deliver(Arc::clone(frame))) {
            Ok(()) => delivery.delivered = delivery.delivered.saturating_add(1),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %id,
                    event = %frame.event,
                    "outbound queue full, frame dropped"
                );
                delivery.slow.push(id);
            }
            // The transport is already gone; its leave is on the way.
            Err(TrySendError::Closed(_)) => {}
        }
    }
    delivery
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use beacon_types::{IncidentId, ResponderId, ResponderType};
    use serde_json::json;

    use super::*;

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: UserId::from(id),
            display_name: id.to_owned(),
            role,
            responder_id: (role == Role::Responder).then(|| ResponderId::from(id)),
        }
    }

    fn frame(event: &str) -> ServerFrame {
        ServerFrame::from_value(event, json!({}))
    }

    fn next_event(handle: &mut SessionHandle) -> Option<String> {
        match handle.outbound.try_recv().ok()? {
            SessionSignal::Deliver(frame) => Some(frame.event.clone()),
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn join_subscribes_role_and_user_topics() {
        let registry = SessionRegistry::new(8);
        let mut op = registry.join(identity("op", Role::Operator));
        let mut citizen = registry.join(identity("cit", Role::Citizen));

        registry.publish(&[Topic::Role(Role::Operator)], frame("ops-only"));
        registry.publish(&[Topic::User(UserId::from("cit"))], frame("direct"));

        assert_eq!(next_event(&mut op).as_deref(), Some("ops-only"));
        assert_eq!(next_event(&mut op), None);
        assert_eq!(next_event(&mut citizen).as_deref(), Some("direct"));
    }

    #[test]
    fn responder_joins_its_unit_topic() {
        let registry = SessionRegistry::new(8);
        let mut unit = registry.join(identity("r1", Role::Responder));
        registry.publish(&[Topic::Responder(ResponderId::from("r1"))], frame("assignment"));
        assert_eq!(next_event(&mut unit).as_deref(), Some("assignment"));
    }

    #[test]
    fn multi_topic_publish_delivers_once() {
        let registry = SessionRegistry::new(8);
        let mut admin = registry.join(identity("a", Role::Admin));
        let incident = Topic::Incident(IncidentId::new());
        registry.subscribe(admin.id, incident.clone());

        let topics = [incident, Topic::Role(Role::Admin)];
        let delivery = registry.publish(&topics, frame("incident:update"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(next_event(&mut admin).as_deref(), Some("incident:update"));
        assert_eq!(next_event(&mut admin), None);
    }

    #[test]
    fn leave_is_idempotent_and_closes_transport() {
        let registry = SessionRegistry::new(8);
        let mut handle = registry.join(identity("u", Role::Citizen));
        let first = registry.leave(handle.id, DisconnectReason::HeartbeatTimeout);
        let second = registry.leave(handle.id, DisconnectReason::TransportClosed);
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(
            handle.outbound.try_recv().ok(),
            Some(SessionSignal::Close(DisconnectReason::HeartbeatTimeout))
        );
        assert!(!registry.touch(handle.id));
        assert_eq!(registry.subscriber_count(&Topic::Role(Role::Citizen)), 0);
    }

    #[test]
    fn leave_during_an_event_waits_for_the_event_to_end() {
        let registry = SessionRegistry::new(8);
        let mut handle = registry.join(identity("r1", Role::Responder));
        assert!(registry.begin_event(handle.id).is_some());

        assert!(registry.leave(handle.id, DisconnectReason::HeartbeatTimeout).is_none());
        assert!(registry.leave(handle.id, DisconnectReason::TransportClosed).is_none());
        assert!(registry.contains(handle.id));
        assert!(registry.begin_event(handle.id).is_none());

        let departed = registry.end_event(handle.id).unwrap();
        assert_eq!(departed.reason, DisconnectReason::HeartbeatTimeout);
        assert!(departed.last_for_responder);
        assert!(!registry.contains(handle.id));
        assert_eq!(
            handle.outbound.try_recv().ok(),
            Some(SessionSignal::Close(DisconnectReason::HeartbeatTimeout))
        );
        assert!(registry.end_event(handle.id).is_none());
    }

    #[test]
    fn only_the_last_session_of_a_responder_is_reported_last() {
        let registry = SessionRegistry::new(8);
        let old = registry.join(identity("r1", Role::Responder));
        let new = registry.join(identity("r1", Role::Responder));

        let first = registry.leave(old.id, DisconnectReason::HeartbeatTimeout).unwrap();
        let second = registry.leave(new.id, DisconnectReason::TransportClosed).unwrap();
        assert!(!first.last_for_responder);
        assert!(second.last_for_responder);
    }

    #[test]
    fn full_queue_reports_slow_consumer() {
        let registry = SessionRegistry::new(1);
        let handle = registry.join(identity("slow", Role::Citizen));
        let first = registry.send_to(handle.id, frame("one"));
        let second = registry.send_to(handle.id, frame("two"));
        assert_eq!(first.delivered, 1);
        assert_eq!(second.slow, vec![handle.id]);
    }

    #[test]
    fn unanswered_probe_marks_session_dead() {
        let registry = SessionRegistry::new(8);
        let alive = registry.join(identity("alive", Role::Citizen));
        let silent = registry.join(identity("silent", Role::Citizen));

        assert!(registry.probe_sweep().is_empty());
        registry.acknowledge_probe(alive.id);
        assert_eq!(registry.probe_sweep(), vec![silent.id]);
    }

    #[test]
    fn profile_moves_type_topic() {
        let registry = SessionRegistry::new(8);
        let handle = registry.join(identity("r", Role::Responder));
        registry.set_profile(
            handle.id,
            ResponderProfile {
                responder_type: ResponderType::Fire,
                vehicle_id: None,
            },
        );
        registry.set_profile(
            handle.id,
            ResponderProfile {
                responder_type: ResponderType::Medical,
                vehicle_id: Some("AMB-4".to_owned()),
            },
        );
        assert_eq!(
            registry.subscriber_count(&Topic::ResponderType(ResponderType::Fire)),
            0
        );
        assert_eq!(
            registry.subscriber_count(&Topic::ResponderType(ResponderType::Medical)),
            1
        );
    }
}
