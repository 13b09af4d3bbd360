//! The broker facade.
//!
//! [`Broker`] owns every registry and is shared (behind an `Arc`) by the
//! gateway's connection tasks, the REST handlers and the background tasks.
//! It has no locks of its own: each registry synchronizes internally, so
//! the broker is a plain composition of them.
//!
//! Connection lifecycle:
//!
//! 1. [`Broker::admit`] -- connection rate limit, credential check,
//!    emergency-mode and capacity gates
//! 2. [`Broker::connect`] -- join the session registry, send initial data
//! 3. [`Broker::handle_frame`] -- once per inbound frame (see `router`)
//! 4. [`Broker::disconnect`] -- idempotent cleanup

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use beacon_types::{
    DisconnectReason, Identity, ResponderStatus, Role, ServerFrame, SessionId, Severity,
    SystemStatistics,
};
use chrono::Utc;
use serde::Serialize;

use crate::auth::{AuthGate, CredentialSources};
use crate::cache::{CacheWrite, NoopSink, SnapshotSink};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::incidents::{IncidentRepository, IncidentStore};
use crate::rate_limit::RateLimiter;
use crate::responders::{ResponderLocationIndex, ResponderRepository};
use crate::session::{DepartedSession, Delivery, SessionHandle, SessionRegistry};
use crate::topic::Topic;

/// Counters from one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Responder entries dropped for staleness.
    pub stale_responders: usize,
    /// Idle rate-limit keys dropped.
    pub idle_rate_keys: usize,
}

/// The coordination broker.
pub struct Broker {
    config: BrokerConfig,
    auth: AuthGate,
    limiter: RateLimiter,
    sessions: SessionRegistry,
    incidents: Arc<dyn IncidentRepository>,
    responders: Arc<dyn ResponderRepository>,
    cache: Arc<dyn SnapshotSink>,
    started: Instant,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("auth", &self.auth)
            .field("sessions", &self.sessions.len())
            .field("incidents", &self.incidents.count())
            .field("responders", &self.responders.count())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// A broker over in-memory registries, writing snapshots to `cache`.
    pub fn new(config: BrokerConfig, cache: Arc<dyn SnapshotSink>) -> Self {
        let incidents = Arc::new(IncidentStore::new());
        let responders = Arc::new(ResponderLocationIndex::new(&config.location));
        Self::with_repositories(config, incidents, responders, cache)
    }

    /// A broker with no cache behind it.
    pub fn in_memory(config: BrokerConfig) -> Self {
        Self::new(config, Arc::new(NoopSink))
    }

    /// A broker over caller-supplied registries.
    pub fn with_repositories(
        config: BrokerConfig,
        incidents: Arc<dyn IncidentRepository>,
        responders: Arc<dyn ResponderRepository>,
        cache: Arc<dyn SnapshotSink>,
    ) -> Self {
        Self {
            auth: AuthGate::new(&config.auth),
            limiter: RateLimiter::new(&config.rate_limit),
            sessions: SessionRegistry::new(config.session.outbound_queue),
            incidents,
            responders,
            cache,
            started: Instant::now(),
            config,
        }
    }

    /// Effective configuration.
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The credential gate.
    pub const fn auth(&self) -> &AuthGate {
        &self.auth
    }

    /// The session registry.
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The incident registry.
    pub fn incidents(&self) -> &dyn IncidentRepository {
        self.incidents.as_ref()
    }

    /// The responder location index.
    pub fn responders(&self) -> &dyn ResponderRepository {
        self.responders.as_ref()
    }

    pub(crate) const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Decide whether a connection attempt may proceed, and as whom.
    pub fn admit(
        &self,
        addr: IpAddr,
        credentials: &CredentialSources,
    ) -> Result<Identity, BrokerError> {
        self.limiter.check_connection(addr)?;
        let identity = self.auth.authenticate(credentials)?;

        if self.config.session.emergency_mode && identity.role == Role::Citizen {
            tracing::warn!(
                target: "security",
                %addr,
                user_id = %identity.id,
                "citizen connection refused in emergency mode"
            );
            return Err(BrokerError::Authorization(
                "Only command center and responder connections are accepted in emergency mode"
                    .to_owned(),
            ));
        }

        if self.sessions.len() >= self.config.session.max_connections {
            tracing::warn!(
                %addr,
                limit = self.config.session.max_connections,
                "connection refused, broker at capacity"
            );
            return Err(BrokerError::AtCapacity);
        }
        Ok(identity)
    }

    /// Register an admitted identity as a live session.
    ///
    /// Command-center sessions are sent the active incidents, the responder
    /// positions and the current statistics. Every session is then told the
    /// new user count.
    pub fn connect(&self, identity: Identity) -> SessionHandle {
        let handle = self.sessions.join(identity);
        tracing::info!(
            session_id = %handle.id,
            user_id = %handle.identity.id,
            role = %handle.identity.role,
            "user connected"
        );

        if handle.identity.role.is_command_center() {
            self.send(handle.id, "incidents:active", &self.incidents.all());
            self.send(handle.id, "responders:status", &self.responders.all());
            self.send(handle.id, "system:statistics", &self.statistics());
        }
        self.broadcast_user_count();
        handle
    }

    /// Tear a session down. Safe to call any number of times from any task;
    /// only the first call has effects. Returns whether this call did the
    /// cleanup.
    ///
    /// A session that is processing an event is torn down when the event
    /// finishes, by the task running it; this call then returns `false`.
    pub fn disconnect(&self, session: SessionId, reason: DisconnectReason) -> bool {
        let Some(departed) = self.sessions.leave(session, reason) else {
            return false;
        };
        self.clean_up(&departed);
        true
    }

    /// Side effects of a departure: forget rate-limit windows and, for a
    /// responder's last session, drop its position and report it offline.
    pub(crate) fn clean_up(&self, departed: &DepartedSession) {
        let reason = departed.reason;
        self.limiter.forget_session(departed.id);
        tracing::info!(
            session_id = %departed.id,
            user_id = %departed.identity.id,
            role = %departed.identity.role,
            %reason,
            "user disconnected"
        );

        if let Some(responder) = departed.identity.responder_id.as_ref()
            && departed.last_for_responder
        {
            self.responders.remove(responder);
            self.cache.submit(CacheWrite::RemoveResponder(responder.clone()));
            self.broadcast(
                &Topic::COMMAND_CENTER,
                "responder:status_update",
                &serde_json::json!({
                    "responderId": responder,
                    "status": ResponderStatus::Offline,
                    "reason": reason,
                    "updatedAt": Utc::now(),
                }),
            );
        }

        self.broadcast_user_count();
    }

    /// Disconnect every session (broker shutdown).
    pub fn disconnect_all(&self, reason: DisconnectReason) -> usize {
        self.sessions
            .session_ids()
            .into_iter()
            .filter(|id| self.disconnect(*id, reason))
            .count()
    }

    /// One liveness round: disconnect sessions that left the previous probe
    /// unanswered and probe the rest.
    pub fn heartbeat_sweep(&self) -> usize {
        let dead = self.sessions.probe_sweep();
        for session in &dead {
            tracing::info!(session_id = %session, "liveness probe unanswered");
            self.disconnect(*session, DisconnectReason::HeartbeatTimeout);
        }
        dead.len()
    }

    /// Periodic maintenance: prune stale responders, compact rate-limit
    /// windows and refresh the cached snapshots.
    pub fn housekeeping(&self) -> HousekeepingReport {
        let stale = self.responders.prune_stale();
        for responder in &stale {
            tracing::debug!(responder_id = %responder, "stale responder position pruned");
        }
        let report = HousekeepingReport {
            stale_responders: stale.len(),
            idle_rate_keys: self.limiter.compact(),
        };
        self.cache.submit(CacheWrite::Statistics(self.statistics()));
        self.cache.submit(CacheWrite::ResponderStatus(self.responders.all()));
        self.snapshot_incidents();
        report
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Publish `data` as `event` to every session on any of `topics`.
    pub fn broadcast(&self, topics: &[Topic], event: &str, data: &impl Serialize) -> Delivery {
        let delivery = self.sessions.publish(topics, ServerFrame::new(event, data));
        self.settle(&delivery);
        delivery
    }

    /// Publish `data` as `event` to every live session.
    pub fn broadcast_all(&self, event: &str, data: &impl Serialize) -> Delivery {
        let delivery = self.sessions.publish_all(ServerFrame::new(event, data));
        self.settle(&delivery);
        delivery
    }

    /// Send `data` as `event` to one session.
    pub fn send(&self, session: SessionId, event: &str, data: &impl Serialize) -> Delivery {
        let delivery = self.sessions.send_to(session, ServerFrame::new(event, data));
        self.settle(&delivery);
        delivery
    }

    /// Sessions whose queue overflowed are cut loose.
    fn settle(&self, delivery: &Delivery) {
        for session in &delivery.slow {
            self.disconnect(*session, DisconnectReason::SlowConsumer);
        }
    }

    fn broadcast_user_count(&self) {
        self.broadcast_all("system:userCount", &self.sessions.len());
    }

    // -----------------------------------------------------------------------
    // Snapshots and statistics
    // -----------------------------------------------------------------------

    pub(crate) fn snapshot_incidents(&self) {
        self.cache.submit(CacheWrite::ActiveIncidents(self.incidents.all()));
    }

    pub(crate) fn snapshot_sink(&self) -> &dyn SnapshotSink {
        self.cache.as_ref()
    }

    /// Seconds since the broker was built.
    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Current aggregate counters.
    pub fn statistics(&self) -> SystemStatistics {
        SystemStatistics {
            connected_users: to_u64(self.sessions.len()),
            active_incidents: to_u64(self.incidents.count()),
            critical_incidents: to_u64(self.incidents.count_severity(Severity::Critical)),
            online_responders: to_u64(self.responders.count()),
            available_responders: to_u64(
                self.responders.count_status(ResponderStatus::Available),
            ),
            uptime_seconds: self.uptime_seconds(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use std::net::Ipv4Addr;
    use std::sync::Mutex;
    use std::sync::mpsc;

    use beacon_types::{
        LocationUpdate, NearbyResponder, ResponderId, ResponderLocationEntry, ResponderType,
        UserId,
    };

    use super::*;
    use crate::config::{AuthConfig, LocationConfig, SessionConfig};
    use crate::responders::NearbySearch;
    use crate::session::SessionSignal;
    use crate::test_support::{drain, identity};

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn position() -> LocationUpdate {
        LocationUpdate {
            latitude: 28.6,
            longitude: 77.2,
            accuracy: None,
            heading: None,
            speed: None,
            status: None,
        }
    }

    #[test]
    fn admission_requires_valid_token() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let err = broker.admit(ADDR, &CredentialSources::default()).unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_ERROR");

        let token = broker.auth().issue(&identity("op", Role::Operator)).unwrap();
        let sources = CredentialSources {
            query: Some(token),
            ..CredentialSources::default()
        };
        assert_eq!(broker.admit(ADDR, &sources).unwrap().role, Role::Operator);
    }

    #[test]
    fn emergency_mode_refuses_citizens_only() {
        let broker = Broker::in_memory(BrokerConfig {
            session: SessionConfig {
                emergency_mode: true,
                ..SessionConfig::default()
            },
            ..BrokerConfig::default()
        });
        let citizen = broker.auth().issue(&identity("c", Role::Citizen)).unwrap();
        let responder = broker.auth().issue(&identity("r", Role::Responder)).unwrap();

        let refused = broker.admit(
            ADDR,
            &CredentialSources {
                query: Some(citizen),
                ..CredentialSources::default()
            },
        );
        assert_eq!(refused.unwrap_err().code(), "AUTHORIZATION_ERROR");
        assert!(
            broker
                .admit(
                    ADDR,
                    &CredentialSources {
                        query: Some(responder),
                        ..CredentialSources::default()
                    },
                )
                .is_ok()
        );
    }

    #[test]
    fn capacity_is_enforced() {
        let broker = Broker::in_memory(BrokerConfig {
            auth: AuthConfig {
                mode: crate::config::AuthMode::Open,
                ..AuthConfig::default()
            },
            session: SessionConfig {
                max_connections: 1,
                ..SessionConfig::default()
            },
            ..BrokerConfig::default()
        });
        let first = broker.admit(ADDR, &CredentialSources::default()).unwrap();
        let _handle = broker.connect(first);
        let err = broker.admit(ADDR, &CredentialSources::default()).unwrap_err();
        assert_eq!(err, BrokerError::AtCapacity);
    }

    #[test]
    fn eleventh_connection_attempt_from_one_address_is_rate_limited() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let token = broker.auth().issue(&identity("op", Role::Operator)).unwrap();
        let sources = CredentialSources {
            query: Some(token),
            ..CredentialSources::default()
        };
        for _ in 0..10 {
            assert!(broker.admit(ADDR, &sources).is_ok());
        }
        let err = broker.admit(ADDR, &sources).unwrap_err();
        assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
        assert!(matches!(
            err,
            BrokerError::RateLimited { retry_after_secs } if retry_after_secs >= 1
        ));

        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
        assert!(broker.admit(other, &sources).is_ok());
    }

    #[test]
    fn command_center_receives_initial_data() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut operator = broker.connect(identity("op", Role::Operator));
        let mut citizen = broker.connect(identity("cit", Role::Citizen));

        let events = drain(&mut operator);
        assert_eq!(
            events.iter().map(|f| f.event.as_str()).collect::<Vec<_>>(),
            vec![
                "incidents:active",
                "responders:status",
                "system:statistics",
                "system:userCount",
                "system:userCount",
            ]
        );
        let citizen_events = drain(&mut citizen);
        assert_eq!(citizen_events.len(), 1);
        assert_eq!(citizen_events[0].event, "system:userCount");
        assert_eq!(citizen_events[0].data, serde_json::json!(2));
    }

    #[test]
    fn responder_disconnect_broadcasts_offline_exactly_once() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut operator = broker.connect(identity("op", Role::Operator));
        let responder = broker.connect(identity("unit-7", Role::Responder));
        let unit = ResponderId::from("unit-7");
        broker.responders().upsert(&unit, None, &position()).unwrap();
        drain(&mut operator);

        // Transport close and heartbeat timeout race for the same session.
        assert!(broker.disconnect(responder.id, DisconnectReason::TransportClosed));
        assert!(!broker.disconnect(responder.id, DisconnectReason::HeartbeatTimeout));

        assert!(broker.responders().get(&unit).is_none());
        let offline: Vec<_> = drain(&mut operator)
            .into_iter()
            .filter(|f| f.event == "responder:status_update")
            .collect();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].data["status"], "OFFLINE");
        assert_eq!(offline[0].data["responderId"], "unit-7");
    }

    fn offline_updates(handle: &mut SessionHandle) -> Vec<ServerFrame> {
        drain(handle)
            .into_iter()
            .filter(|f| f.event == "responder:status_update" && f.data["status"] == "OFFLINE")
            .collect()
    }

    #[test]
    fn second_session_of_a_responder_goes_offline_only_when_both_leave() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut operator = broker.connect(identity("op", Role::Operator));
        let stale = broker.connect(identity("unit-7", Role::Responder));
        let fresh = broker.connect(identity("unit-7", Role::Responder));
        let unit = ResponderId::from("unit-7");
        broker.responders().upsert(&unit, None, &position()).unwrap();
        drain(&mut operator);

        assert!(broker.disconnect(stale.id, DisconnectReason::HeartbeatTimeout));
        assert!(broker.responders().get(&unit).is_some());
        assert!(offline_updates(&mut operator).is_empty());

        assert!(broker.disconnect(fresh.id, DisconnectReason::TransportClosed));
        assert!(broker.responders().get(&unit).is_none());
        assert_eq!(offline_updates(&mut operator).len(), 1);
    }

    /// Responder index whose `upsert` pauses until the test lets it go.
    struct PausingResponders {
        inner: ResponderLocationIndex,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ResponderRepository for PausingResponders {
        fn upsert(
            &self,
            responder: &ResponderId,
            responder_type: Option<ResponderType>,
            update: &LocationUpdate,
        ) -> Result<ResponderLocationEntry, BrokerError> {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            self.inner.upsert(responder, responder_type, update)
        }
        fn remove(&self, responder: &ResponderId) -> Option<ResponderLocationEntry> {
            self.inner.remove(responder)
        }
        fn get(&self, responder: &ResponderId) -> Option<ResponderLocationEntry> {
            self.inner.get(responder)
        }
        fn set_status(
            &self,
            responder: &ResponderId,
            status: ResponderStatus,
        ) -> Option<ResponderLocationEntry> {
            self.inner.set_status(responder, status)
        }
        fn set_type(&self, responder: &ResponderId, responder_type: ResponderType) {
            self.inner.set_type(responder, responder_type);
        }
        fn all(&self) -> Vec<ResponderLocationEntry> {
            self.inner.all()
        }
        fn nearest(&self, search: NearbySearch) -> Result<Vec<NearbyResponder>, BrokerError> {
            self.inner.nearest(search)
        }
        fn prune_stale(&self) -> Vec<ResponderId> {
            self.inner.prune_stale()
        }
        fn count(&self) -> usize {
            self.inner.count()
        }
        fn count_status(&self, status: ResponderStatus) -> usize {
            self.inner.count_status(status)
        }
    }

    #[test]
    fn disconnect_during_location_update_leaves_no_position_behind() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let responders = Arc::new(PausingResponders {
            inner: ResponderLocationIndex::new(&LocationConfig::default()),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let broker = Broker::with_repositories(
            BrokerConfig::default(),
            Arc::new(IncidentStore::new()),
            responders,
            Arc::new(NoopSink),
        );
        let mut operator = broker.connect(identity("op", Role::Operator));
        let unit = broker.connect(identity("unit-7", Role::Responder)).id;
        drain(&mut operator);

        let frame = serde_json::json!({
            "event": "location:update",
            "data": { "latitude": 28.6139, "longitude": 77.209 }
        })
        .to_string();
        std::thread::scope(|scope| {
            let worker = scope.spawn(|| broker.handle_frame(unit, &frame));
            entered_rx.recv().unwrap();
            // The heartbeat gives up on the session while its update is in flight.
            assert!(!broker.disconnect(unit, DisconnectReason::HeartbeatTimeout));
            release_tx.send(()).unwrap();
            worker.join().unwrap();
        });

        assert!(!broker.sessions().contains(unit));
        assert!(broker.responders().get(&ResponderId::from("unit-7")).is_none());
        let events: Vec<_> = drain(&mut operator)
            .into_iter()
            .filter(|f| f.event.starts_with("location:") || f.event.starts_with("responder:"))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "location:responder_update");
        assert_eq!(events[1].event, "responder:status_update");
        assert_eq!(events[1].data["status"], "OFFLINE");
        assert_eq!(events[1].data["reason"], "heartbeat_timeout");
    }

    #[test]
    fn unanswered_probe_disconnects_with_heartbeat_timeout() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let mut quiet = broker.connect(identity("quiet", Role::Citizen));
        let mut alive = broker.connect(identity("alive", Role::Citizen));

        assert_eq!(broker.heartbeat_sweep(), 0);
        broker.sessions().acknowledge_probe(alive.id);
        assert_eq!(broker.heartbeat_sweep(), 1);

        assert!(!broker.sessions().contains(quiet.id));
        assert!(broker.sessions().contains(alive.id));
        let mut closed = None;
        while let Ok(signal) = quiet.outbound.try_recv() {
            if let SessionSignal::Close(reason) = signal {
                closed = Some(reason);
            }
        }
        assert_eq!(closed, Some(DisconnectReason::HeartbeatTimeout));
        drain(&mut alive);
    }

    #[test]
    fn slow_consumer_is_disconnected() {
        let broker = Broker::in_memory(BrokerConfig {
            session: SessionConfig {
                outbound_queue: 2,
                ..SessionConfig::default()
            },
            ..BrokerConfig::default()
        });
        let stuck = broker.connect(identity("stuck", Role::Citizen));
        let target = Topic::User(UserId::from("stuck"));
        for _ in 0..3 {
            broker.broadcast(std::slice::from_ref(&target), "test:event", &"x");
        }
        assert!(!broker.sessions().contains(stuck.id));
    }

    #[test]
    fn statistics_count_registries() {
        let broker = Broker::in_memory(BrokerConfig::default());
        let _a = broker.connect(identity("a", Role::Citizen));
        let stats = broker.statistics();
        assert_eq!(stats.connected_users, 1);
        assert_eq!(stats.active_incidents, 0);
        assert_eq!(stats.version, env!("CARGO_PKG_VERSION"));
    }
}
