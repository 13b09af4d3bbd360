//! Sliding-window rate limiting.
//!
//! A [`SlidingWindow`] keeps, per key, the instants of the requests it let
//! through inside the current window. A request is refused when the window
//! already holds `max` entries; refused requests are not recorded, so a
//! client that keeps hammering does not extend its own lockout.
//!
//! [`RateLimiter`] pairs two windows: connection attempts keyed by source
//! address and events keyed by `(session, event name)`.

use std::collections::VecDeque;
use std::hash::Hash;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use beacon_types::{EventName, SessionId};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::BrokerError;

/// A per-key sliding-window counter.
#[derive(Debug)]
pub struct SlidingWindow<K: Eq + Hash> {
    max: usize,
    window: Duration,
    enabled: bool,
    hits: DashMap<K, VecDeque<Instant>>,
}

impl<K: Eq + Hash + Clone> SlidingWindow<K> {
    /// A window admitting `max` requests per `window` per key.
    pub fn new(max: u32, window: Duration, enabled: bool) -> Self {
        Self {
            max: usize::try_from(max).unwrap_or(usize::MAX),
            window,
            enabled,
            hits: DashMap::new(),
        }
    }

    /// Count a request for `key` now.
    pub fn check(&self, key: &K) -> Result<(), BrokerError> {
        self.check_at(key, Instant::now())
    }

    /// Count a request for `key` at `now`.
    ///
    /// Disabled windows always admit and record nothing.
    pub fn check_at(&self, key: &K, now: Instant) -> Result<(), BrokerError> {
        if !self.enabled {
            return Ok(());
        }
        let mut recent = self.hits.entry(key.clone()).or_default();
        while recent
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= self.window)
        {
            recent.pop_front();
        }
        if recent.len() >= self.max {
            let oldest_age = recent
                .front()
                .map_or(Duration::ZERO, |&t| now.saturating_duration_since(t));
            let retry_after = self.window.saturating_sub(oldest_age);
            return Err(BrokerError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }
        recent.push_back(now);
        Ok(())
    }

    /// Drop every key matching `predicate`.
    pub fn forget_where(&self, predicate: impl Fn(&K) -> bool) {
        self.hits.retain(|key, _| !predicate(key));
    }

    /// Drop keys whose windows hold no live entries at `now`.
    pub fn compact(&self, now: Instant) -> usize {
        let before = self.hits.len();
        self.hits.retain(|_, recent| {
            recent
                .back()
                .is_some_and(|&t| now.saturating_duration_since(t) < self.window)
        });
        before.saturating_sub(self.hits.len())
    }

    /// Keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.hits.len()
    }

    /// Whether checks are enforced.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Connection and event limits for the whole broker.
#[derive(Debug)]
pub struct RateLimiter {
    connections: SlidingWindow<IpAddr>,
    events: SlidingWindow<(SessionId, EventName)>,
}

impl RateLimiter {
    /// Build both windows from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            connections: SlidingWindow::new(
                config.connection_max,
                config.connection_window(),
                config.enabled,
            ),
            events: SlidingWindow::new(config.event_max, config.event_window(), config.enabled),
        }
    }

    /// Count a connection attempt from `addr`.
    pub fn check_connection(&self, addr: IpAddr) -> Result<(), BrokerError> {
        let result = self.connections.check(&addr);
        if result.is_err() {
            tracing::warn!(target: "security", %addr, "connection rate limit exceeded");
        }
        result
    }

    /// Count one `event` from `session`.
    pub fn check_event(&self, session: SessionId, event: EventName) -> Result<(), BrokerError> {
        self.check_event_at(session, event, Instant::now())
    }

    /// Count one `event` from `session` at `now`.
    pub fn check_event_at(
        &self,
        session: SessionId,
        event: EventName,
        now: Instant,
    ) -> Result<(), BrokerError> {
        let result = self.events.check_at(&(session, event), now);
        if result.is_err() {
            tracing::warn!(
                target: "security",
                session_id = %session,
                event = %event,
                "event rate limit exceeded"
            );
        }
        result
    }

    /// Forget every event window of a departed session.
    pub fn forget_session(&self, session: SessionId) {
        self.events.forget_where(|(id, _)| *id == session);
    }

    /// Drop idle windows; returns how many keys were removed.
    pub fn compact(&self) -> usize {
        let now = Instant::now();
        self.connections
            .compact(now)
            .saturating_add(self.events.compact(now))
    }
}
