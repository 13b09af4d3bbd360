//! The snapshot seam between the broker and the external cache.
//!
//! The broker describes what should be written as a [`CacheWrite`] and
//! hands it to a [`SnapshotSink`]. Submitting never blocks and never fails
//! from the caller's point of view; the in-memory registries stay
//! authoritative whatever the cache does with the write.

use beacon_types::{Incident, ResponderId, ResponderLocationEntry, SystemStatistics};

/// One write-through request.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    /// `responder_location:<id>`, short TTL.
    ResponderLocation(ResponderLocationEntry),
    /// Delete `responder_location:<id>`.
    RemoveResponder(ResponderId),
    /// `active_incidents` snapshot.
    ActiveIncidents(Vec<Incident>),
    /// `responder_status` snapshot.
    ResponderStatus(Vec<ResponderLocationEntry>),
    /// `system_statistics` snapshot.
    Statistics(SystemStatistics),
}

impl CacheWrite {
    /// Short label for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ResponderLocation(_) => "responder_location",
            Self::RemoveResponder(_) => "remove_responder",
            Self::ActiveIncidents(_) => "active_incidents",
            Self::ResponderStatus(_) => "responder_status",
            Self::Statistics(_) => "system_statistics",
        }
    }
}

/// Receiver of snapshot writes.
pub trait SnapshotSink: Send + Sync {
    /// Queue a write. Must return immediately.
    fn submit(&self, write: CacheWrite);
}

/// Sink used when the cache is disabled or unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl SnapshotSink for NoopSink {
    fn submit(&self, write: CacheWrite) {
        tracing::trace!(kind = write.kind(), "cache disabled, snapshot discarded");
    }
}
