//! Broker core for Beacon: sessions, routing, and the live registries.
//!
//! Everything here is transport-agnostic. The gateway feeds inbound text
//! frames to [`Broker::handle_frame`] and drains each session's outbound
//! queue; the REST surface calls the same operations directly.
//!
//! # Modules
//!
//! - [`auth`] -- Credential extraction, JWT verification and guest tokens
//! - [`broker`] -- The [`Broker`] facade, admission and disconnect cleanup
//! - [`cache`] -- [`SnapshotSink`] seam for write-through snapshots
//! - [`config`] -- Configuration loading from `beacon-config.yaml`
//! - [`error`] -- [`BrokerError`] and its client-facing codes
//! - [`heartbeat`] -- Heartbeat and housekeeping loops
//! - [`incidents`] -- Incident registry with paginated listing
//! - [`operations`] -- Mutations shared by live events and REST calls
//! - [`rate_limit`] -- Sliding-window limits per address and per session
//! - [`responders`] -- Responder location index and nearest search
//! - [`router`] -- The inbound event pipeline
//! - [`sanitize`] -- Text cleanup applied to every inbound payload
//! - [`session`] -- Session registry and bounded outbound queues
//! - [`topic`] -- Topic names and the topic-to-session map
//!
//! [`SnapshotSink`]: cache::SnapshotSink
//! [`BrokerError`]: error::BrokerError

pub mod auth;
pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
mod handlers;
pub mod heartbeat;
pub mod incidents;
pub mod operations;
pub mod rate_limit;
pub mod responders;
pub mod router;
pub mod sanitize;
pub mod session;
pub mod topic;

// Re-export primary types for convenience.
pub use auth::{AuthGate, CredentialSources};
pub use broker::{Broker, HousekeepingReport};
pub use cache::{CacheWrite, NoopSink, SnapshotSink};
pub use config::{BrokerConfig, ConfigError};
pub use error::{BrokerError, FieldError};
pub use incidents::{IncidentPatch, IncidentRepository, IncidentStore, Reporter};
pub use responders::{NearbySearch, ResponderLocationIndex, ResponderRepository};
pub use session::{ConnectedUser, Delivery, SessionHandle, SessionRegistry, SessionSignal};
pub use topic::Topic;

#[cfg(test)]
pub(crate) mod test_support {
    use beacon_types::{Identity, ResponderId, Role, ServerFrame, UserId};

    use crate::session::{SessionHandle, SessionSignal};

    /// An identity whose display name is its id. Responders get a unit
    /// with the same id.
    pub fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: UserId::from(id),
            display_name: id.to_owned(),
            role,
            responder_id: (role == Role::Responder).then(|| ResponderId::from(id)),
        }
    }

    /// Every frame queued for `handle`, skipping probes and close signals.
    pub fn drain(handle: &mut SessionHandle) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(signal) = handle.outbound.try_recv() {
            if let SessionSignal::Deliver(frame) = signal {
                frames.push((*frame).clone());
            }
        }
        frames
    }

    /// Event names of every queued frame.
    pub fn events(handle: &mut SessionHandle) -> Vec<String> {
        drain(handle).into_iter().map(|f| f.event).collect()
    }
}
