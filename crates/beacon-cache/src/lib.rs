//! Best-effort snapshot cache for the Beacon broker (`Dragonfly`).
//!
//! The broker never reads from the cache while running. It pushes
//! [`CacheWrite`]s through a [`CacheBridge`]; a background writer applies
//! them with per-family TTLs. At startup the active-incident snapshot is
//! loaded back so a restarted broker resumes with the same open incidents.
//!
//! ```text
//! Broker ──submit──> CacheBridge ──mpsc──> writer task ──> KeyValueStore
//!                                                          (DragonflyPool)
//! ```
//!
//! # Modules
//!
//! - [`bridge`] -- [`CacheBridge`] sink and the writer task
//! - [`dragonfly`] -- `Dragonfly` connection implementing [`KeyValueStore`]
//! - [`restore`] -- Startup recovery of active incidents
//! - [`store`] -- The [`KeyValueStore`] trait and key patterns
//! - [`error`] -- Shared error types
//!
//! [`CacheWrite`]: beacon_core::cache::CacheWrite

pub mod bridge;
pub mod dragonfly;
pub mod error;
pub mod restore;
pub mod store;

// Re-export primary types for convenience.
pub use bridge::{CacheBridge, CacheTtls, CacheWriter};
pub use dragonfly::DragonflyPool;
pub use error::CacheError;
pub use restore::restore_active_incidents;
pub use store::KeyValueStore;
