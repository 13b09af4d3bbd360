//! Error types for the cache layer.
//!
//! Nothing here reaches a client. The broker treats every [`CacheError`] as
//! non-fatal: it is logged and the in-memory registries stay authoritative.

/// Errors that can occur talking to the snapshot cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A snapshot could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection URL is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}
