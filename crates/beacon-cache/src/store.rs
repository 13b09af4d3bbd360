//! The key-value seam the writer talks to.
//!
//! # Key Patterns
//!
//! | Pattern | Type | TTL |
//! |---------|------|-----|
//! | `responder_location:{id}` | JSON entry | `cache.responder_ttl_secs` |
//! | `active_incidents` | JSON array | `cache.incident_snapshot_ttl_secs` |
//! | `responder_status` | JSON array | `cache.incident_snapshot_ttl_secs` |
//! | `system_statistics` | JSON object | `cache.statistics_ttl_secs` |

use std::future::Future;

use beacon_types::ResponderId;

use crate::error::CacheError;

/// Snapshot of every active incident.
pub const ACTIVE_INCIDENTS: &str = "active_incidents";
/// Snapshot of every fresh responder entry.
pub const RESPONDER_STATUS: &str = "responder_status";
/// Aggregate statistics snapshot.
pub const SYSTEM_STATISTICS: &str = "system_statistics";

/// `responder_location:{id}`.
pub fn responder_location_key(responder: &ResponderId) -> String {
    format!("responder_location:{responder}")
}

/// A string key-value store with per-key expiry.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Store `value` at `key`, expiring after `ttl_secs` seconds.
    fn set_ex(
        &self,
        key: &str,
        value: String,
        ttl_secs: u64,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Read the value at `key`, if present.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Delete `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory fake used by the writer and restore tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, PoisonError};

    use super::KeyValueStore;
    use crate::error::CacheError;

    #[derive(Debug, Default, Clone)]
    pub struct MemoryStore {
        pub(crate) entries: Arc<Mutex<HashMap<String, (String, u64)>>>,
        pub fail: bool,
    }

    impl MemoryStore {
        pub fn entry(&self, key: &str) -> Option<(String, u64)> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned()
        }

        pub fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect();
            keys.sort();
            keys
        }

        fn unavailable() -> CacheError {
            CacheError::Config("store offline".to_owned())
        }
    }

    impl KeyValueStore for MemoryStore {
        async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), CacheError> {
            if self.fail {
                return Err(Self::unavailable());
            }
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_owned(), (value, ttl_secs));
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            if self.fail {
                return Err(Self::unavailable());
            }
            Ok(self.entry(key).map(|(value, _)| value))
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            if self.fail {
                return Err(Self::unavailable());
            }
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            Ok(())
        }
    }
}
