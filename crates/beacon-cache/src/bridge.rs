//! Non-blocking write-through from the broker to the cache.
//!
//! [`CacheBridge`] is the broker's [`SnapshotSink`]: `submit` only pushes
//! onto a bounded queue. A single writer task owns the store and applies
//! writes in submission order. When the queue is full the newest write is
//! dropped; the next periodic snapshot supersedes it anyway.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use beacon_core::cache::{CacheWrite, SnapshotSink};
use beacon_core::config::CacheConfig;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::store::{
    ACTIVE_INCIDENTS, KeyValueStore, RESPONDER_STATUS, SYSTEM_STATISTICS, responder_location_key,
};

/// Expiry applied to each key family, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// `responder_location:{id}`.
    pub responder: u64,
    /// `active_incidents` and `responder_status`.
    pub snapshot: u64,
    /// `system_statistics`.
    pub statistics: u64,
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            responder: config.responder_ttl_secs,
            snapshot: config.incident_snapshot_ttl_secs,
            statistics: config.statistics_ttl_secs,
        }
    }
}

/// Sending half of the write-through queue.
#[derive(Debug, Clone)]
pub struct CacheBridge {
    tx: mpsc::Sender<CacheWrite>,
    dropped: Arc<AtomicU64>,
}

impl CacheBridge {
    /// Start the writer task over `store` and return the sink plus a handle
    /// to stop the writer.
    pub fn spawn<S: KeyValueStore>(store: S, config: &CacheConfig) -> (Self, CacheWriter) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let writer = Writer {
            store,
            ttls: CacheTtls::from(config),
            failing: false,
        };
        let task = tokio::spawn(writer.run(rx, shutdown.clone()));
        let bridge = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (bridge, CacheWriter { shutdown, task })
    }

    /// Writes dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SnapshotSink for CacheBridge {
    fn submit(&self, write: CacheWrite) {
        match self.tx.try_send(write) {
            Ok(()) => {}
            Err(TrySendError::Full(write)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    kind = write.kind(),
                    dropped = total.saturating_add(1),
                    "cache queue full, write dropped"
                );
            }
            Err(TrySendError::Closed(write)) => {
                tracing::debug!(kind = write.kind(), "cache writer stopped, write discarded");
            }
        }
    }
}

/// Handle to the running writer task.
#[derive(Debug)]
pub struct CacheWriter {
    shutdown: CancellationToken,
    task: JoinHandle<u64>,
}

impl CacheWriter {
    /// Apply every write already queued, then stop. Returns the number of
    /// writes the task applied over its lifetime.
    pub async fn flush(self) -> u64 {
        self.shutdown.cancel();
        match self.task.await {
            Ok(applied) => applied,
            Err(err) => {
                tracing::error!(error = %err, "cache writer task failed");
                0
            }
        }
    }
}

struct Writer<S> {
    store: S,
    ttls: CacheTtls,
    failing: bool,
}

impl<S: KeyValueStore> Writer<S> {
    async fn run(mut self, mut rx: mpsc::Receiver<CacheWrite>, shutdown: CancellationToken) -> u64 {
        let mut applied = 0_u64;
        loop {
            tokio::select! {
                biased;
                write = rx.recv() => match write {
                    Some(write) => {
                        self.apply_logged(write).await;
                        applied = applied.saturating_add(1);
                    }
                    None => break,
                },
                () = shutdown.cancelled() => {
                    rx.close();
                    while let Some(write) = rx.recv().await {
                        self.apply_logged(write).await;
                        applied = applied.saturating_add(1);
                    }
                    break;
                }
            }
        }
        tracing::info!(applied, "cache writer stopped");
        applied
    }

    /// Apply one write. The first failure of a run is a warning; repeats are
    /// quiet until the store answers again.
    async fn apply_logged(&mut self, write: CacheWrite) {
        let kind = write.kind();
        match self.apply(write).await {
            Ok(()) => {
                if self.failing {
                    tracing::info!(kind, "cache writes recovered");
                    self.failing = false;
                }
            }
            Err(err) => {
                if self.failing {
                    tracing::debug!(kind, error = %err, "cache write failed");
                } else {
                    tracing::warn!(kind, error = %err, "cache unavailable, continuing in memory");
                    self.failing = true;
                }
            }
        }
    }

    async fn apply(&self, write: CacheWrite) -> Result<(), CacheError> {
        match write {
            CacheWrite::ResponderLocation(entry) => {
                let key = responder_location_key(&entry.responder_id);
                self.put(&key, &entry, self.ttls.responder).await
            }
            CacheWrite::RemoveResponder(responder) => {
                self.store.delete(&responder_location_key(&responder)).await
            }
            CacheWrite::ActiveIncidents(incidents) => {
                self.put(ACTIVE_INCIDENTS, &incidents, self.ttls.snapshot).await
            }
            CacheWrite::ResponderStatus(entries) => {
                self.put(RESPONDER_STATUS, &entries, self.ttls.snapshot).await
            }
            CacheWrite::Statistics(stats) => {
                self.put(SYSTEM_STATISTICS, &stats, self.ttls.statistics).await
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &impl Serialize,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(value)?;
        self.store.set_ex(key, json, ttl_secs).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use beacon_core::{Broker, BrokerConfig};
    use beacon_types::{ResponderId, ResponderLocationEntry, ResponderStatus, SystemStatistics};
    use chrono::Utc;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn entry(id: &str) -> ResponderLocationEntry {
        ResponderLocationEntry {
            responder_id: ResponderId::from(id),
            responder_type: None,
            latitude: 28.6139,
            longitude: 77.209,
            accuracy: Some(5.0),
            heading: None,
            speed: None,
            status: ResponderStatus::Available,
            timestamp: Utc::now(),
        }
    }

    fn statistics() -> SystemStatistics {
        Broker::in_memory(BrokerConfig::default()).statistics()
    }

    #[tokio::test]
    async fn writes_land_under_their_keys_with_ttls() {
        let store = MemoryStore::default();
        let config = CacheConfig::default();
        let (bridge, writer) = CacheBridge::spawn(store.clone(), &config);

        bridge.submit(CacheWrite::ResponderLocation(entry("unit-1")));
        bridge.submit(CacheWrite::ActiveIncidents(Vec::new()));
        bridge.submit(CacheWrite::Statistics(statistics()));
        assert_eq!(writer.flush().await, 3);

        let (json, ttl) = store.entry("responder_location:unit-1").unwrap();
        assert_eq!(ttl, config.responder_ttl_secs);
        let cached: ResponderLocationEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(cached.responder_id, ResponderId::from("unit-1"));

        assert_eq!(store.entry(ACTIVE_INCIDENTS).unwrap().0, "[]");
        assert_eq!(
            store.entry(SYSTEM_STATISTICS).unwrap().1,
            config.statistics_ttl_secs
        );
    }

    #[tokio::test]
    async fn remove_deletes_the_location_key() {
        let store = MemoryStore::default();
        let (bridge, writer) = CacheBridge::spawn(store.clone(), &CacheConfig::default());

        bridge.submit(CacheWrite::ResponderLocation(entry("unit-2")));
        bridge.submit(CacheWrite::RemoveResponder(ResponderId::from("unit-2")));
        writer.flush().await;

        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn failing_store_never_blocks_submitters() {
        let store = MemoryStore {
            fail: true,
            ..MemoryStore::default()
        };
        let (bridge, writer) = CacheBridge::spawn(store.clone(), &CacheConfig::default());

        for n in 0..20 {
            bridge.submit(CacheWrite::ResponderLocation(entry(&format!("unit-{n}"))));
        }
        writer.flush().await;
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        let store = MemoryStore::default();
        let config = CacheConfig {
            queue_capacity: 1,
            ..CacheConfig::default()
        };
        let (bridge, writer) = CacheBridge::spawn(store, &config);

        // The writer cannot run between these on a current-thread runtime.
        bridge.submit(CacheWrite::ActiveIncidents(Vec::new()));
        bridge.submit(CacheWrite::ActiveIncidents(Vec::new()));
        bridge.submit(CacheWrite::ActiveIncidents(Vec::new()));
        assert_eq!(bridge.dropped(), 2);
        assert_eq!(writer.flush().await, 1);
    }
}
