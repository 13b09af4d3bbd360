//! Startup recovery from the cached snapshots.

use beacon_core::incidents::IncidentRepository;
use beacon_types::{Incident, ReportSource};

use crate::error::CacheError;
use crate::store::{ACTIVE_INCIDENTS, KeyValueStore};

/// Load the `active_incidents` snapshot into `incidents`.
///
/// Restored incidents are marked [`ReportSource::CacheRestore`]. Incidents
/// already in the registry, and any with a terminal status, are skipped.
/// Returns how many were added; a missing snapshot restores nothing.
pub async fn restore_active_incidents<S: KeyValueStore>(
    store: &S,
    incidents: &dyn IncidentRepository,
) -> Result<usize, CacheError> {
    let Some(json) = store.get(ACTIVE_INCIDENTS).await? else {
        tracing::info!("no cached incident snapshot to restore");
        return Ok(0);
    };
    let mut snapshot: Vec<Incident> = serde_json::from_str(&json)?;
    for incident in &mut snapshot {
        incident.source = ReportSource::CacheRestore;
    }
    let offered = snapshot.len();
    let restored = incidents.restore(snapshot);
    tracing::info!(offered, restored, "active incidents restored from cache");
    Ok(restored)
}
