//! The responder location index.
//!
//! One entry per responder, replaced on every location update. Nearest
//! queries are a linear haversine scan over fresh entries, which is ample
//! for the few hundred units a deployment tracks.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use beacon_types::{
    LocationUpdate, NearbyResponder, ResponderId, ResponderLocationEntry, ResponderStatus,
    ResponderType,
};
use chrono::Utc;
use validator::Validate;

use crate::config::LocationConfig;
use crate::error::BrokerError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// A nearest-responder search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbySearch {
    /// Query point latitude.
    pub latitude: f64,
    /// Query point longitude.
    pub longitude: f64,
    /// Radius in meters; the configured default when `None`.
    pub radius_m: Option<f64>,
    /// Only responders of this kind.
    pub responder_type: Option<ResponderType>,
}

/// Repository interface over responder positions.
pub trait ResponderRepository: Send + Sync {
    /// Validate and store a position, replacing any prior entry.
    fn upsert(
        &self,
        responder: &ResponderId,
        responder_type: Option<ResponderType>,
        update: &LocationUpdate,
    ) -> Result<ResponderLocationEntry, BrokerError>;

    /// Delete a responder's entry.
    fn remove(&self, responder: &ResponderId) -> Option<ResponderLocationEntry>;

    /// One responder's entry, fresh or not.
    fn get(&self, responder: &ResponderId) -> Option<ResponderLocationEntry>;

    /// Change the status of an indexed responder.
    fn set_status(
        &self,
        responder: &ResponderId,
        status: ResponderStatus,
    ) -> Option<ResponderLocationEntry>;

    /// Record the kind of an indexed responder.
    fn set_type(&self, responder: &ResponderId, responder_type: ResponderType);

    /// Every fresh entry, most recently updated first.
    fn all(&self) -> Vec<ResponderLocationEntry>;

    /// Fresh entries within the radius, nearest first.
    fn nearest(&self, search: NearbySearch) -> Result<Vec<NearbyResponder>, BrokerError>;

    /// Drop entries older than the staleness threshold.
    fn prune_stale(&self) -> Vec<ResponderId>;

    /// Number of fresh entries.
    fn count(&self) -> usize;

    /// Number of fresh entries with the given status.
    fn count_status(&self, status: ResponderStatus) -> usize;
}

#[derive(Debug)]
struct Tracked {
    entry: ResponderLocationEntry,
    refreshed: Instant,
}

/// In-memory responder location index.
#[derive(Debug)]
pub struct ResponderLocationIndex {
    entries: RwLock<HashMap<ResponderId, Tracked>>,
    default_radius_m: f64,
    max_radius_m: f64,
    stale_after: Duration,
}

impl ResponderLocationIndex {
    /// An empty index.
    pub fn new(config: &LocationConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_radius_m: config.default_radius_m,
            max_radius_m: config.max_radius_m,
            stale_after: config.stale_after(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ResponderId, Tracked>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ResponderId, Tracked>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, tracked: &Tracked, now: Instant) -> bool {
        now.saturating_duration_since(tracked.refreshed) < self.stale_after
    }

    /// Default search radius, in meters.
    pub const fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    /// [`ResponderRepository::prune_stale`] as of `now`.
    pub fn prune_stale_at(&self, now: Instant) -> Vec<ResponderId> {
        let mut entries = self.write();
        let stale: Vec<ResponderId> = entries
            .iter()
            .filter(|(_, tracked)| !self.is_fresh(tracked, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            entries.remove(id);
        }
        stale
    }

    /// [`ResponderRepository::nearest`] as of `now`.
    pub fn nearest_at(
        &self,
        search: NearbySearch,
        now: Instant,
    ) -> Result<Vec<NearbyResponder>, BrokerError> {
        let radius = search.radius_m.unwrap_or(self.default_radius_m);
        if !(radius > 0.0 && radius <= self.max_radius_m) {
            return Err(BrokerError::invalid(
                "radius",
                format!("Radius must be between 0 and {} meters", self.max_radius_m),
            ));
        }
        if !(-90.0..=90.0).contains(&search.latitude) {
            return Err(BrokerError::invalid(
                "latitude",
                "Latitude must be a number between -90 and 90",
            ));
        }
        if !(-180.0..=180.0).contains(&search.longitude) {
            return Err(BrokerError::invalid(
                "longitude",
                "Longitude must be a number between -180 and 180",
            ));
        }

        let mut found: Vec<NearbyResponder> = self
            .read()
            .values()
            .filter(|tracked| self.is_fresh(tracked, now))
            .filter(|tracked| {
                search
                    .responder_type
                    .is_none_or(|kind| tracked.entry.responder_type == Some(kind))
            })
            .filter_map(|tracked| {
                let distance = haversine_m(
                    search.latitude,
                    search.longitude,
                    tracked.entry.latitude,
                    tracked.entry.longitude,
                );
                (distance <= radius).then(|| NearbyResponder {
                    entry: tracked.entry.clone(),
                    distance,
                })
            })
            .collect();
        found.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(found)
    }
}

impl ResponderRepository for ResponderLocationIndex {
    fn upsert(
        &self,
        responder: &ResponderId,
        responder_type: Option<ResponderType>,
        update: &LocationUpdate,
    ) -> Result<ResponderLocationEntry, BrokerError> {
        update.validate()?;
        let mut entries = self.write();
        let previous = entries.get(responder).map(|t| &t.entry);
        let entry = ResponderLocationEntry {
            responder_id: responder.clone(),
            responder_type: responder_type.or_else(|| previous.and_then(|p| p.responder_type)),
            latitude: update.latitude,
            longitude: update.longitude,
            accuracy: update.accuracy,
            heading: update.heading,
            speed: update.speed,
            status: update
                .status
                .or_else(|| previous.map(|p| p.status))
                .unwrap_or_default(),
            timestamp: Utc::now(),
        };
        entries.insert(
            responder.clone(),
            Tracked {
                entry: entry.clone(),
                refreshed: Instant::now(),
            },
        );
        Ok(entry)
    }

    fn remove(&self, responder: &ResponderId) -> Option<ResponderLocationEntry> {
        self.write().remove(responder).map(|t| t.entry)
    }

    fn get(&self, responder: &ResponderId) -> Option<ResponderLocationEntry> {
        self.read().get(responder).map(|t| t.entry.clone())
    }

    fn set_status(
        &self,
        responder: &ResponderId,
        status: ResponderStatus,
    ) -> Option<ResponderLocationEntry> {
        let mut entries = self.write();
        let tracked = entries.get_mut(responder)?;
        tracked.entry.status = status;
        Some(tracked.entry.clone())
    }

    fn set_type(&self, responder: &ResponderId, responder_type: ResponderType) {
        if let Some(tracked) = self.write().get_mut(responder) {
            tracked.entry.responder_type = Some(responder_type);
        }
    }

    fn all(&self) -> Vec<ResponderLocationEntry> {
        let now = Instant::now();
        let mut entries: Vec<ResponderLocationEntry> = self
            .read()
            .values()
            .filter(|t| self.is_fresh(t, now))
            .map(|t| t.entry.clone())
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    fn nearest(&self, search: NearbySearch) -> Result<Vec<NearbyResponder>, BrokerError> {
        self.nearest_at(search, Instant::now())
    }

    fn prune_stale(&self) -> Vec<ResponderId> {
        self.prune_stale_at(Instant::now())
    }

    fn count(&self) -> usize {
        let now = Instant::now();
        self.read().values().filter(|t| self.is_fresh(t, now)).count()
    }

    fn count_status(&self, status: ResponderStatus) -> usize {
        let now = Instant::now();
        self.read()
            .values()
            .filter(|t| self.is_fresh(t, now) && t.entry.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]

    use super::*;

    fn index() -> ResponderLocationIndex {
        ResponderLocationIndex::new(&LocationConfig::default())
    }

    fn at(latitude: f64, longitude: f64) -> LocationUpdate {
        LocationUpdate {
            latitude,
            longitude,
            accuracy: Some(5.0),
            heading: None,
            speed: None,
            status: None,
        }
    }

    fn search(radius_m: f64, responder_type: Option<ResponderType>) -> NearbySearch {
        NearbySearch {
            latitude: 28.6139,
            longitude: 77.2090,
            radius_m: Some(radius_m),
            responder_type,
        }
    }

    #[test]
    fn haversine_known_distance() {
        // Connaught Place to India Gate, roughly 2.4 km.
        let d = haversine_m(28.6315, 77.2167, 28.6129, 77.2295);
        assert!((2_200.0..2_600.0).contains(&d), "distance {d}");
        assert!(haversine_m(10.0, 10.0, 10.0, 10.0).abs() < 1e-6);
    }

    #[test]
    fn nearest_is_sorted_and_bounded() {
        let index = index();
        index.upsert(&"far".into(), None, &at(28.70, 77.21)).unwrap();
        index.upsert(&"near".into(), None, &at(28.6140, 77.2091)).unwrap();
        index.upsert(&"mid".into(), None, &at(28.63, 77.21)).unwrap();

        let found = index.nearest(search(5_000.0, None)).unwrap();
        let ids: Vec<&str> = found.iter().map(|n| n.entry.responder_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(found.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(found.iter().all(|n| n.distance <= 5_000.0));
    }

    #[test]
    fn nearest_filters_by_type() {
        let index = index();
        index
            .upsert(&"fire-1".into(), Some(ResponderType::Fire), &at(28.614, 77.209))
            .unwrap();
        index
            .upsert(&"med-1".into(), Some(ResponderType::Medical), &at(28.614, 77.209))
            .unwrap();
        index.upsert(&"unknown".into(), None, &at(28.614, 77.209)).unwrap();

        let found = index
            .nearest(search(1_000.0, Some(ResponderType::Medical)))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entry.responder_id.as_str(), "med-1");
    }

    #[test]
    fn radius_above_maximum_is_rejected() {
        let err = index().nearest(search(50_001.0, None)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(index().nearest(search(0.0, None)).is_err());
    }

    #[test]
    fn upsert_replaces_and_keeps_known_type_and_status() {
        let index = index();
        let id = ResponderId::from("unit");
        index.upsert(&id, Some(ResponderType::Police), &at(1.0, 1.0)).unwrap();
        index.set_status(&id, ResponderStatus::EnRoute);
        let entry = index.upsert(&id, None, &at(2.0, 2.0)).unwrap();
        assert_eq!(entry.responder_type, Some(ResponderType::Police));
        assert_eq!(entry.status, ResponderStatus::EnRoute);
        assert_eq!(index.all().len(), 1);
    }

    #[test]
    fn upsert_validates_heading_and_speed() {
        let index = index();
        let mut update = at(1.0, 1.0);
        update.heading = Some(360.0);
        update.speed = Some(-1.0);
        let err = index.upsert(&"u".into(), None, &update).unwrap_err();
        assert_eq!(err.field_errors().unwrap().len(), 2);
        assert!(index.get(&"u".into()).is_none());
    }

    #[test]
    fn stale_entries_are_hidden_and_pruned() {
        let index = index();
        index.upsert(&"old".into(), None, &at(28.614, 77.209)).unwrap();
        let later = Instant::now() + Duration::from_secs(301);
        assert!(index.nearest_at(search(1_000.0, None), later).unwrap().is_empty());
        assert_eq!(index.prune_stale_at(later), vec![ResponderId::from("old")]);
        assert!(index.get(&"old".into()).is_none());
    }

    #[test]
    fn remove_deletes_entry() {
        let index = index();
        index.upsert(&"gone".into(), None, &at(0.0, 0.0)).unwrap();
        assert!(index.remove(&"gone".into()).is_some());
        assert!(index.remove(&"gone".into()).is_none());
        assert_eq!(index.count(), 0);
    }
}
