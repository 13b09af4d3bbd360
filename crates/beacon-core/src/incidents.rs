//! The live incident registry.
//!
//! [`IncidentRepository`] is the seam the router and the REST surface talk
//! to; [`IncidentStore`] is the in-memory implementation. Every operation
//! takes the store's lock once, so create/update/remove are atomic and a
//! listing sees a consistent snapshot while it filters, sorts and pages.
//!
//! Status transitions are not ordered: any status may follow any other.
//! Each change is logged with its `from` and `to` values.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use beacon_types::{
    ActiveIncidentsQuery, CreateIncident, Incident, IncidentId, IncidentPage, IncidentStatus,
    Pagination, ReportSource, ResponderId, Severity, UserId,
};
use chrono::Utc;
use validator::Validate;

use crate::error::BrokerError;
use crate::sanitize::check_incident_contacts;

/// Page size when a listing names none.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page size a listing may ask for.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Who reported an incident and through which entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reporter {
    /// User behind a live connection, if any.
    pub user: Option<UserId>,
    /// Entry point.
    pub source: ReportSource,
}

/// Fields an update may change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncidentPatch {
    /// New status.
    pub status: Option<IncidentStatus>,
    /// New severity.
    pub severity: Option<Severity>,
    /// Replacement notes.
    pub notes: Option<String>,
}

impl IncidentPatch {
    /// Whether the patch changes nothing.
    pub const fn is_empty(&self) -> bool {
        self.status.is_none() && self.severity.is_none() && self.notes.is_none()
    }
}

/// Repository interface over the incident registry.
pub trait IncidentRepository: Send + Sync {
    /// Validate `data`, assign an id and timestamps, and insert it with
    /// status REPORTED.
    fn create(&self, data: CreateIncident, reporter: Reporter) -> Result<Incident, BrokerError>;

    /// Look one incident up.
    fn get(&self, id: IncidentId) -> Result<Incident, BrokerError>;

    /// Merge `patch` into an incident and stamp `last_update`.
    fn update(&self, id: IncidentId, patch: IncidentPatch) -> Result<Incident, BrokerError>;

    /// Add responders to an incident's assigned list (no duplicates).
    fn assign(&self, id: IncidentId, responders: &[ResponderId]) -> Result<Incident, BrokerError>;

    /// Remove an incident with a terminal status, returning its final
    /// record.
    fn finish(
        &self,
        id: IncidentId,
        status: IncidentStatus,
        notes: Option<String>,
    ) -> Result<Incident, BrokerError>;

    /// Filtered, newest-first, paginated listing.
    fn list(&self, query: &ActiveIncidentsQuery) -> Result<IncidentPage, BrokerError>;

    /// Every incident, newest first.
    fn all(&self) -> Vec<Incident>;

    /// Insert previously snapshotted incidents, skipping ids already present.
    fn restore(&self, incidents: Vec<Incident>) -> usize;

    /// Number of incidents in the registry.
    fn count(&self) -> usize;

    /// Number of incidents with the given severity.
    fn count_severity(&self, severity: Severity) -> usize;
}

#[derive(Debug)]
struct Stored {
    incident: Incident,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    incidents: HashMap<IncidentId, Stored>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, incident: Incident) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.incidents.insert(incident.id, Stored { incident, seq });
    }

    /// Newest first; insertion order breaks timestamp ties.
    fn sorted<'a>(&'a self, keep: impl Fn(&Incident) -> bool) -> Vec<&'a Incident> {
        let mut matching: Vec<&Stored> = self
            .incidents
            .values()
            .filter(|s| keep(&s.incident))
            .collect();
        matching.sort_by(|a, b| {
            b.incident
                .created_at
                .cmp(&a.incident.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        matching.into_iter().map(|s| &s.incident).collect()
    }
}

/// In-memory incident registry.
#[derive(Debug, Default)]
pub struct IncidentStore {
    inner: RwLock<Inner>,
}

impl IncidentStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn page_param(value: Option<i64>, default: i64, field: &str) -> Result<i64, BrokerError> {
    match value {
        None => Ok(default),
        Some(v) if v >= 1 => Ok(v),
        Some(_) => Err(BrokerError::invalid(field, format!("{field} must be a positive integer"))),
    }
}

fn to_u32(value: impl TryInto<u32>) -> u32 {
    value.try_into().unwrap_or(u32::MAX)
}

impl IncidentRepository for IncidentStore {
    fn create(&self, data: CreateIncident, reporter: Reporter) -> Result<Incident, BrokerError> {
        let mut errors = match data.validate() {
            Ok(()) => Vec::new(),
            Err(e) => match BrokerError::from(e) {
                BrokerError::Validation(fields) => fields,
                other => return Err(other),
            },
        };
        errors.extend(check_incident_contacts(&data));
        if !errors.is_empty() {
            return Err(BrokerError::Validation(errors));
        }

        let now = Utc::now();
        let incident = Incident {
            id: IncidentId::new(),
            title: data.title,
            description: data.description,
            category: data.category,
            severity: data.severity,
            status: IncidentStatus::Reported,
            location: data.location,
            reporter_name: data.reporter_name,
            reporter_phone: data.reporter_phone,
            reporter_email: data.reporter_email,
            reported_by: reporter.user,
            source: reporter.source,
            created_at: now,
            last_update: now,
            assigned_responders: Vec::new(),
            notes: None,
        };
        self.write().insert(incident.clone());
        tracing::info!(
            incident_id = %incident.id,
            severity = ?incident.severity,
            source = ?incident.source,
            "incident created"
        );
        Ok(incident)
    }

    fn get(&self, id: IncidentId) -> Result<Incident, BrokerError> {
        self.read()
            .incidents
            .get(&id)
            .map(|s| s.incident.clone())
            .ok_or_else(|| BrokerError::incident_not_found(id))
    }

    fn update(&self, id: IncidentId, patch: IncidentPatch) -> Result<Incident, BrokerError> {
        let mut inner = self.write();
        let stored = inner
            .incidents
            .get_mut(&id)
            .ok_or_else(|| BrokerError::incident_not_found(id))?;
        let incident = &mut stored.incident;
        if let Some(status) = patch.status {
            if status != incident.status {
                tracing::info!(
                    incident_id = %id,
                    from = ?incident.status,
                    to = ?status,
                    "incident status transition"
                );
            }
            incident.status = status;
        }
        if let Some(severity) = patch.severity {
            incident.severity = severity;
        }
        if let Some(notes) = patch.notes {
            incident.notes = Some(notes);
        }
        incident.last_update = Utc::now();
        Ok(incident.clone())
    }

    fn assign(&self, id: IncidentId, responders: &[ResponderId]) -> Result<Incident, BrokerError> {
        let mut inner = self.write();
        let stored = inner
            .incidents
            .get_mut(&id)
            .ok_or_else(|| BrokerError::incident_not_found(id))?;
        let incident = &mut stored.incident;
        for responder in responders {
            if !incident.assigned_responders.contains(responder) {
                incident.assigned_responders.push(responder.clone());
            }
        }
        if incident.status == IncidentStatus::Reported && !incident.assigned_responders.is_empty() {
            tracing::info!(
                incident_id = %id,
                from = ?incident.status,
                to = ?IncidentStatus::Assigned,
                "incident status transition"
            );
            incident.status = IncidentStatus::Assigned;
        }
        incident.last_update = Utc::now();
        Ok(incident.clone())
    }

    fn finish(
        &self,
        id: IncidentId,
        status: IncidentStatus,
        notes: Option<String>,
    ) -> Result<Incident, BrokerError> {
        let mut stored = self
            .write()
            .incidents
            .remove(&id)
            .ok_or_else(|| BrokerError::incident_not_found(id))?;
        let incident = &mut stored.incident;
        tracing::info!(
            incident_id = %id,
            from = ?incident.status,
            to = ?status,
            "incident status transition"
        );
        incident.status = status;
        if notes.is_some() {
            incident.notes = notes;
        }
        incident.last_update = Utc::now();
        Ok(stored.incident)
    }

    fn list(&self, query: &ActiveIncidentsQuery) -> Result<IncidentPage, BrokerError> {
        let page = page_param(query.page, 1, "page")?;
        let limit = page_param(query.limit, DEFAULT_PAGE_SIZE, "limit")?.min(MAX_PAGE_SIZE);
        let page_idx = usize::try_from(page.saturating_sub(1)).unwrap_or(usize::MAX);
        let page_len = usize::try_from(limit).unwrap_or(usize::MAX);

        let inner = self.read();
        let matching = inner.sorted(|incident| {
            query.severity.is_none_or(|s| incident.severity == s)
                && query.status.is_none_or(|s| incident.status == s)
        });
        let total = matching.len();
        let incidents = matching
            .into_iter()
            .skip(page_idx.saturating_mul(page_len))
            .take(page_len)
            .cloned()
            .collect();
        drop(inner);

        Ok(IncidentPage {
            incidents,
            pagination: Pagination {
                page: to_u32(page),
                limit: to_u32(limit),
                total: to_u32(total),
                pages: to_u32(total.div_ceil(page_len)),
            },
        })
    }

    fn all(&self) -> Vec<Incident> {
        self.read().sorted(|_| true).into_iter().cloned().collect()
    }

    fn restore(&self, incidents: Vec<Incident>) -> usize {
        let mut inner = self.write();
        let mut restored = 0_usize;
        // Oldest first so insertion order matches creation order.
        let mut incidents = incidents;
        incidents.sort_by_key(|i| i.created_at);
        for incident in incidents {
            if incident.status.is_terminal() || inner.incidents.contains_key(&incident.id) {
                continue;
            }
            inner.insert(incident);
            restored = restored.saturating_add(1);
        }
        restored
    }

    fn count(&self) -> usize {
        self.read().incidents.len()
    }

    fn count_severity(&self, severity: Severity) -> usize {
        self.read()
            .incidents
            .values()
            .filter(|s| s.incident.severity == severity)
            .count()
    }
}
