//! Free-text scrubbing and the format checks `validator` has no rule for.
//!
//! [`strip_tags`] removes `<script>...</script>` blocks first, then any
//! remaining `<...>` tag, then trims surrounding whitespace. An unterminated
//! `<` is left in place.

use beacon_types::{
    ClientEvent, CreateIncident, EmergencyAlertRequest, FieldUpdate, IncidentNotificationRequest,
    RegisterResponder, ResolveIncident, UpdateIncidentStatus,
};

use crate::error::FieldError;

const SCRIPT_OPEN: &str = "<script";
const SCRIPT_CLOSE: &str = "</script>";

/// Strip script blocks and markup from a string.
pub fn strip_tags(input: &str) -> String {
    remove_tags(&remove_scripts(input)).trim().to_owned()
}

fn remove_scripts(input: &str) -> String {
    // ASCII lowering keeps byte offsets identical to `input`.
    let lower = input.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    while let Some(rel) = lower.get(cursor..).and_then(|rest| rest.find(SCRIPT_OPEN)) {
        let start = cursor.saturating_add(rel);
        let after_open = start.saturating_add(SCRIPT_OPEN.len());
        let boundary = lower
            .get(after_open..)
            .and_then(|rest| rest.chars().next())
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'));
        let close = lower
            .get(after_open..)
            .and_then(|rest| rest.find(SCRIPT_CLOSE));
        match (boundary, close) {
            (true, Some(rel_close)) => {
                out.push_str(input.get(cursor..start).unwrap_or_default());
                cursor = after_open
                    .saturating_add(rel_close)
                    .saturating_add(SCRIPT_CLOSE.len());
            }
            _ => {
                out.push_str(input.get(cursor..after_open).unwrap_or_default());
                cursor = after_open;
            }
        }
    }
    out.push_str(input.get(cursor..).unwrap_or_default());
    out
}

fn remove_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        let (before, tail) = rest.split_at(open);
        out.push_str(before);
        if let Some(close) = tail.find('>') {
            rest = tail.get(close.saturating_add(1)..).unwrap_or_default();
        } else {
            out.push_str(tail);
            rest = "";
        }
    }
    out.push_str(rest);
    out
}

fn scrub(field: &mut String) {
    *field = strip_tags(field);
}

fn scrub_opt(field: &mut Option<String>) {
    if let Some(value) = field.as_mut() {
        scrub(value);
    }
}

/// Payloads whose free-text fields are scrubbed before validation.
pub trait Sanitize {
    /// Strip markup from every free-text field in place.
    fn sanitize(&mut self);
}

impl Sanitize for CreateIncident {
    fn sanitize(&mut self) {
        scrub(&mut self.title);
        scrub(&mut self.description);
        scrub_opt(&mut self.reporter_name);
        if let Some(phone) = self.reporter_phone.as_mut() {
            phone.retain(|c| !c.is_whitespace());
        }
        if let Some(email) = self.reporter_email.as_mut() {
            *email = email.trim().to_owned();
        }
        if let Some(location) = self.location.as_mut() {
            scrub_opt(&mut location.address);
        }
    }
}

impl Sanitize for UpdateIncidentStatus {
    fn sanitize(&mut self) {
        scrub_opt(&mut self.notes);
    }
}

impl Sanitize for ResolveIncident {
    fn sanitize(&mut self) {
        scrub_opt(&mut self.resolution_notes);
    }
}

impl Sanitize for RegisterResponder {
    fn sanitize(&mut self) {
        scrub_opt(&mut self.vehicle_id);
    }
}

impl Sanitize for FieldUpdate {
    fn sanitize(&mut self) {
        scrub(&mut self.message);
        for link in &mut self.media {
            scrub(link);
        }
    }
}

impl Sanitize for EmergencyAlertRequest {
    fn sanitize(&mut self) {
        scrub(&mut self.message);
    }
}

impl Sanitize for IncidentNotificationRequest {
    fn sanitize(&mut self) {
        scrub(&mut self.message);
    }
}

impl Sanitize for ClientEvent {
    fn sanitize(&mut self) {
        match self {
            Self::CreateIncident(payload) => payload.sanitize(),
            Self::UpdateIncidentStatus(payload) => payload.sanitize(),
            Self::ResolveIncident(payload) => payload.sanitize(),
            Self::RegisterResponder(payload) => payload.sanitize(),
            Self::FieldUpdate(payload) => payload.sanitize(),
            Self::EmergencyAlert(payload) => payload.sanitize(),
            Self::IncidentNotification(payload) => payload.sanitize(),
            Self::GetActiveIncidents(_)
            | Self::GetIncidentDetails(_)
            | Self::SubscribeIncident(_)
            | Self::UnsubscribeIncident(_)
            | Self::UpdateResponderStatus(_)
            | Self::AcknowledgeAssignment(_)
            | Self::UpdateLocation(_)
            | Self::GetNearbyResponders(_)
            | Self::GetAllResponders => {}
        }
    }
}

/// Whether `phone` is an Indian mobile number: optional `+91`, `91` or `0`
/// prefix, then ten digits starting with 6-9.
pub fn is_valid_phone(phone: &str) -> bool {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    let candidates = [
        compact.strip_prefix("+91"),
        compact.strip_prefix("91"),
        compact.strip_prefix('0'),
        Some(compact.as_str()),
    ];
    candidates.into_iter().flatten().any(|number| {
        number.len() == 10
            && number.chars().all(|c| c.is_ascii_digit())
            && number.starts_with(['6', '7', '8', '9'])
    })
}

/// Checks on a [`CreateIncident`] that the derive rules cannot express.
pub fn check_incident_contacts(payload: &CreateIncident) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if let Some(phone) = payload.reporter_phone.as_deref()
        && !phone.is_empty()
        && !is_valid_phone(phone)
    {
        errors.push(FieldError::new("reporterPhone", "Invalid phone number"));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_blocks_are_removed_whole() {
        assert_eq!(
            strip_tags("Fire <script>alert('x')</script>near gate"),
            "Fire near gate"
        );
        assert_eq!(strip_tags("<SCRIPT type=x>evil()</Script> ok"), "ok");
    }

    #[test]
    fn plain_tags_are_removed_and_text_trimmed() {
        assert_eq!(strip_tags("  <b>Smoke</b> on <i>floor 3</i> "), "Smoke on floor 3");
    }

    #[test]
    fn unterminated_markup_is_kept() {
        assert_eq!(strip_tags("a < b"), "a < b");
        assert_eq!(strip_tags("<scripted> text"), "text");
    }

    #[test]
    fn multibyte_text_survives() {
        assert_eq!(strip_tags("आग <em>लगी</em> है"), "आग लगी है");
    }

    #[test]
    fn indian_mobile_numbers() {
        assert!(is_valid_phone("9876543210"));
        assert!(is_valid_phone("+91 98765 43210"));
        assert!(is_valid_phone("09876543210"));
        assert!(!is_valid_phone("5876543210"));
        assert!(!is_valid_phone("98765"));
    }
}
