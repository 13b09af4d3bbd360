//! Error taxonomy of the broker.
//!
//! Every failure an inbound event or a connection attempt can hit is a
//! [`BrokerError`]. Errors are recovered at the event boundary and reported
//! only to the session that caused them; none is ever broadcast.

use std::borrow::Cow;

use serde::Serialize;
use validator::{ValidationErrors, ValidationErrorsKind};

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `location.latitude`.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    /// Build a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the broker core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Missing, malformed, or expired credential. The connection is refused.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The session's role may not perform this action.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The payload failed validation.
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// Too many connection attempts or events inside the window.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the oldest counted request leaves the window.
        retry_after_secs: u64,
    },

    /// The referenced incident or responder is not in the registry.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (`incident`, `responder`).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The snapshot cache could not be reached. Logged, never fatal.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Unexpected failure. Detail is logged, never sent to clients.
    #[error("internal error: {0}")]
    Internal(String),

    /// The live-session cap has been reached.
    #[error("server at capacity")]
    AtCapacity,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BrokerError {
    /// A single-field validation failure.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// A payload that did not decode against the event's schema.
    pub fn malformed(err: &serde_json::Error) -> Self {
        Self::invalid("payload", err.to_string())
    }

    /// An unknown incident id.
    pub fn incident_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "incident",
            id: id.to_string(),
        }
    }

    /// An unknown responder id.
    pub fn responder_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "responder",
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_ERROR",
            Self::Authorization(_) => "AUTHORIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::AtCapacity => "AT_CAPACITY",
        }
    }

    /// Message safe to show the client.
    pub fn client_message(&self) -> String {
        match self {
            Self::Authentication(_) => "Authentication failed".to_owned(),
            Self::Validation(_) => "Validation failed".to_owned(),
            Self::RateLimited { .. } => "Rate limit exceeded".to_owned(),
            Self::CacheUnavailable(_) | Self::Internal(_) => {
                "An internal error occurred".to_owned()
            }
            Self::AtCapacity => "Server at capacity, try again later".to_owned(),
            Self::Authorization(_) | Self::NotFound { .. } => self.to_string(),
        }
    }

    /// Field-level reasons, for validation failures.
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for BrokerError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = Vec::new();
        flatten("", &errors, &mut fields);
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        Self::Validation(fields)
    }
}

fn flatten(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .clone()
                        .unwrap_or_else(|| Cow::Owned(format!("invalid ({})", error.code)));
                    out.push(FieldError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => flatten(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    flatten(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_never_reaches_clients() {
        let err = BrokerError::Internal("mutex poisoned in incident store".to_owned());
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.client_message().contains("mutex"));
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = BrokerError::incident_not_found("abc");
        assert_eq!(err.client_message(), "incident not found: abc");
    }

    #[test]
    fn validation_summary_lists_fields() {
        let err = BrokerError::Validation(vec![
            FieldError::new("title", "too short"),
            FieldError::new("severity", "unknown"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: title: too short; severity: unknown"
        );
        assert_eq!(err.field_errors().map(<[FieldError]>::len), Some(2));
    }
}
