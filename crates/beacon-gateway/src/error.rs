//! Error types for the HTTP surface.
//!
//! [`GatewayError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use beacon_core::BrokerError;

/// Errors that can occur in the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A broker operation failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The request is missing something the broker never sees.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No `x-api-key` header was sent.
    #[error("API key required")]
    MissingApiKey,

    /// The `x-api-key` header matched no configured key.
    #[error("invalid API key")]
    InvalidApiKey,
}

impl GatewayError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Broker(err) => match err {
                BrokerError::Authentication(_) => StatusCode::UNAUTHORIZED,
                BrokerError::Authorization(_) => StatusCode::FORBIDDEN,
                BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
                BrokerError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                BrokerError::NotFound { .. } => StatusCode::NOT_FOUND,
                BrokerError::AtCapacity | BrokerError::CacheUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingApiKey => StatusCode::UNAUTHORIZED,
            Self::InvalidApiKey => StatusCode::FORBIDDEN,
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Broker(err) => err.code(),
            Self::BadRequest(_) => "VALIDATION_ERROR",
            Self::MissingApiKey | Self::InvalidApiKey => "AUTHENTICATION_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, errors, retry_after) = match &self {
            Self::Broker(err) => {
                if let BrokerError::Internal(detail) | BrokerError::CacheUnavailable(detail) = err {
                    tracing::error!(error = %detail, "request failed");
                }
                let retry_after = match err {
                    BrokerError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                    _ => None,
                };
                (err.client_message(), err.field_errors().map(<[_]>::to_vec), retry_after)
            }
            Self::BadRequest(msg) => (msg.clone(), None, None),
            Self::MissingApiKey | Self::InvalidApiKey => (self.to_string(), None, None),
        };

        let mut body = serde_json::json!({
            "error": message,
            "code": self.code(),
            "status": status.as_u16(),
        });
        if let (Some(errors), Some(map)) = (errors, body.as_object_mut()) {
            map.insert("errors".to_owned(), serde_json::json!(errors));
        }

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
