//! `x-api-key` gate for the integration routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::error::GatewayError;
use crate::state::AppState;

/// Header carrying the integration key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The set of accepted keys.
#[derive(Clone, Default)]
pub struct ApiKeys(Arc<[String]>);

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("count", &self.0.len())
            .finish()
    }
}

impl ApiKeys {
    /// Accept exactly `keys`. Empty keys are ignored.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self(keys.into_iter().filter(|k| !k.is_empty()).collect())
    }

    /// Whether no key is configured; every request is then refused.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare `provided` against every key in constant time.
    pub fn accepts(&self, provided: &str) -> bool {
        let provided = provided.as_bytes();
        let mut matched = subtle::Choice::from(0);
        for key in self.0.iter() {
            let key = key.as_bytes();
            if key.len() == provided.len() {
                matched |= key.ct_eq(provided);
            }
        }
        matched.into()
    }
}

/// Middleware refusing requests without a valid `x-api-key`.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let verdict = match request.headers().get(API_KEY_HEADER) {
        None => Err(GatewayError::MissingApiKey),
        Some(value) if value.to_str().is_ok_and(|key| state.api_keys.accepts(key)) => Ok(()),
        Some(_) => Err(GatewayError::InvalidApiKey),
    };
    if let Err(err) = verdict {
        tracing::warn!(
            target: "security",
            method = %request.method(),
            path = request.uri().path(),
            error = %err,
            "integration request refused"
        );
        return Err(err);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_any_configured_key() {
        let keys = ApiKeys::new(["alpha-key".to_owned(), "bravo-key".to_owned()]);
        assert!(keys.accepts("alpha-key"));
        assert!(keys.accepts("bravo-key"));
        assert!(!keys.accepts("alpha-ke"));
        assert!(!keys.accepts(""));
    }

    #[test]
    fn empty_configuration_refuses_everything() {
        let keys = ApiKeys::new([String::new()]);
        assert!(keys.is_empty());
        assert!(!keys.accepts(""));
    }
}
