//! Shared application state for the HTTP surface.

use std::sync::Arc;

use beacon_core::Broker;

use crate::api_key::ApiKeys;

/// Reports whether the snapshot cache is reachable.
pub type CacheProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The broker all routes operate on.
    pub broker: Arc<Broker>,
    /// Keys accepted on the integration routes.
    pub api_keys: ApiKeys,
    /// Cache health, when a cache is configured.
    pub cache_probe: Option<CacheProbe>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api_keys", &self.api_keys)
            .field("cache_probe", &self.cache_probe.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State for `broker`, accepting the API keys from its configuration.
    pub fn new(broker: Arc<Broker>) -> Self {
        let api_keys = ApiKeys::new(broker.config().auth.api_keys.iter().cloned());
        Self {
            broker,
            api_keys,
            cache_probe: None,
        }
    }

    /// Attach a cache health probe.
    #[must_use]
    pub fn with_cache_probe(mut self, probe: CacheProbe) -> Self {
        self.cache_probe = Some(probe);
        self
    }

    /// `connected`, `disconnected` or `disabled`.
    pub fn cache_status(&self) -> &'static str {
        match &self.cache_probe {
            Some(probe) if probe() => "connected",
            Some(_) => "disconnected",
            None => "disabled",
        }
    }
}
