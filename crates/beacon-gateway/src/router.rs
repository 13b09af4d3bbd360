//! Axum router construction.
//!
//! Assembles the `WebSocket` endpoint, the public status routes and the
//! key-gated integration routes into a single [`Router`].

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use beacon_core::config::ServerConfig;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api_key::require_api_key;
use crate::state::AppState;
use crate::{incidents, responders, status, ws};

/// Build the complete router.
///
/// Public:
/// - `GET /` -- HTML status page
/// - `GET /health`
/// - `GET /ws` -- session upgrade
/// - `GET /api/statistics`, `/api/connected-users`, `/api/websocket/status`,
///   `/api/emergency/status`
/// - `POST /api/auth/guest`
///
/// Behind `x-api-key`:
/// - `POST /api/broadcast`
/// - `/api/external/incidents/...` and `/api/external/responders/...`
pub fn build_router(state: Arc<AppState>) -> Router {
    let integration = Router::new()
        .route("/api/broadcast", post(status::broadcast))
        .route("/api/external/incidents", post(incidents::create))
        .route("/api/external/incidents/active", get(incidents::list_active))
        .route("/api/external/incidents/{id}", get(incidents::details))
        .route("/api/external/incidents/{id}/update", post(incidents::post_update))
        .route("/api/external/incidents/{id}/assign", post(incidents::assign))
        .route("/api/external/incidents/{id}/alert", post(incidents::alert))
        .route("/api/external/incidents/{id}/close", post(incidents::close))
        .route("/api/external/responders/nearby", get(responders::nearby))
        .route("/api/external/responders/active", get(responders::list_active))
        .route("/api/external/responders/broadcast", post(responders::broadcast))
        .route(
            "/api/external/responders/emergency-recall",
            post(responders::emergency_recall),
        )
        .route("/api/external/responders/{id}", get(responders::details))
        .route("/api/external/responders/{id}/status", post(responders::set_status))
        .route(
            "/api/external/responders/{id}/location",
            post(responders::update_location),
        )
        .route("/api/external/responders/{id}/message", post(responders::message))
        .route(
            "/api/external/responders/{id}/assignments",
            get(responders::assignments),
        )
        .route_layer(from_fn_with_state(Arc::clone(&state), require_api_key));

    let cors = cors_layer(&state.broker.config().server);

    Router::new()
        .route("/", get(status::index))
        .route("/health", get(status::health))
        .route("/ws", get(ws::ws_connect))
        .route("/api/statistics", get(status::statistics))
        .route("/api/connected-users", get(status::connected_users))
        .route("/api/websocket/status", get(status::websocket_status))
        .route("/api/emergency/status", get(status::emergency_status))
        .route("/api/auth/guest", post(status::guest_token))
        .merge(integration)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS from the configured origins; `*` allows any.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(%origin, error = %err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}
