//! HTTP and `WebSocket` surface of the Beacon broker.
//!
//! Built on Axum. The `WebSocket` endpoint carries live sessions; REST
//! routes expose status and let integrated backends create, update and
//! route incidents and responders.
//!
//! # Modules
//!
//! - [`ws`] -- Session upgrade and the per-socket pump
//! - [`incidents`] -- Integration routes for incidents
//! - [`responders`] -- Integration routes for responders
//! - [`status`] -- Status pages, statistics, guest tokens, broadcast
//! - [`api_key`] -- `x-api-key` middleware
//! - [`extract`] -- Extractors that reject with JSON errors
//! - [`router`] -- Route table assembly
//! - [`server`] -- Server startup and graceful shutdown
//! - [`state`] -- Shared application state
//! - [`error`] -- Error to HTTP response mapping

pub mod api_key;
pub mod error;
pub mod extract;
pub mod incidents;
pub mod responders;
pub mod router;
pub mod server;
pub mod state;
pub mod status;
pub mod ws;

pub use error::GatewayError;
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::{AppState, CacheProbe};
