//! Reconnecting `WebSocket` client for the Beacon broker.
//!
//! Used by responder units and dashboards written in Rust, and by the
//! end-to-end tests. The client keeps one connection alive, reconnecting
//! with bounded exponential back-off, and hands every broker frame to its
//! owner over a channel.
//!
//! # Modules
//!
//! - [`client`] -- [`BeaconClient`] and the connection task
//! - [`backoff`] -- Reconnect delay policy
//! - [`error`] -- Shared error types

pub mod backoff;
pub mod client;
pub mod error;

pub use backoff::Backoff;
pub use client::{BeaconClient, ClientConfig, Notice};
pub use error::ClientError;
