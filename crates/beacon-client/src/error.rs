//! Error types for the client.

use tokio_tungstenite::tungstenite;

/// Errors returned by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The URL or token cannot form a handshake request.
    #[error("invalid client configuration: {0}")]
    Config(String),

    /// The `WebSocket` layer failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A frame could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The connection task has stopped.
    #[error("client is closed")]
    Closed,
}
