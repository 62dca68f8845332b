//! Error types for pairscope-ws.

use thiserror::Error;

/// Stream client error types.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by server: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Read deadline expired (no inbound messages)")]
    ReadDeadline,

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for stream operations.
pub type WsResult<T> = std::result::Result<T, WsError>;
