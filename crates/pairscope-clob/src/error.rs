//! Error types for pairscope-clob.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClobError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

pub type ClobResult<T> = std::result::Result<T, ClobError>;
