//! Error types for pairscope-feed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Malformed price in {context}: {detail}")]
    MalformedPrice { context: &'static str, detail: String },

    #[error("Invalid tick size: {0}")]
    InvalidTick(String),
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;
