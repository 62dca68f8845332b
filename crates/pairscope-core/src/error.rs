//! Error types for pairscope-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("Malformed price: {0}")]
    MalformedPrice(String),

    #[error("Invalid tick size: {0}")]
    InvalidTick(String),

    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),

    #[error("Invalid market window: {0}")]
    InvalidMarket(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
