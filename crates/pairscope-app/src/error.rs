//! Error types for the pairscope binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] pairscope_store::StoreError),

    #[error("Core error: {0}")]
    Core(#[from] pairscope_core::CoreError),

    #[error("CLOB client error: {0}")]
    Clob(#[from] pairscope_clob::ClobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = std::result::Result<T, AppError>;
