//! Error types for pairscope-engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] pairscope_clob::ClobError),

    #[error("Core error: {0}")]
    Core(#[from] pairscope_core::CoreError),

    #[error("Writer unavailable: {0}")]
    WriterGone(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
