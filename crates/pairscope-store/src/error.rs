//! Error types for pairscope-store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Writer buffer overflow: {0} commands pending after retries")]
    BufferOverflow(usize),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
