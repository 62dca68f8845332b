//! Error types for pairscope-telemetry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Logging initialization failed: {0}")]
    Init(String),
}

pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;
