//! Logging, metrics and anomaly accounting for pairscope.

pub mod anomaly;
pub mod error;
pub mod logging;
pub mod metrics;

pub use anomaly::{AnomalyKind, AnomalyTally};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
