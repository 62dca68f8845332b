//! Cycle scheduling, trigger evaluation and market monitoring.
//!
//! The measurement pipeline, leaves first:
//! - `schedule`: plans cycle instants with dense numbering
//! - `attempt`: the attempt lifecycle state
//! - `evaluator`: the pure per-cycle decision function
//! - `monitor`: one state machine per observed market
//! - `rotation`: the discovery loop that spawns and retires monitors

pub mod attempt;
pub mod error;
pub mod evaluator;
pub mod monitor;
pub mod rotation;
pub mod schedule;

pub use attempt::{ActiveAttempt, Annotation, CompletedAttempt, Completion, FailReason};
pub use error::{EngineError, EngineResult};
pub use evaluator::{evaluate_cycle, CycleContext, CycleReport, RefPair, RunningUpdate, SkipReason};
pub use monitor::{MarketMonitor, MonitorDeps, MonitorHandle, MonitorState};
pub use rotation::{DiscoveryLoop, RotationConfig};
pub use schedule::{CycleSchedule, PlannedCycle, Tick, SETTLEMENT_GRACE};
