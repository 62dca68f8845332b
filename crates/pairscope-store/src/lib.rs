//! Durable SQLite writer for pairscope measurements.
//!
//! A single writer task serializes every mutation for every monitor.
//! Producers enqueue `WriteCommand`s on an unbounded channel; the
//! writer applies them in arrival order in short transactions, which
//! gives per-market and per-attempt FIFO for free. Terminal attempt
//! transitions are conditional updates gated on `status = 'active'`,
//! so a replay or a retry after partial failure is safe.

pub mod command;
pub mod error;
pub mod schema;
pub mod store;
pub mod writer;

pub use command::{
    AttemptRow, AttemptRunningUpdate, AttemptTerminalUpdate, LifecycleRow, MarketRow,
    MarketSummary, ParameterSetRow, SnapshotRow, WriteCommand,
};
pub use error::{StoreError, StoreResult};
pub use store::SqliteStore;
pub use writer::{DurableWriter, WriterConfig, WriterHandle};
