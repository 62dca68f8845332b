//! Core domain types for the pairscope measurement engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `Points`: integer price model (1 point = $0.01) with exact wire parsing
//! - `Outcome`: the two sides of a binary market
//! - `ParameterSet`: immutable measurement configuration
//! - `MarketWindow`: descriptor for one observed 15-minute market

pub mod error;
pub mod market;
pub mod params;
pub mod points;
pub mod side;

pub use error::{CoreError, Result};
pub use market::{MarketWindow, TokenId};
pub use params::{ParameterSet, ReferenceSource, Sampling, TieBreakRule, TriggerRule};
pub use points::{Points, PAYOUT_POINTS};
pub use side::Outcome;
