//! Order-book mirror for pairscope market monitors.
//!
//! Each monitor owns one `MarketMirror` covering its two outcome
//! tokens. Events are applied in receipt order by the monitor task, so
//! a two-sided snapshot taken between applications is consistent by
//! construction.

pub mod error;
pub mod mirror;

pub use error::{FeedError, FeedResult};
pub use mirror::{Applied, BookState, MarketMirror, PairSnapshot, TokenBook, TokenSnapshot};
