//! Catalog discovery and polling fallback clients.
//!
//! Two small REST clients over the CLOB API:
//! - `CatalogClient` lists known markets for the rotation loop.
//! - `PollingClient` serves top-of-book reads when the stream is
//!   degraded or a monitor is bootstrapping.

pub mod books;
pub mod catalog;
pub mod error;

pub use books::{BookLevel, PollingClient, WireBook};
pub use catalog::{CatalogClient, CatalogMarket, CatalogToken};
pub use error::{ClobError, ClobResult};
