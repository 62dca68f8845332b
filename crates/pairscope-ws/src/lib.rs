//! Streaming market-data client for pairscope.
//!
//! Provides a long-lived subscription session against the market
//! channel with:
//! - Automatic reconnection with capped exponential backoff
//! - Resubscription of the full token set before event delivery
//! - Text PING heartbeat and a 2x-interval read deadline
//! - Mid-session subscribe/unsubscribe without session teardown
//! - Reconnect-storm detection for the polling fallback

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;

pub use connection::{StreamClient, StreamCommand, StreamConfig, StreamCounters, StreamNotice};
pub use error::{WsError, WsResult};
pub use message::{
    parse_events, BookEvent, EventBatch, LastTradeEvent, PriceChangeEvent, PriceLevelChange,
    StreamEvent, TickSizeChangeEvent, WireLevel,
};
pub use subscription::SubscriptionManager;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
