//! Market-channel wire messages.
//!
//! The market channel tags every event with an `event_type` string and
//! may deliver either a single event object or an array of events per
//! frame. Prices arrive as decimal strings and are kept as strings
//! here; exact conversion to points happens at the mirror boundary.

use serde::{Deserialize, Serialize};

/// Initial subscription for a set of outcome tokens.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub channel: String,
}

impl SubscribeRequest {
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self {
            assets_ids,
            channel: "market".to_string(),
        }
    }
}

/// Mid-session subscribe/unsubscribe operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRequest {
    pub assets_ids: Vec<String>,
    pub operation: String,
}

impl OperationRequest {
    pub fn subscribe(assets_ids: Vec<String>) -> Self {
        Self {
            assets_ids,
            operation: "subscribe".to_string(),
        }
    }

    pub fn unsubscribe(assets_ids: Vec<String>) -> Self {
        Self {
            assets_ids,
            operation: "unsubscribe".to_string(),
        }
    }
}

/// One price level on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLevel {
    pub price: String,
    pub size: String,
}

/// Full top-of-book snapshot for one token.
#[derive(Debug, Clone, Deserialize)]
pub struct BookEvent {
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One entry of a `price_change` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceLevelChange {
    #[serde(default)]
    pub asset_id: Option<String>,
    pub price: String,
    pub size: String,
    pub side: String,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
}

/// Best-bid/ask delta for one or more tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeEvent {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default, alias = "changes")]
    pub price_changes: Vec<PriceLevelChange>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Last trade print for one token.
#[derive(Debug, Clone, Deserialize)]
pub struct LastTradeEvent {
    pub asset_id: String,
    pub price: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Tick-size change notification.
#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeChangeEvent {
    pub asset_id: String,
    pub old_tick_size: String,
    pub new_tick_size: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Parsed stream event kinds.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Book(BookEvent),
    PriceChange(PriceChangeEvent),
    LastTrade(LastTradeEvent),
    TickSizeChange(TickSizeChangeEvent),
}

impl StreamEvent {
    /// Metric label for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Book(_) => "book",
            Self::PriceChange(_) => "price_change",
            Self::LastTrade(_) => "last_trade_price",
            Self::TickSizeChange(_) => "tick_size_change",
        }
    }
}

/// Result of parsing one text frame.
#[derive(Debug, Default)]
pub struct EventBatch {
    pub events: Vec<StreamEvent>,
    /// Events with an unrecognized `event_type`.
    pub unknown: u32,
    /// Events that failed to deserialize.
    pub failed: u32,
}

/// Parse a text frame into events.
///
/// A frame is either a single event object or an array of them.
/// Unknown kinds are counted, never errors; malformed known kinds are
/// counted as failures.
pub fn parse_events(text: &str) -> Result<EventBatch, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let mut batch = EventBatch::default();

    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                classify(item, &mut batch);
            }
        }
        other => classify(other, &mut batch),
    }

    Ok(batch)
}

fn classify(value: serde_json::Value, batch: &mut EventBatch) {
    let Some(event_type) = value.get("event_type").and_then(|v| v.as_str()) else {
        batch.failed += 1;
        return;
    };

    let parsed = match event_type {
        "book" => serde_json::from_value(value.clone()).map(StreamEvent::Book),
        "price_change" => serde_json::from_value(value.clone()).map(StreamEvent::PriceChange),
        "last_trade_price" => serde_json::from_value(value.clone()).map(StreamEvent::LastTrade),
        "tick_size_change" => {
            serde_json::from_value(value.clone()).map(StreamEvent::TickSizeChange)
        }
        other => {
            tracing::debug!(event_type = other, "Ignoring unknown event kind");
            batch.unknown += 1;
            return;
        }
    };

    match parsed {
        Ok(event) => batch.events.push(event),
        Err(e) => {
            tracing::debug!(error = %e, event_type, "Failed to parse stream event");
            batch.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_request_shape() {
        let req = SubscribeRequest::market(vec!["123".to_string()]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "market");
        assert_eq!(json["assets_ids"][0], "123");
    }

    #[test]
    fn test_operation_request_shape() {
        let req = OperationRequest::unsubscribe(vec!["9".to_string()]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["operation"], "unsubscribe");
    }

    #[test]
    fn test_parse_book_event() {
        let text = json!({
            "event_type": "book",
            "asset_id": "7045",
            "bids": [{"price": "0.44", "size": "120"}],
            "asks": [{"price": "0.46", "size": "80"}],
            "timestamp": "1767225600123"
        })
        .to_string();

        let batch = parse_events(&text).unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.unknown, 0);
        match &batch.events[0] {
            StreamEvent::Book(book) => {
                assert_eq!(book.asset_id, "7045");
                assert_eq!(book.bids[0].price, "0.44");
                assert_eq!(book.asks[0].size, "80");
            }
            other => panic!("expected book, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_event_array() {
        let text = json!([
            {
                "event_type": "last_trade_price",
                "asset_id": "7045",
                "price": "0.45"
            },
            {
                "event_type": "tick_size_change",
                "asset_id": "7045",
                "old_tick_size": "0.01",
                "new_tick_size": "0.01"
            }
        ])
        .to_string();

        let batch = parse_events(&text).unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].kind(), "last_trade_price");
        assert_eq!(batch.events[1].kind(), "tick_size_change");
    }

    #[test]
    fn test_parse_price_change_with_changes_alias() {
        let text = json!({
            "event_type": "price_change",
            "asset_id": "7045",
            "changes": [
                {"price": "0.44", "size": "0", "side": "BUY", "best_bid": "0.43", "best_ask": "0.46"}
            ]
        })
        .to_string();

        let batch = parse_events(&text).unwrap();
        assert_eq!(batch.events.len(), 1);
        match &batch.events[0] {
            StreamEvent::PriceChange(pc) => {
                assert_eq!(pc.price_changes.len(), 1);
                assert_eq!(pc.price_changes[0].best_bid.as_deref(), Some("0.43"));
            }
            other => panic!("expected price_change, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_counted_not_failed() {
        let text = json!({"event_type": "fancy_new_thing", "asset_id": "1"}).to_string();
        let batch = parse_events(&text).unwrap();
        assert!(batch.events.is_empty());
        assert_eq!(batch.unknown, 1);
        assert_eq!(batch.failed, 0);
    }

    #[test]
    fn test_malformed_known_kind_counted_as_failure() {
        // book without asset_id
        let text = json!({"event_type": "book", "bids": []}).to_string();
        let batch = parse_events(&text).unwrap();
        assert!(batch.events.is_empty());
        assert_eq!(batch.failed, 1);
    }

    #[test]
    fn test_non_json_is_error() {
        assert!(parse_events("PONG-ish garbage").is_err());
    }
}
