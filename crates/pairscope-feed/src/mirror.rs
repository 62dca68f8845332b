//! Per-token top-of-book state.

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use pairscope_core::{MarketWindow, Outcome, Points};
use pairscope_ws::{BookEvent, StreamEvent, WireLevel};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Validity of one side's top of book, mirroring the update invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// Both bid and ask present, bid <= ask.
    Valid,
    NoBid,
    NoAsk,
    Empty,
    /// bid > ask; treated as empty-side for the evaluator.
    Crossed,
}

impl BookState {
    /// Whether the evaluator may use this side.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Top-of-book state for one outcome token.
#[derive(Debug, Default)]
pub struct TokenBook {
    bid: Option<Points>,
    bid_size: Option<Decimal>,
    ask: Option<Points>,
    ask_size: Option<Decimal>,
    last_trade: Option<Points>,
    last_event_mono: Option<Instant>,
    last_event_at: Option<DateTime<Utc>>,
    /// Set on a crossed book or a malformed update; cleared by the next
    /// full book snapshot.
    stale: bool,
}

impl TokenBook {
    fn touch(&mut self, received_at: DateTime<Utc>) {
        self.last_event_mono = Some(Instant::now());
        self.last_event_at = Some(received_at);
    }

    fn apply_book(&mut self, book: &BookEvent, received_at: DateTime<Utc>) -> FeedResult<()> {
        let bid = best_level(&book.bids, true)?;
        let ask = best_level(&book.asks, false)?;

        self.bid = bid.as_ref().map(|(p, _)| *p);
        self.bid_size = bid.map(|(_, s)| s);
        self.ask = ask.as_ref().map(|(p, _)| *p);
        self.ask_size = ask.map(|(_, s)| s);
        self.stale = false;
        self.touch(received_at);
        self.check_crossed();
        Ok(())
    }

    fn apply_best(
        &mut self,
        best_bid: Option<&str>,
        best_ask: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> FeedResult<()> {
        if let Some(raw) = best_bid {
            self.bid = Some(parse_price(raw, "price_change best_bid")?);
        }
        if let Some(raw) = best_ask {
            self.ask = Some(parse_price(raw, "price_change best_ask")?);
        }
        self.touch(received_at);
        self.check_crossed();
        Ok(())
    }

    fn apply_last_trade(&mut self, price: &str, received_at: DateTime<Utc>) -> FeedResult<()> {
        self.last_trade = Some(parse_price(price, "last_trade_price")?);
        self.touch(received_at);
        Ok(())
    }

    fn check_crossed(&mut self) {
        if let (Some(bid), Some(ask)) = (self.bid, self.ask) {
            if bid > ask {
                warn!(bid = %bid, ask = %ask, "Crossed book; marking side stale");
                self.stale = true;
            }
        }
    }

    fn mark_stale(&mut self) {
        self.stale = true;
    }

    fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            bid: self.bid,
            ask: self.ask,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            last_trade: self.last_trade,
            last_event_at: self.last_event_at,
            age: self.last_event_mono.map(|t| t.elapsed()),
            stale: self.stale,
        }
    }
}

/// Immutable view of one side at a cycle instant.
#[derive(Debug, Clone)]
pub struct TokenSnapshot {
    pub bid: Option<Points>,
    pub ask: Option<Points>,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub last_trade: Option<Points>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Monotonic age of the newest event, `None` before any event.
    pub age: Option<Duration>,
    pub stale: bool,
}

impl TokenSnapshot {
    pub fn state(&self) -> BookState {
        match (self.bid, self.ask) {
            (None, None) => BookState::Empty,
            (Some(_), None) => BookState::NoAsk,
            (None, Some(_)) => BookState::NoBid,
            (Some(bid), Some(ask)) => {
                if bid > ask {
                    BookState::Crossed
                } else {
                    BookState::Valid
                }
            }
        }
    }

    /// Fresh iff the newest event is within the feed-gap threshold.
    pub fn is_fresh(&self, feed_gap_threshold: Duration) -> bool {
        self.age.is_some_and(|age| age <= feed_gap_threshold)
    }

    /// Usable by the evaluator: structurally valid and not stale.
    pub fn is_usable(&self) -> bool {
        !self.stale && self.state().is_usable()
    }

    /// Ask minus bid, when the side is valid.
    pub fn spread(&self) -> Option<i64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid <= ask => Some((ask - bid).inner()),
            _ => None,
        }
    }
}

/// Two-sided snapshot taken at a cycle instant.
#[derive(Debug, Clone)]
pub struct PairSnapshot {
    pub yes: TokenSnapshot,
    pub no: TokenSnapshot,
    pub taken_at: DateTime<Utc>,
}

/// What an event application did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated(Outcome),
    /// Tick size changed for the side; carries the new size in points.
    TickSize(Outcome, i64),
    /// Event referenced a token this mirror does not track.
    Ignored,
}

/// Order-book mirror for one market's two outcome tokens.
///
/// Owned and mutated by a single monitor task; reads between
/// applications are therefore atomic across both sides.
#[derive(Debug)]
pub struct MarketMirror {
    yes_token: String,
    no_token: String,
    yes: TokenBook,
    no: TokenBook,
}

impl MarketMirror {
    pub fn new(market: &MarketWindow) -> Self {
        Self {
            yes_token: market.yes_token.as_str().to_string(),
            no_token: market.no_token.as_str().to_string(),
            yes: TokenBook::default(),
            no: TokenBook::default(),
        }
    }

    fn side_of(&self, token: &str) -> Option<Outcome> {
        if token == self.yes_token {
            Some(Outcome::Yes)
        } else if token == self.no_token {
            Some(Outcome::No)
        } else {
            None
        }
    }

    fn book_mut(&mut self, side: Outcome) -> &mut TokenBook {
        match side {
            Outcome::Yes => &mut self.yes,
            Outcome::No => &mut self.no,
        }
    }

    /// Apply one stream event.
    ///
    /// A malformed price marks the affected side stale and surfaces as
    /// an error for anomaly accounting; it never panics or aborts the
    /// monitor.
    pub fn apply(&mut self, event: &StreamEvent, received_at: DateTime<Utc>) -> FeedResult<Applied> {
        match event {
            StreamEvent::Book(book) => {
                let Some(side) = self.side_of(&book.asset_id) else {
                    return Ok(Applied::Ignored);
                };
                let entry = self.book_mut(side);
                if let Err(e) = entry.apply_book(book, received_at) {
                    entry.mark_stale();
                    return Err(e);
                }
                Ok(Applied::Updated(side))
            }
            StreamEvent::PriceChange(pc) => {
                let mut touched = None;
                for change in &pc.price_changes {
                    let token = change
                        .asset_id
                        .as_deref()
                        .or(pc.asset_id.as_deref())
                        .unwrap_or_default();
                    let Some(side) = self.side_of(token) else {
                        continue;
                    };
                    let entry = self.book_mut(side);
                    if let Err(e) = entry.apply_best(
                        change.best_bid.as_deref(),
                        change.best_ask.as_deref(),
                        received_at,
                    ) {
                        entry.mark_stale();
                        return Err(e);
                    }
                    touched = Some(side);
                }
                Ok(touched.map_or(Applied::Ignored, Applied::Updated))
            }
            StreamEvent::LastTrade(trade) => {
                let Some(side) = self.side_of(&trade.asset_id) else {
                    return Ok(Applied::Ignored);
                };
                let entry = self.book_mut(side);
                if let Err(e) = entry.apply_last_trade(&trade.price, received_at) {
                    entry.mark_stale();
                    return Err(e);
                }
                Ok(Applied::Updated(side))
            }
            StreamEvent::TickSizeChange(change) => {
                let Some(side) = self.side_of(&change.asset_id) else {
                    return Ok(Applied::Ignored);
                };
                let tick = Points::parse_tick(&change.new_tick_size)
                    .map_err(|_| FeedError::InvalidTick(change.new_tick_size.clone()))?;
                self.book_mut(side).touch(received_at);
                debug!(side = %side, tick = %tick, "Tick size change");
                Ok(Applied::TickSize(side, tick.inner()))
            }
        }
    }

    /// Consistent two-sided snapshot.
    pub fn snapshot_pair(&self) -> PairSnapshot {
        PairSnapshot {
            yes: self.yes.snapshot(),
            no: self.no.snapshot(),
            taken_at: Utc::now(),
        }
    }

    /// Whether both sides have received at least one full book.
    pub fn has_both_books(&self) -> bool {
        self.yes.last_event_mono.is_some() && self.no.last_event_mono.is_some()
    }
}

fn parse_price(raw: &str, context: &'static str) -> FeedResult<Points> {
    Points::parse_wire(raw).map_err(|e| FeedError::MalformedPrice {
        context,
        detail: e.to_string(),
    })
}

/// Best level of a wire ladder: highest price for bids, lowest for
/// asks. Ladders are not trusted to arrive sorted.
fn best_level(levels: &[WireLevel], is_bid: bool) -> FeedResult<Option<(Points, Decimal)>> {
    let mut best: Option<(Points, Decimal)> = None;
    for level in levels {
        let price = parse_price(&level.price, "book level")?;
        let size: Decimal = level.size.parse().unwrap_or_default();
        if size <= Decimal::ZERO {
            continue;
        }
        let better = match &best {
            None => true,
            Some((current, _)) => {
                if is_bid {
                    price > *current
                } else {
                    price < *current
                }
            }
        };
        if better {
            best = Some((price, size));
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pairscope_core::TokenId;
    use pairscope_ws::parse_events;
    use serde_json::json;

    fn market() -> MarketWindow {
        MarketWindow {
            market_id: "btc-updown-15m-1767226500".to_string(),
            crypto_asset: "btc".to_string(),
            condition_id: "0xabc".to_string(),
            yes_token: TokenId::new("yes-token"),
            no_token: TokenId::new("no-token"),
            tick_size_points: 1,
            start_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            settlement_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 15, 0).unwrap(),
        }
    }

    fn book_event(token: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> StreamEvent {
        let text = json!({
            "event_type": "book",
            "asset_id": token,
            "bids": bids.iter().map(|(p, s)| json!({"price": p, "size": s})).collect::<Vec<_>>(),
            "asks": asks.iter().map(|(p, s)| json!({"price": p, "size": s})).collect::<Vec<_>>(),
        })
        .to_string();
        parse_events(&text).unwrap().events.remove(0)
    }

    #[test]
    fn test_book_applies_best_levels() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event(
            "yes-token",
            &[("0.42", "10"), ("0.44", "5")],
            &[("0.46", "7"), ("0.48", "3")],
        );
        let applied = mirror.apply(&event, Utc::now()).unwrap();
        assert_eq!(applied, Applied::Updated(Outcome::Yes));

        let snap = mirror.snapshot_pair();
        assert_eq!(snap.yes.bid, Some(Points(44)));
        assert_eq!(snap.yes.ask, Some(Points(46)));
        assert_eq!(snap.yes.state(), BookState::Valid);
        assert_eq!(snap.yes.spread(), Some(2));
        // NO side untouched.
        assert_eq!(snap.no.state(), BookState::Empty);
    }

    #[test]
    fn test_zero_size_levels_skipped() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event("yes-token", &[("0.44", "0"), ("0.40", "5")], &[("0.46", "1")]);
        mirror.apply(&event, Utc::now()).unwrap();
        assert_eq!(mirror.snapshot_pair().yes.bid, Some(Points(40)));
    }

    #[test]
    fn test_crossed_book_marks_stale() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event("no-token", &[("0.55", "1")], &[("0.52", "1")]);
        mirror.apply(&event, Utc::now()).unwrap();
        let snap = mirror.snapshot_pair();
        assert_eq!(snap.no.state(), BookState::Crossed);
        assert!(!snap.no.state().is_usable());
    }

    #[test]
    fn test_equal_bid_ask_is_not_crossed() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event("no-token", &[("0.52", "1")], &[("0.52", "1")]);
        mirror.apply(&event, Utc::now()).unwrap();
        assert_eq!(mirror.snapshot_pair().no.state(), BookState::Valid);
    }

    #[test]
    fn test_malformed_price_errors_and_marks_stale() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event("yes-token", &[("0.445", "1")], &[("0.46", "1")]);
        assert!(mirror.apply(&event, Utc::now()).is_err());
        assert!(mirror.snapshot_pair().yes.stale);
    }

    #[test]
    fn test_fresh_book_recovers_staleness() {
        let mut mirror = MarketMirror::new(&market());
        let bad = book_event("yes-token", &[("0.55", "1")], &[("0.52", "1")]);
        mirror.apply(&bad, Utc::now()).unwrap();
        assert!(mirror.snapshot_pair().yes.stale);

        let good = book_event("yes-token", &[("0.44", "1")], &[("0.46", "1")]);
        mirror.apply(&good, Utc::now()).unwrap();
        assert_eq!(mirror.snapshot_pair().yes.state(), BookState::Valid);
    }

    #[test]
    fn test_price_change_updates_best() {
        let mut mirror = MarketMirror::new(&market());
        let book = book_event("yes-token", &[("0.44", "1")], &[("0.46", "1")]);
        mirror.apply(&book, Utc::now()).unwrap();

        let text = json!({
            "event_type": "price_change",
            "asset_id": "yes-token",
            "price_changes": [
                {"price": "0.45", "size": "3", "side": "BUY", "best_bid": "0.45", "best_ask": "0.46"}
            ]
        })
        .to_string();
        let event = parse_events(&text).unwrap().events.remove(0);
        mirror.apply(&event, Utc::now()).unwrap();
        assert_eq!(mirror.snapshot_pair().yes.bid, Some(Points(45)));
    }

    #[test]
    fn test_last_trade_recorded() {
        let mut mirror = MarketMirror::new(&market());
        let text = json!({
            "event_type": "last_trade_price",
            "asset_id": "no-token",
            "price": "0.53"
        })
        .to_string();
        let event = parse_events(&text).unwrap().events.remove(0);
        mirror.apply(&event, Utc::now()).unwrap();
        assert_eq!(mirror.snapshot_pair().no.last_trade, Some(Points(53)));
    }

    #[test]
    fn test_foreign_token_ignored() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event("someone-else", &[("0.44", "1")], &[("0.46", "1")]);
        assert_eq!(mirror.apply(&event, Utc::now()).unwrap(), Applied::Ignored);
    }

    #[test]
    fn test_tick_size_change_surfaces_points() {
        let mut mirror = MarketMirror::new(&market());
        let text = json!({
            "event_type": "tick_size_change",
            "asset_id": "yes-token",
            "old_tick_size": "0.01",
            "new_tick_size": "0.05"
        })
        .to_string();
        let event = parse_events(&text).unwrap().events.remove(0);
        assert_eq!(
            mirror.apply(&event, Utc::now()).unwrap(),
            Applied::TickSize(Outcome::Yes, 5)
        );
    }

    #[test]
    fn test_freshness_threshold() {
        let mut mirror = MarketMirror::new(&market());
        let event = book_event("yes-token", &[("0.44", "1")], &[("0.46", "1")]);
        mirror.apply(&event, Utc::now()).unwrap();
        let snap = mirror.snapshot_pair();
        assert!(snap.yes.is_fresh(Duration::from_secs(10)));
        assert!(!snap.no.is_fresh(Duration::from_secs(10)));
    }
}
