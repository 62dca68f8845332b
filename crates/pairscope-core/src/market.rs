//! Market window descriptors.

use crate::error::{CoreError, Result};
use crate::side::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque outcome-token identifier.
///
/// Token ids are 60+ digit decimal strings on the wire and must
/// round-trip as strings; they are never parsed as integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed 15-minute market window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketWindow {
    /// Stable key, e.g. `btc-updown-15m-1767225600`.
    pub market_id: String,
    /// Underlying asset symbol, lowercase (e.g. "btc").
    pub crypto_asset: String,
    pub condition_id: String,
    pub yes_token: TokenId,
    pub no_token: TokenId,
    /// Minimum price increment in points. Typically 1.
    pub tick_size_points: i64,
    pub start_time: DateTime<Utc>,
    pub settlement_time: DateTime<Utc>,
}

impl MarketWindow {
    /// Validate the descriptor's internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.tick_size_points <= 0 {
            return Err(CoreError::InvalidMarket(format!(
                "{}: non-positive tick size {}",
                self.market_id, self.tick_size_points
            )));
        }
        if self.settlement_time <= self.start_time {
            return Err(CoreError::InvalidMarket(format!(
                "{}: settlement not after start",
                self.market_id
            )));
        }
        if self.yes_token == self.no_token {
            return Err(CoreError::InvalidMarket(format!(
                "{}: identical outcome tokens",
                self.market_id
            )));
        }
        Ok(())
    }

    /// Token id for a side.
    pub fn token(&self, side: Outcome) -> &TokenId {
        match side {
            Outcome::Yes => &self.yes_token,
            Outcome::No => &self.no_token,
        }
    }

    /// Side for a token id, if it belongs to this market.
    pub fn side_of(&self, token: &str) -> Option<Outcome> {
        if self.yes_token.as_str() == token {
            Some(Outcome::Yes)
        } else if self.no_token.as_str() == token {
            Some(Outcome::No)
        } else {
            None
        }
    }

    /// Seconds left until settlement, floored at zero.
    pub fn time_remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.settlement_time - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> MarketWindow {
        MarketWindow {
            market_id: "btc-updown-15m-1767226500".to_string(),
            crypto_asset: "btc".to_string(),
            condition_id: "0xabc".to_string(),
            yes_token: TokenId::new("11111111111111111111111111111111111111111111111111111111111101"),
            no_token: TokenId::new("11111111111111111111111111111111111111111111111111111111111102"),
            tick_size_points: 1,
            start_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            settlement_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 15, 0).unwrap(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(window().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_tick() {
        let mut w = window();
        w.tick_size_points = 0;
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_token_ids_round_trip_as_strings() {
        let w = window();
        // 62-digit ids must survive untouched.
        assert_eq!(w.yes_token.to_string().len(), 62);
        assert_eq!(w.side_of(w.yes_token.as_str()), Some(Outcome::Yes));
        assert_eq!(w.side_of(w.no_token.as_str()), Some(Outcome::No));
        assert_eq!(w.side_of("999"), None);
    }

    #[test]
    fn test_time_remaining_floors_at_zero() {
        let w = window();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 20, 0).unwrap();
        assert_eq!(w.time_remaining_secs(after), 0);
        let before = Utc.with_ymd_and_hms(2026, 1, 1, 0, 10, 0).unwrap();
        assert_eq!(w.time_remaining_secs(before), 300);
    }
}
