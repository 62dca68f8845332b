//! Integer-point price model.
//!
//! One point is $0.01 of the resolution payout, so prices live in
//! [0, 100] points. Wire prices arrive as decimal strings ("0.53") and
//! are converted to points at the parse boundary via `rust_decimal`;
//! no floating arithmetic ever touches a price.

use crate::error::{CoreError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Resolution payout in points.
pub const PAYOUT_POINTS: i64 = 100;

/// Largest price a trigger level may clamp to.
const MAX_PRICE_POINTS: i64 = 99;

/// Price (or price offset) in integer points.
///
/// Intermediate arithmetic may leave the [0, 100] band (e.g. a pair-cap
/// remainder can go negative); callers clamp at the decision sites.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Points(pub i64);

impl Points {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> i64 {
        self.0
    }

    /// Parse a wire price string into points.
    ///
    /// The wire format is a decimal dollar fraction ("0.53", "0.5300").
    /// A value that is not an exact multiple of 0.01 is a malformed
    /// input, not a rounding candidate.
    pub fn parse_wire(s: &str) -> Result<Self> {
        let value: Decimal = s.trim().parse()?;
        Self::from_decimal(value)
    }

    /// Convert an exact decimal dollar fraction into points.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        let cents = value * Decimal::ONE_HUNDRED;
        if cents != cents.trunc() {
            return Err(CoreError::MalformedPrice(format!(
                "{value} is not a multiple of 0.01"
            )));
        }
        cents
            .to_i64()
            .map(Points)
            .ok_or_else(|| CoreError::MalformedPrice(format!("{value} out of range")))
    }

    /// Parse a tick size string ("0.01") into points.
    ///
    /// Ticks must be a positive whole number of points.
    pub fn parse_tick(s: &str) -> Result<Self> {
        let tick = Self::parse_wire(s).map_err(|_| CoreError::InvalidTick(s.to_string()))?;
        if tick.0 <= 0 {
            return Err(CoreError::InvalidTick(s.to_string()));
        }
        Ok(tick)
    }

    /// Floor to the nearest tick multiple.
    ///
    /// Euclidean flooring, so negative intermediates round toward -inf
    /// instead of toward zero.
    #[inline]
    pub fn floor_to_tick(&self, tick: Points) -> Self {
        if tick.0 <= 0 {
            return *self;
        }
        Self(self.0.div_euclid(tick.0) * tick.0)
    }

    /// Clamp into the tradable trigger band [tick, 99].
    #[inline]
    pub fn clamp_to_band(&self, tick: Points) -> Self {
        Self(self.0.clamp(tick.0, MAX_PRICE_POINTS))
    }

    /// Price of the complementary outcome: `100 - self`.
    #[inline]
    pub fn complement(&self) -> Self {
        Self(PAYOUT_POINTS - self.0)
    }

    /// Integer midpoint of a bid/ask pair, floored.
    #[inline]
    pub fn midpoint(bid: Points, ask: Points) -> Self {
        Self((bid.0 + ask.0).div_euclid(2))
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Points {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Points {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trailing_zeros_equivalent() {
        assert_eq!(Points::parse_wire("0.53").unwrap(), Points(53));
        assert_eq!(Points::parse_wire("0.5300").unwrap(), Points(53));
        assert_eq!(Points::parse_wire("0.53"), Points::parse_wire("0.5300"));
    }

    #[test]
    fn test_parse_bounds() {
        assert_eq!(Points::parse_wire("0").unwrap(), Points(0));
        assert_eq!(Points::parse_wire("1").unwrap(), Points(100));
        assert_eq!(Points::parse_wire("0.01").unwrap(), Points(1));
    }

    #[test]
    fn test_parse_sub_cent_rejected() {
        assert!(Points::parse_wire("0.535").is_err());
        assert!(Points::parse_wire("0.0050").is_err());
    }

    #[test]
    fn test_parse_garbage_rejected() {
        assert!(Points::parse_wire("").is_err());
        assert!(Points::parse_wire("abc").is_err());
    }

    #[test]
    fn test_tick_parse() {
        assert_eq!(Points::parse_tick("0.01").unwrap(), Points(1));
        assert_eq!(Points::parse_tick("0.05").unwrap(), Points(5));
        // Sub-point ticks and non-positive ticks are invalid.
        assert!(Points::parse_tick("0.001").is_err());
        assert!(Points::parse_tick("0").is_err());
        assert!(Points::parse_tick("-0.01").is_err());
    }

    #[test]
    fn test_floor_to_tick() {
        assert_eq!(Points(47).floor_to_tick(Points(5)), Points(45));
        assert_eq!(Points(45).floor_to_tick(Points(5)), Points(45));
        assert_eq!(Points(47).floor_to_tick(Points(1)), Points(47));
    }

    #[test]
    fn test_floor_to_tick_negative_floors_down() {
        // A pair-cap remainder below zero must floor toward -inf so the
        // "opposite_max below tick" branch stays well defined.
        assert_eq!(Points(-1).floor_to_tick(Points(2)), Points(-2));
        assert_eq!(Points(-3).floor_to_tick(Points(2)), Points(-4));
    }

    #[test]
    fn test_floor_scaling_law() {
        // floor_to_tick(x * k) == k * floor_to_tick(x) for ticks where
        // k * tick stays in band; guards against off-by-one rounding.
        let tick = Points(1);
        for x in 0..=33 {
            let k = 3;
            let lhs = Points(x * k).floor_to_tick(Points(tick.0 * k));
            let rhs = Points(Points(x).floor_to_tick(tick).0 * k);
            assert_eq!(lhs, rhs, "x={x}");
        }
    }

    #[test]
    fn test_clamp_to_band() {
        assert_eq!(Points(0).clamp_to_band(Points(1)), Points(1));
        assert_eq!(Points(-5).clamp_to_band(Points(1)), Points(1));
        assert_eq!(Points(120).clamp_to_band(Points(1)), Points(99));
        assert_eq!(Points(50).clamp_to_band(Points(1)), Points(50));
    }

    #[test]
    fn test_midpoint_floors() {
        assert_eq!(Points::midpoint(Points(44), Points(46)), Points(45));
        assert_eq!(Points::midpoint(Points(44), Points(47)), Points(45));
        assert_eq!(Points::midpoint(Points(52), Points(55)), Points(53));
    }

    #[test]
    fn test_complement() {
        assert_eq!(Points(36).complement(), Points(64));
        assert_eq!(Points(100).complement(), Points(0));
    }
}
