//! Immutable measurement parameter sets.
//!
//! A `ParameterSet` is created once at startup from configuration and
//! referenced by every market and attempt it governs. It is never
//! mutated after construction.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rule deciding when a first leg triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Trigger when best ask touches the trigger level.
    #[default]
    AskTouch,
}

/// Source of the per-side reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// Floored integer midpoint of best bid/ask. Preferred.
    #[default]
    Midpoint,
    /// Last trade price when present and fresh, midpoint otherwise.
    LastTrade,
}

/// Tie-break rule when both sides trigger in the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakRule {
    /// Smaller trigger distance first, YES on equality. Ordering only
    /// affects attempt id assignment; both attempts are always created.
    #[default]
    DistanceThenYes,
}

/// Cycle cadence for a market's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Sampling {
    /// Fixed interval between cycles, in seconds.
    FixedInterval { interval_seconds: u64 },
    /// Fixed number of cycles spread over the remaining window.
    FixedCount { cycles_per_market: u32 },
}

/// Immutable configuration snapshot used by attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Human-readable name, also the store identity for bootstrap.
    pub name: String,
    /// Trigger offset below the reference price, in points.
    pub s0_points: i64,
    /// Minimum guaranteed pair profit, in points.
    pub delta_points: i64,
    /// Maximum qualifying combined cost: `100 - delta_points`.
    pub pair_cap_points: i64,
    pub trigger_rule: TriggerRule,
    pub reference_source: ReferenceSource,
    pub tie_break_rule: TieBreakRule,
    pub sampling: Sampling,
    /// Mirror age beyond which a cycle is a feed gap.
    pub feed_gap_threshold_seconds: u64,
    /// Stop-loss distance below P1 in points; `None` disables stop loss.
    pub stop_loss_threshold_points: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ParameterSet {
    /// Build and validate a parameter set. `pair_cap_points` is derived,
    /// never supplied.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        s0_points: i64,
        delta_points: i64,
        trigger_rule: TriggerRule,
        reference_source: ReferenceSource,
        sampling: Sampling,
        feed_gap_threshold_seconds: u64,
        stop_loss_threshold_points: Option<i64>,
    ) -> Result<Self> {
        if !(1..=49).contains(&s0_points) {
            return Err(CoreError::InvalidParameterSet(format!(
                "s0_points must be in [1, 49], got {s0_points}"
            )));
        }
        if !(1..=49).contains(&delta_points) {
            return Err(CoreError::InvalidParameterSet(format!(
                "delta_points must be in [1, 49], got {delta_points}"
            )));
        }
        if feed_gap_threshold_seconds == 0 {
            return Err(CoreError::InvalidParameterSet(
                "feed_gap_threshold_seconds must be positive".to_string(),
            ));
        }
        if let Some(sl) = stop_loss_threshold_points {
            if sl <= 0 {
                return Err(CoreError::InvalidParameterSet(format!(
                    "stop_loss_threshold_points must be positive, got {sl}"
                )));
            }
        }
        match sampling {
            Sampling::FixedInterval { interval_seconds } if interval_seconds == 0 => {
                return Err(CoreError::InvalidParameterSet(
                    "cycle interval must be positive".to_string(),
                ));
            }
            Sampling::FixedCount { cycles_per_market } if cycles_per_market == 0 => {
                return Err(CoreError::InvalidParameterSet(
                    "cycles_per_market must be positive".to_string(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            name: name.into(),
            s0_points,
            delta_points,
            pair_cap_points: 100 - delta_points,
            trigger_rule,
            reference_source,
            tie_break_rule: TieBreakRule::DistanceThenYes,
            sampling,
            feed_gap_threshold_seconds,
            stop_loss_threshold_points,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(s0: i64, delta: i64) -> Result<ParameterSet> {
        ParameterSet::new(
            "test",
            s0,
            delta,
            TriggerRule::AskTouch,
            ReferenceSource::Midpoint,
            Sampling::FixedInterval {
                interval_seconds: 10,
            },
            10,
            None,
        )
    }

    #[test]
    fn test_pair_cap_derived() {
        let params = make(5, 3).unwrap();
        assert_eq!(params.pair_cap_points, 97);
        assert_eq!(params.pair_cap_points + params.delta_points, 100);
    }

    #[test]
    fn test_range_validation() {
        assert!(make(0, 3).is_err());
        assert!(make(50, 3).is_err());
        assert!(make(5, 0).is_err());
        assert!(make(5, 50).is_err());
        assert!(make(1, 49).is_ok());
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let err = ParameterSet::new(
            "bad",
            5,
            3,
            TriggerRule::AskTouch,
            ReferenceSource::Midpoint,
            Sampling::FixedCount {
                cycles_per_market: 0,
            },
            10,
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_non_positive_stop_loss_rejected() {
        let err = ParameterSet::new(
            "bad",
            5,
            3,
            TriggerRule::AskTouch,
            ReferenceSource::Midpoint,
            Sampling::FixedInterval {
                interval_seconds: 10,
            },
            10,
            Some(0),
        );
        assert!(err.is_err());
    }
}
