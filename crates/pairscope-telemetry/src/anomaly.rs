//! Anomaly taxonomy and per-market accounting.
//!
//! Anomalies never stop processing; they are counted, logged at WARN by
//! the call sites, and rolled into the market summary at finalization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Data-quality anomaly kinds observed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A side had no bid or no ask at a cycle instant.
    OrderbookEmpty,
    /// `|ref_yes + ref_no - 100| > 2`.
    ReferenceSumAnomaly,
    /// Trigger level clamped up to the tick floor.
    TriggerClampedToMin,
    /// Trigger level clamped down to 99.
    TriggerClampedToMax,
    /// `opposite_max < tick` at attempt creation.
    PairConstraintImpossible,
    /// `opposite_max > 100`; an invariant bug for correct inputs.
    ImpossibleOppositeMax,
    /// Mirror older than the feed-gap threshold at a cycle instant.
    FeedGap,
    /// A wire price failed exact decimal parsing.
    MalformedPrice,
    /// A planned cycle instant was already more than one interval old.
    MissedCycle,
    /// Stream event with an unrecognized `event_type`.
    UnknownEvent,
    /// Stream message that failed JSON parsing.
    ParseError,
    /// Server/local clock skew above threshold at monitor boot.
    ClockSkew,
    /// Monitor cycle number failed to advance (watchdog).
    MonitorStalled,
    /// Reconnect storm forced the polling fallback.
    ReconnectStorm,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderbookEmpty => "orderbook_empty",
            Self::ReferenceSumAnomaly => "reference_sum_anomaly",
            Self::TriggerClampedToMin => "trigger_clamped_to_min",
            Self::TriggerClampedToMax => "trigger_clamped_to_max",
            Self::PairConstraintImpossible => "pair_constraint_impossible",
            Self::ImpossibleOppositeMax => "impossible_opposite_max",
            Self::FeedGap => "feed_gap",
            Self::MalformedPrice => "malformed_price",
            Self::MissedCycle => "missed_cycle",
            Self::UnknownEvent => "unknown_event",
            Self::ParseError => "parse_error",
            Self::ClockSkew => "clock_skew",
            Self::MonitorStalled => "monitor_stalled",
            Self::ReconnectStorm => "reconnect_storm",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-market anomaly tally.
///
/// Exceeding `max_per_market` flags the market; a flagged market still
/// runs to settlement.
#[derive(Debug, Clone)]
pub struct AnomalyTally {
    counts: HashMap<AnomalyKind, u64>,
    total: u64,
    max_per_market: u64,
    flagged: bool,
}

impl AnomalyTally {
    pub fn new(max_per_market: u64) -> Self {
        Self {
            counts: HashMap::new(),
            total: 0,
            max_per_market,
            flagged: false,
        }
    }

    /// Record one anomaly; returns true the first time the market
    /// crosses its flag threshold.
    pub fn record(&mut self, kind: AnomalyKind) -> bool {
        *self.counts.entry(kind).or_insert(0) += 1;
        self.total += 1;
        crate::metrics::ANOMALIES_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();
        if !self.flagged && self.total > self.max_per_market {
            self.flagged = true;
            return true;
        }
        false
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, kind: AnomalyKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }
}
