//! Attempt lifecycle state.
//!
//! An attempt is one measurement life: a first-leg trigger tracked
//! until it pairs, stops out, or settlement fails it. Entry fields are
//! immutable after creation; the evaluator-only fields (opposite
//! trigger, stop-loss price) live here but are never persisted.

use chrono::{DateTime, Utc};
use pairscope_core::{Outcome, Points};

/// Data-quality annotations attached to an attempt at creation or
/// during its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    TriggerClampedToMin,
    TriggerClampedToMax,
    /// `opposite_max < tick`: pairing is mathematically unlikely.
    PairConstraintImpossible,
    /// `opposite_max > 100`: must never occur for correct inputs.
    ImpossibleOppositeMax,
    ReferenceSumAnomaly,
}

impl Annotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerClampedToMin => "trigger_clamped_to_min",
            Self::TriggerClampedToMax => "trigger_clamped_to_max",
            Self::PairConstraintImpossible => "pair_constraint_impossible",
            Self::ImpossibleOppositeMax => "impossible_opposite_max",
            Self::ReferenceSumAnomaly => "reference_sum_anomaly",
        }
    }
}

/// Why a failed attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    StopLoss,
    SettlementReached,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::SettlementReached => "settlement_reached",
        }
    }
}

/// A live attempt, owned by its market monitor.
#[derive(Debug, Clone)]
pub struct ActiveAttempt {
    pub attempt_id: i64,
    pub cycle_created: u32,
    pub t1: DateTime<Utc>,
    pub first_leg: Outcome,
    /// First-leg entry price: the triggering side's best ask at t1.
    pub p1: Points,
    pub reference_yes: Points,
    pub reference_no: Points,
    pub time_remaining_at_start: i64,
    pub yes_spread_entry: Option<i64>,
    pub no_spread_entry: Option<i64>,

    // Evaluator-only; not persisted.
    pub opposite_trigger: Points,
    pub opposite_max: Points,
    pub stop_loss_price: Option<Points>,

    // Running measurements.
    /// Lowest first-leg bid seen from fresh snapshots; MAE derives
    /// from it. Stale snapshots never update this.
    pub min_first_leg_bid: Option<Points>,
    /// Running min of `opposite_ask - opposite_trigger`.
    pub closest_approach: Option<i64>,
    pub had_feed_gap: bool,
    pub annotations: Vec<Annotation>,
}

impl ActiveAttempt {
    pub fn opposite_side(&self) -> Outcome {
        self.first_leg.opposite()
    }

    /// Max adverse excursion of the first leg, in points, floored at
    /// zero. `None` until a fresh bid has been observed.
    pub fn mae_points(&self) -> Option<i64> {
        self.min_first_leg_bid
            .map(|bid| (self.p1 - bid).inner().max(0))
    }

    /// Fold a fresh first-leg bid into the running minimum.
    pub fn observe_first_leg_bid(&mut self, bid: Points) {
        self.min_first_leg_bid = Some(match self.min_first_leg_bid {
            Some(current) => current.min(bid),
            None => bid,
        });
    }

    /// Fold a fresh opposite-ask distance into the closest approach.
    pub fn observe_opposite_ask(&mut self, opposite_ask: Points) {
        let distance = (opposite_ask - self.opposite_trigger).inner();
        self.closest_approach = Some(match self.closest_approach {
            Some(current) => current.min(distance),
            None => distance,
        });
    }

    pub fn annotate(&mut self, annotation: Annotation) {
        if !self.annotations.contains(&annotation) {
            self.annotations.push(annotation);
        }
    }

    /// Comma-joined annotation list for the store, `None` when clean.
    pub fn annotations_string(&self) -> Option<String> {
        if self.annotations.is_empty() {
            return None;
        }
        Some(
            self.annotations
                .iter()
                .map(Annotation::as_str)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// How an attempt reached a terminal status mid-window.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Opposite leg filled at maker terms below the pair cap.
    Paired {
        t2: DateTime<Utc>,
        actual_opposite_price: Points,
        pair_cost_points: i64,
        pair_profit_points: i64,
        time_to_pair_seconds: i64,
    },
    /// First-leg bid fell to the stop-loss price. The recorded
    /// opposite price is the observed first-leg bid; the cost books
    /// the exit as buying the complement at `100 - bid`.
    StopLoss {
        exit_bid: Points,
        pair_cost_points: i64,
        pair_profit_points: i64,
    },
}

/// A terminal transition emitted by the evaluator.
#[derive(Debug, Clone)]
pub struct CompletedAttempt {
    pub attempt: ActiveAttempt,
    pub completion: Completion,
    pub cycle: u32,
    pub completed_at: DateTime<Utc>,
    pub time_remaining_at_completion: i64,
}

impl CompletedAttempt {
    pub fn is_paired(&self) -> bool {
        matches!(self.completion, Completion::Paired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> ActiveAttempt {
        ActiveAttempt {
            attempt_id: 1,
            cycle_created: 4,
            t1: Utc::now(),
            first_leg: Outcome::Yes,
            p1: Points(39),
            reference_yes: Points(45),
            reference_no: Points(53),
            time_remaining_at_start: 600,
            yes_spread_entry: Some(2),
            no_spread_entry: Some(3),
            opposite_trigger: Points(48),
            opposite_max: Points(58),
            stop_loss_price: None,
            min_first_leg_bid: None,
            closest_approach: None,
            had_feed_gap: false,
            annotations: Vec::new(),
        }
    }

    #[test]
    fn test_mae_tracks_running_minimum() {
        let mut a = attempt();
        assert_eq!(a.mae_points(), None);

        a.observe_first_leg_bid(Points(38));
        assert_eq!(a.mae_points(), Some(1));

        a.observe_first_leg_bid(Points(35));
        assert_eq!(a.mae_points(), Some(4));

        // A recovery never shrinks the excursion.
        a.observe_first_leg_bid(Points(44));
        assert_eq!(a.mae_points(), Some(4));
    }

    #[test]
    fn test_mae_floors_at_zero() {
        let mut a = attempt();
        a.observe_first_leg_bid(Points(41));
        assert_eq!(a.mae_points(), Some(0));
    }

    #[test]
    fn test_closest_approach_is_running_min() {
        let mut a = attempt();
        a.observe_opposite_ask(Points(55));
        assert_eq!(a.closest_approach, Some(7));
        a.observe_opposite_ask(Points(50));
        assert_eq!(a.closest_approach, Some(2));
        a.observe_opposite_ask(Points(54));
        assert_eq!(a.closest_approach, Some(2));
    }

    #[test]
    fn test_annotations_deduplicate() {
        let mut a = attempt();
        a.annotate(Annotation::TriggerClampedToMin);
        a.annotate(Annotation::TriggerClampedToMin);
        a.annotate(Annotation::PairConstraintImpossible);
        assert_eq!(
            a.annotations_string().unwrap(),
            "trigger_clamped_to_min,pair_constraint_impossible"
        );
    }
}
