//! The per-cycle trigger evaluator.
//!
//! A pure decision function over one two-sided snapshot: it creates
//! new attempts, advances or terminates active ones, and reports
//! anomalies. It performs no I/O and signals nothing out-of-band; the
//! monitor turns its report into write commands.
//!
//! Trigger detection at cycle N uses the reference prices computed at
//! the previous evaluated cycle. A same-snapshot midpoint reference
//! can never fire ASK_TOUCH (bid <= ask forces trigger < ask), so the
//! reference necessarily lags the ask it is compared against. The
//! first evaluated cycle seeds the references and cannot trigger.

use crate::attempt::{ActiveAttempt, Annotation, CompletedAttempt, Completion};
use chrono::{DateTime, Utc};
use pairscope_core::{Outcome, ParameterSet, Points, ReferenceSource, PAYOUT_POINTS};
use pairscope_feed::{PairSnapshot, TokenSnapshot};
use pairscope_telemetry::AnomalyKind;
use std::time::Duration;
use tracing::warn;

/// Tolerated deviation of `ref_yes + ref_no` from 100.
const REF_SUM_TOLERANCE: i64 = 2;

/// Reference prices carried from one evaluated cycle to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefPair {
    pub yes: Points,
    pub no: Points,
    /// The sum deviated beyond tolerance when these were computed;
    /// attempts built from them inherit the flag.
    pub anomalous: bool,
}

impl RefPair {
    pub fn side(&self, side: Outcome) -> Points {
        match side {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }
}

/// Inputs that do not change within a cycle.
#[derive(Debug, Clone)]
pub struct CycleContext<'a> {
    pub params: &'a ParameterSet,
    pub tick: Points,
    pub cycle: u32,
    pub now: DateTime<Utc>,
    pub time_remaining_secs: i64,
    /// References computed at the previous evaluated cycle; `None`
    /// until the first evaluation seeds them.
    pub prev_refs: Option<RefPair>,
}

/// Why a cycle was not evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Mirror older than the feed-gap threshold.
    FeedGap,
    /// A side had no usable bid/ask.
    EmptyOrderbook,
}

/// Running-measurement update for one still-active attempt.
#[derive(Debug, Clone)]
pub struct RunningUpdate {
    pub attempt_id: i64,
    pub mae_points: Option<i64>,
    pub closest_approach_points: Option<i64>,
    pub had_feed_gap: bool,
}

/// Everything one evaluator invocation decided.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub skipped: Option<SkipReason>,
    /// Newly created attempts, in id order (also appended to the
    /// active set).
    pub created: Vec<ActiveAttempt>,
    /// Attempts that reached a terminal status this cycle.
    pub completed: Vec<CompletedAttempt>,
    pub running_updates: Vec<RunningUpdate>,
    pub anomalies: Vec<AnomalyKind>,
    /// References computed from this snapshot, to seed the next cycle.
    /// `None` when the cycle was skipped.
    pub refs: Option<RefPair>,
}

/// Evaluate one cycle.
///
/// `active` is the monitor's active-attempt set; completed attempts
/// are removed from it and new ones appended. `next_id` hands out
/// monotone attempt ids.
pub fn evaluate_cycle(
    ctx: &CycleContext<'_>,
    snap: &PairSnapshot,
    active: &mut Vec<ActiveAttempt>,
    next_id: &mut dyn FnMut() -> i64,
) -> CycleReport {
    let mut report = CycleReport::default();
    let threshold = Duration::from_secs(ctx.params.feed_gap_threshold_seconds);

    // Feed gap covering the planned instant: skip, flag every active
    // attempt, leave all measurements untouched.
    if !snap.yes.is_fresh(threshold) || !snap.no.is_fresh(threshold) {
        report.skipped = Some(SkipReason::FeedGap);
        report.anomalies.push(AnomalyKind::FeedGap);
        for attempt in active.iter_mut() {
            attempt.had_feed_gap = true;
            report.running_updates.push(RunningUpdate {
                attempt_id: attempt.attempt_id,
                mae_points: attempt.mae_points(),
                closest_approach_points: attempt.closest_approach,
                had_feed_gap: true,
            });
        }
        return report;
    }

    // Empty or invalid side: advance nothing.
    if !snap.yes.is_usable() || !snap.no.is_usable() {
        report.skipped = Some(SkipReason::EmptyOrderbook);
        report.anomalies.push(AnomalyKind::OrderbookEmpty);
        return report;
    }

    advance_active(ctx, snap, active, &mut report);

    if let Some(refs) = ctx.prev_refs {
        create_attempts(ctx, snap, refs, next_id, &mut report);
    }

    report.refs = Some(compute_refs(ctx, snap, &mut report));

    active.extend(report.created.iter().cloned());
    report
}

/// References for the next cycle, with the sum sanity check.
fn compute_refs(
    ctx: &CycleContext<'_>,
    snap: &PairSnapshot,
    report: &mut CycleReport,
) -> RefPair {
    let yes = reference_price(ctx.params.reference_source, &snap.yes);
    let no = reference_price(ctx.params.reference_source, &snap.no);
    let anomalous = (yes.inner() + no.inner() - PAYOUT_POINTS).abs() > REF_SUM_TOLERANCE;
    if anomalous {
        warn!(
            cycle = ctx.cycle,
            ref_yes = %yes,
            ref_no = %no,
            "reference_sum_anomaly"
        );
        report.anomalies.push(AnomalyKind::ReferenceSumAnomaly);
    }
    RefPair { yes, no, anomalous }
}

/// Per-side reference price.
fn reference_price(source: ReferenceSource, side: &TokenSnapshot) -> Points {
    let (bid, ask) = (side.bid.unwrap_or_default(), side.ask.unwrap_or_default());
    match source {
        ReferenceSource::Midpoint => Points::midpoint(bid, ask),
        // Falls back to the midpoint until a trade has printed.
        ReferenceSource::LastTrade => side
            .last_trade
            .unwrap_or_else(|| Points::midpoint(bid, ask)),
    }
}

/// Advance every active attempt against the snapshot. Stop-loss is
/// checked before the opposite fill; the order is load-bearing when
/// both conditions hold in the same cycle.
fn advance_active(
    ctx: &CycleContext<'_>,
    snap: &PairSnapshot,
    active: &mut Vec<ActiveAttempt>,
    report: &mut CycleReport,
) {
    let mut index = 0;
    while index < active.len() {
        let attempt = &mut active[index];
        let first_leg = side_snapshot(snap, attempt.first_leg);
        let opposite = side_snapshot(snap, attempt.opposite_side());

        // Both sides are usable here, so bids and asks are present.
        let first_bid = first_leg.bid.unwrap_or_default();
        let opposite_ask = opposite.ask.unwrap_or_default();

        attempt.observe_first_leg_bid(first_bid);

        if let Some(stop) = attempt.stop_loss_price {
            if first_bid <= stop {
                let attempt = active.swap_remove(index);
                report
                    .completed
                    .push(complete_stop_loss(ctx, attempt, first_bid));
                continue;
            }
        }

        attempt.observe_opposite_ask(opposite_ask);

        if opposite_ask <= attempt.opposite_trigger {
            let attempt = active.swap_remove(index);
            report
                .completed
                .push(complete_paired(ctx, snap, attempt, opposite_ask));
            continue;
        }

        report.running_updates.push(RunningUpdate {
            attempt_id: attempt.attempt_id,
            mae_points: attempt.mae_points(),
            closest_approach_points: attempt.closest_approach,
            had_feed_gap: attempt.had_feed_gap,
        });
        index += 1;
    }
}

fn complete_paired(
    ctx: &CycleContext<'_>,
    snap: &PairSnapshot,
    attempt: ActiveAttempt,
    opposite_ask: Points,
) -> CompletedAttempt {
    let pair_cost = attempt.p1.inner() + opposite_ask.inner();
    let time_to_pair = (ctx.now - attempt.t1).num_seconds().max(0);
    CompletedAttempt {
        completion: Completion::Paired {
            t2: snap.taken_at,
            actual_opposite_price: opposite_ask,
            pair_cost_points: pair_cost,
            pair_profit_points: PAYOUT_POINTS - pair_cost,
            time_to_pair_seconds: time_to_pair,
        },
        attempt,
        cycle: ctx.cycle,
        completed_at: ctx.now,
        time_remaining_at_completion: ctx.time_remaining_secs,
    }
}

fn complete_stop_loss(
    ctx: &CycleContext<'_>,
    attempt: ActiveAttempt,
    exit_bid: Points,
) -> CompletedAttempt {
    // Marking the first leg out at `bid` is buying the complement at
    // `100 - bid`; the loss is `bid - P1`, strictly negative once the
    // stop distance is breached.
    let pair_cost = attempt.p1.inner() + exit_bid.complement().inner();
    CompletedAttempt {
        completion: Completion::StopLoss {
            exit_bid,
            pair_cost_points: pair_cost,
            pair_profit_points: PAYOUT_POINTS - pair_cost,
        },
        attempt,
        cycle: ctx.cycle,
        completed_at: ctx.now,
        time_remaining_at_completion: ctx.time_remaining_secs,
    }
}

/// Check both sides for a trigger against the carried references and
/// construct new attempts. Both sides may trigger in the same cycle;
/// the tie-break orders id assignment only.
fn create_attempts(
    ctx: &CycleContext<'_>,
    snap: &PairSnapshot,
    refs: RefPair,
    next_id: &mut dyn FnMut() -> i64,
    report: &mut CycleReport,
) {
    let mut triggered: Vec<(Outcome, Points, i64, Vec<Annotation>)> = Vec::new();

    for side in [Outcome::Yes, Outcome::No] {
        let side_snap = side_snapshot(snap, side);
        let mut annotations = Vec::new();
        let trigger = trigger_level(refs.side(side), ctx, &mut annotations, report);

        let ask = side_snap.ask.unwrap_or_default();
        if ask <= trigger {
            let distance = (trigger - ask).inner().abs();
            triggered.push((side, ask, distance, annotations));
        }
    }

    // Tie-break: touched harder first, YES on equal distance.
    triggered.sort_by_key(|(side, _, distance, _)| (*distance, *side == Outcome::No));

    for (side, ask, _, annotations) in triggered {
        let attempt = build_attempt(ctx, snap, side, ask, refs, annotations, next_id(), report);
        report.created.push(attempt);
    }
}

/// `clamp(floor_to_tick(ref - S0), tick, 99)`, annotating clamps.
fn trigger_level(
    reference: Points,
    ctx: &CycleContext<'_>,
    annotations: &mut Vec<Annotation>,
    report: &mut CycleReport,
) -> Points {
    let raw = Points(reference.inner() - ctx.params.s0_points).floor_to_tick(ctx.tick);
    let clamped = raw.clamp_to_band(ctx.tick);
    if raw > clamped {
        annotations.push(Annotation::TriggerClampedToMax);
        report.anomalies.push(AnomalyKind::TriggerClampedToMax);
    } else if raw < clamped {
        annotations.push(Annotation::TriggerClampedToMin);
        report.anomalies.push(AnomalyKind::TriggerClampedToMin);
    }
    clamped
}

#[allow(clippy::too_many_arguments)]
fn build_attempt(
    ctx: &CycleContext<'_>,
    snap: &PairSnapshot,
    side: Outcome,
    p1: Points,
    refs: RefPair,
    mut annotations: Vec<Annotation>,
    attempt_id: i64,
    report: &mut CycleReport,
) -> ActiveAttempt {
    let params = ctx.params;
    let tick = ctx.tick;
    let opposite_ref = refs.side(side.opposite());

    let opposite_trigger_from_ref = Points(opposite_ref.inner() - params.s0_points)
        .floor_to_tick(tick)
        .clamp_to_band(tick);
    let opposite_max = Points(params.pair_cap_points - p1.inner()).floor_to_tick(tick);

    let mut opposite_trigger = opposite_trigger_from_ref.min(opposite_max);
    if opposite_max <= tick {
        // At or below one tick of headroom, pairing is mathematically
        // unlikely; the attempt is still tracked.
        opposite_trigger = tick;
        annotations.push(Annotation::PairConstraintImpossible);
        report.anomalies.push(AnomalyKind::PairConstraintImpossible);
    }
    if opposite_max.inner() > PAYOUT_POINTS {
        warn!(
            side = %side,
            p1 = %p1,
            opposite_max = %opposite_max,
            "impossible opposite_max; invariant bug for correct inputs"
        );
        annotations.push(Annotation::ImpossibleOppositeMax);
        report.anomalies.push(AnomalyKind::ImpossibleOppositeMax);
    }
    if refs.anomalous {
        annotations.push(Annotation::ReferenceSumAnomaly);
    }

    let stop_loss_price = params
        .stop_loss_threshold_points
        .map(|sl| Points((p1.inner() - sl).clamp(0, 99)));

    let first_leg_bid = side_snapshot(snap, side).bid;

    ActiveAttempt {
        attempt_id,
        cycle_created: ctx.cycle,
        t1: ctx.now,
        first_leg: side,
        p1,
        reference_yes: refs.yes,
        reference_no: refs.no,
        time_remaining_at_start: ctx.time_remaining_secs,
        yes_spread_entry: snap.yes.spread(),
        no_spread_entry: snap.no.spread(),
        opposite_trigger,
        opposite_max,
        stop_loss_price,
        min_first_leg_bid: first_leg_bid,
        closest_approach: None,
        had_feed_gap: false,
        annotations,
    }
}

fn side_snapshot(snap: &PairSnapshot, side: Outcome) -> &TokenSnapshot {
    match side {
        Outcome::Yes => &snap.yes,
        Outcome::No => &snap.no,
    }
}
