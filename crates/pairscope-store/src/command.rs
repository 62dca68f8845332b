//! Write commands and row payloads.

use chrono::{DateTime, Utc};
use pairscope_core::{Outcome, ParameterSet, Sampling};
use tokio::sync::oneshot;

/// Parameter-set row, inserted once per run (idempotent by id).
#[derive(Debug, Clone)]
pub struct ParameterSetRow {
    pub parameter_set_id: String,
    pub s0_points: i64,
    pub delta_points: i64,
    pub pair_cap_points: i64,
    pub trigger_rule: String,
    pub reference_price_source: String,
    pub tie_break_rule: String,
    pub sampling_mode: String,
    pub cycle_interval_seconds: Option<i64>,
    pub cycles_per_market: Option<i64>,
    pub feed_gap_threshold_seconds: i64,
    pub stop_loss_threshold_points: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<&ParameterSet> for ParameterSetRow {
    fn from(params: &ParameterSet) -> Self {
        let (sampling_mode, cycle_interval_seconds, cycles_per_market) = match params.sampling {
            Sampling::FixedInterval { interval_seconds } => {
                ("FIXED_INTERVAL", Some(interval_seconds as i64), None)
            }
            Sampling::FixedCount { cycles_per_market } => {
                ("FIXED_COUNT", None, Some(cycles_per_market as i64))
            }
        };
        Self {
            parameter_set_id: params.name.clone(),
            s0_points: params.s0_points,
            delta_points: params.delta_points,
            pair_cap_points: params.pair_cap_points,
            trigger_rule: "ASK_TOUCH".to_string(),
            reference_price_source: match params.reference_source {
                pairscope_core::ReferenceSource::Midpoint => "MIDPOINT".to_string(),
                pairscope_core::ReferenceSource::LastTrade => "LAST_TRADE".to_string(),
            },
            tie_break_rule: "distance_then_yes".to_string(),
            sampling_mode: sampling_mode.to_string(),
            cycle_interval_seconds,
            cycles_per_market,
            feed_gap_threshold_seconds: params.feed_gap_threshold_seconds as i64,
            stop_loss_threshold_points: params.stop_loss_threshold_points,
            created_at: params.created_at,
        }
    }
}

/// Market descriptor upsert. Counters and finalization fields are not
/// touched here.
#[derive(Debug, Clone)]
pub struct MarketRow {
    pub market_id: String,
    pub crypto_asset: String,
    pub condition_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size_points: i64,
    pub start_time: DateTime<Utc>,
    pub settlement_time: DateTime<Utc>,
    pub parameter_set_id: String,
    pub time_remaining_at_start: i64,
    pub cycle_interval_seconds: Option<i64>,
}

/// New attempt, inserted with `status = 'active'`.
#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub attempt_id: i64,
    pub market_id: String,
    pub parameter_set_id: String,
    pub t1_timestamp: DateTime<Utc>,
    pub first_leg_side: Outcome,
    pub p1_points: i64,
    pub reference_yes_points: i64,
    pub reference_no_points: i64,
    pub time_remaining_at_start: i64,
    pub yes_spread_entry_points: Option<i64>,
    pub no_spread_entry_points: Option<i64>,
    pub delta_points: i64,
    pub s0_points: i64,
    pub stop_loss_threshold_points: Option<i64>,
    pub annotations: Option<String>,
}

/// Running update on an active attempt. Ignored once terminal.
#[derive(Debug, Clone)]
pub struct AttemptRunningUpdate {
    pub attempt_id: i64,
    pub max_adverse_excursion_points: Option<i64>,
    pub closest_approach_points: Option<i64>,
    pub had_feed_gap: bool,
}

/// Transition to a terminal status. Applied at most once: the update
/// is gated on the row still being `active`.
#[derive(Debug, Clone)]
pub struct AttemptTerminalUpdate {
    pub attempt_id: i64,
    /// `completed_paired` or `completed_failed`.
    pub status: String,
    pub t2_timestamp: Option<DateTime<Utc>>,
    pub time_to_pair_seconds: Option<i64>,
    pub time_remaining_at_completion: Option<i64>,
    pub actual_opposite_price: Option<i64>,
    pub pair_cost_points: Option<i64>,
    pub pair_profit_points: Option<i64>,
    pub fail_reason: Option<String>,
    pub yes_spread_exit_points: Option<i64>,
    pub no_spread_exit_points: Option<i64>,
    pub max_adverse_excursion_points: Option<i64>,
    pub closest_approach_points: Option<i64>,
    pub had_feed_gap: bool,
}

/// Optional per-cycle book snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub market_id: String,
    pub cycle_number: i64,
    pub captured_at: DateTime<Utc>,
    pub yes_bid_points: Option<i64>,
    pub yes_ask_points: Option<i64>,
    pub no_bid_points: Option<i64>,
    pub no_ask_points: Option<i64>,
    pub yes_last_trade_points: Option<i64>,
    pub no_last_trade_points: Option<i64>,
}

/// Optional attempt lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleRow {
    pub attempt_id: i64,
    pub market_id: String,
    pub cycle_number: i64,
    pub recorded_at: DateTime<Utc>,
    pub event: String,
    pub detail: Option<String>,
}

/// Final market statistics, written in the settlement transaction.
#[derive(Debug, Clone)]
pub struct MarketSummary {
    pub market_id: String,
    pub actual_settlement_time: DateTime<Utc>,
    pub total_attempts: i64,
    pub total_pairs: i64,
    pub total_failed: i64,
    pub settlement_failures: i64,
    pub pair_rate: Option<f64>,
    pub avg_time_to_pair: Option<f64>,
    pub median_time_to_pair: Option<f64>,
    pub max_concurrent_attempts: i64,
    pub total_cycles_run: i64,
    pub anomaly_count: i64,
}

/// Commands accepted by the durable writer.
#[derive(Debug)]
pub enum WriteCommand {
    InsertParameterSet(ParameterSetRow),
    UpsertMarket(MarketRow),
    InsertAttempt(AttemptRow),
    UpdateAttemptRunning(AttemptRunningUpdate),
    UpdateAttemptTerminal(AttemptTerminalUpdate),
    InsertSnapshot(SnapshotRow),
    InsertLifecycle(LifecycleRow),
    /// Settlement: bulk-fail still-active attempts and write the
    /// summary in one transaction. The optional ack fires after the
    /// transaction commits.
    FinalizeMarket {
        summary: MarketSummary,
        yes_spread_exit_points: Option<i64>,
        no_spread_exit_points: Option<i64>,
        ack: Option<oneshot::Sender<()>>,
    },
}
