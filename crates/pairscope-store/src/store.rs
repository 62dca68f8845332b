//! SQLite store.
//!
//! The connection is owned by the durable-writer task; nothing else in
//! the process touches the database.

use crate::command::{
    AttemptRow, AttemptRunningUpdate, AttemptTerminalUpdate, LifecycleRow, MarketRow,
    MarketSummary, ParameterSetRow, SnapshotRow, WriteCommand,
};
use crate::error::StoreResult;
use crate::schema::SCHEMA;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use tracing::{debug, info};

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Single-writer SQLite store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened measurement store");
        Ok(Self { conn })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Apply a batch of commands in one transaction.
    ///
    /// Commands are applied in arrival order; nothing is visible until
    /// commit, so a failed batch can be retried whole.
    pub fn apply_batch(&mut self, commands: &[WriteCommand]) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        for command in commands {
            Self::apply_one(&tx, command)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Highest attempt id on record; seeds the in-process allocator
    /// so ids stay monotone across restarts.
    pub fn max_attempt_id(&self) -> StoreResult<i64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(attempt_id) FROM attempts", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    /// Insert the parameter set outside the writer, at bootstrap.
    pub fn insert_parameter_set(&mut self, row: &ParameterSetRow) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        Self::do_insert_parameter_set(&tx, row)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_one(tx: &Transaction<'_>, command: &WriteCommand) -> StoreResult<()> {
        match command {
            WriteCommand::InsertParameterSet(row) => Self::do_insert_parameter_set(tx, row),
            WriteCommand::UpsertMarket(row) => Self::do_upsert_market(tx, row),
            WriteCommand::InsertAttempt(row) => Self::do_insert_attempt(tx, row),
            WriteCommand::UpdateAttemptRunning(update) => Self::do_update_running(tx, update),
            WriteCommand::UpdateAttemptTerminal(update) => Self::do_update_terminal(tx, update),
            WriteCommand::InsertSnapshot(row) => Self::do_insert_snapshot(tx, row),
            WriteCommand::InsertLifecycle(row) => Self::do_insert_lifecycle(tx, row),
            WriteCommand::FinalizeMarket {
                summary,
                yes_spread_exit_points,
                no_spread_exit_points,
                ..
            } => Self::do_finalize_market(
                tx,
                summary,
                *yes_spread_exit_points,
                *no_spread_exit_points,
            ),
        }
    }

    fn do_insert_parameter_set(tx: &Transaction<'_>, row: &ParameterSetRow) -> StoreResult<()> {
        tx.execute(
            "INSERT OR IGNORE INTO parameter_sets (
                parameter_set_id, s0_points, delta_points, pair_cap_points,
                trigger_rule, reference_price_source, tie_break_rule,
                sampling_mode, cycle_interval_seconds, cycles_per_market,
                feed_gap_threshold_seconds, stop_loss_threshold_points, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                row.parameter_set_id,
                row.s0_points,
                row.delta_points,
                row.pair_cap_points,
                row.trigger_rule,
                row.reference_price_source,
                row.tie_break_rule,
                row.sampling_mode,
                row.cycle_interval_seconds,
                row.cycles_per_market,
                row.feed_gap_threshold_seconds,
                row.stop_loss_threshold_points,
                ts(&row.created_at),
            ],
        )?;
        Ok(())
    }

    fn do_upsert_market(tx: &Transaction<'_>, row: &MarketRow) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO markets (
                market_id, crypto_asset, condition_id, yes_token_id, no_token_id,
                tick_size_points, start_time, settlement_time, parameter_set_id,
                time_remaining_at_start, cycle_interval_seconds
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(market_id) DO UPDATE SET
                tick_size_points = excluded.tick_size_points,
                settlement_time = excluded.settlement_time,
                cycle_interval_seconds = excluded.cycle_interval_seconds",
            params![
                row.market_id,
                row.crypto_asset,
                row.condition_id,
                row.yes_token_id,
                row.no_token_id,
                row.tick_size_points,
                ts(&row.start_time),
                ts(&row.settlement_time),
                row.parameter_set_id,
                row.time_remaining_at_start,
                row.cycle_interval_seconds,
            ],
        )?;
        Ok(())
    }

    fn do_insert_attempt(tx: &Transaction<'_>, row: &AttemptRow) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO attempts (
                attempt_id, market_id, parameter_set_id, t1_timestamp,
                first_leg_side, p1_points, reference_yes_points, reference_no_points,
                status, time_remaining_at_start,
                yes_spread_entry_points, no_spread_entry_points,
                delta_points, s0_points, stop_loss_threshold_points, annotations
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                row.attempt_id,
                row.market_id,
                row.parameter_set_id,
                ts(&row.t1_timestamp),
                row.first_leg_side.as_str(),
                row.p1_points,
                row.reference_yes_points,
                row.reference_no_points,
                row.time_remaining_at_start,
                row.yes_spread_entry_points,
                row.no_spread_entry_points,
                row.delta_points,
                row.s0_points,
                row.stop_loss_threshold_points,
                row.annotations,
            ],
        )?;
        Ok(())
    }

    fn do_update_running(tx: &Transaction<'_>, update: &AttemptRunningUpdate) -> StoreResult<()> {
        // Running fields are only mutable while the attempt is active.
        tx.execute(
            "UPDATE attempts SET
                max_adverse_excursion_points = ?2,
                closest_approach_points = ?3,
                had_feed_gap = had_feed_gap OR ?4
            WHERE attempt_id = ?1 AND status = 'active'",
            params![
                update.attempt_id,
                update.max_adverse_excursion_points,
                update.closest_approach_points,
                update.had_feed_gap,
            ],
        )?;
        Ok(())
    }

    fn do_update_terminal(tx: &Transaction<'_>, update: &AttemptTerminalUpdate) -> StoreResult<()> {
        let changed = tx.execute(
            "UPDATE attempts SET
                status = ?2,
                t2_timestamp = ?3,
                time_to_pair_seconds = ?4,
                time_remaining_at_completion = ?5,
                actual_opposite_price = ?6,
                pair_cost_points = ?7,
                pair_profit_points = ?8,
                fail_reason = ?9,
                yes_spread_exit_points = ?10,
                no_spread_exit_points = ?11,
                max_adverse_excursion_points = ?12,
                closest_approach_points = ?13,
                had_feed_gap = had_feed_gap OR ?14
            WHERE attempt_id = ?1 AND status = 'active'",
            params![
                update.attempt_id,
                update.status,
                update.t2_timestamp.as_ref().map(ts),
                update.time_to_pair_seconds,
                update.time_remaining_at_completion,
                update.actual_opposite_price,
                update.pair_cost_points,
                update.pair_profit_points,
                update.fail_reason,
                update.yes_spread_exit_points,
                update.no_spread_exit_points,
                update.max_adverse_excursion_points,
                update.closest_approach_points,
                update.had_feed_gap,
            ],
        )?;
        if changed == 0 {
            // Already terminal: the idempotence guarantee, not an error.
            debug!(
                attempt_id = update.attempt_id,
                "Terminal update ignored; attempt already terminal"
            );
        }
        Ok(())
    }

    fn do_insert_snapshot(tx: &Transaction<'_>, row: &SnapshotRow) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO snapshots (
                market_id, cycle_number, captured_at,
                yes_bid_points, yes_ask_points, no_bid_points, no_ask_points,
                yes_last_trade_points, no_last_trade_points
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.market_id,
                row.cycle_number,
                ts(&row.captured_at),
                row.yes_bid_points,
                row.yes_ask_points,
                row.no_bid_points,
                row.no_ask_points,
                row.yes_last_trade_points,
                row.no_last_trade_points,
            ],
        )?;
        Ok(())
    }

    fn do_insert_lifecycle(tx: &Transaction<'_>, row: &LifecycleRow) -> StoreResult<()> {
        tx.execute(
            "INSERT INTO attempt_lifecycle (
                attempt_id, market_id, cycle_number, recorded_at, event, detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.attempt_id,
                row.market_id,
                row.cycle_number,
                ts(&row.recorded_at),
                row.event,
                row.detail,
            ],
        )?;
        Ok(())
    }

    fn do_finalize_market(
        tx: &Transaction<'_>,
        summary: &MarketSummary,
        yes_spread_exit_points: Option<i64>,
        no_spread_exit_points: Option<i64>,
    ) -> StoreResult<()> {
        // Bulk settlement failure: opposite price and pair economics
        // stay null, t2 stays unset.
        let failed = tx.execute(
            "UPDATE attempts SET
                status = 'completed_failed',
                fail_reason = 'settlement_reached',
                time_remaining_at_completion = 0,
                yes_spread_exit_points = ?2,
                no_spread_exit_points = ?3
            WHERE market_id = ?1 AND status = 'active'",
            params![summary.market_id, yes_spread_exit_points, no_spread_exit_points],
        )?;

        tx.execute(
            "UPDATE markets SET
                actual_settlement_time = ?2,
                total_attempts = ?3,
                total_pairs = ?4,
                total_failed = ?5,
                settlement_failures = ?6,
                pair_rate = ?7,
                avg_time_to_pair = ?8,
                median_time_to_pair = ?9,
                max_concurrent_attempts = ?10,
                total_cycles_run = ?11,
                anomaly_count = ?12
            WHERE market_id = ?1",
            params![
                summary.market_id,
                ts(&summary.actual_settlement_time),
                summary.total_attempts,
                summary.total_pairs,
                summary.total_failed,
                summary.settlement_failures,
                summary.pair_rate,
                summary.avg_time_to_pair,
                summary.median_time_to_pair,
                summary.max_concurrent_attempts,
                summary.total_cycles_run,
                summary.anomaly_count,
            ],
        )?;

        debug!(
            market_id = %summary.market_id,
            bulk_failed = failed,
            "Finalized market"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairscope_core::Outcome;

    fn param_row() -> ParameterSetRow {
        ParameterSetRow {
            parameter_set_id: "baseline".to_string(),
            s0_points: 5,
            delta_points: 3,
            pair_cap_points: 97,
            trigger_rule: "ASK_TOUCH".to_string(),
            reference_price_source: "MIDPOINT".to_string(),
            tie_break_rule: "distance_then_yes".to_string(),
            sampling_mode: "FIXED_INTERVAL".to_string(),
            cycle_interval_seconds: Some(10),
            cycles_per_market: None,
            feed_gap_threshold_seconds: 10,
            stop_loss_threshold_points: None,
            created_at: Utc::now(),
        }
    }

    fn market_row() -> MarketRow {
        MarketRow {
            market_id: "btc-updown-15m-1767226500".to_string(),
            crypto_asset: "btc".to_string(),
            condition_id: "0xabc".to_string(),
            yes_token_id: "yes".to_string(),
            no_token_id: "no".to_string(),
            tick_size_points: 1,
            start_time: Utc::now(),
            settlement_time: Utc::now(),
            parameter_set_id: "baseline".to_string(),
            time_remaining_at_start: 900,
            cycle_interval_seconds: Some(10),
        }
    }

    fn attempt_row(id: i64) -> AttemptRow {
        AttemptRow {
            attempt_id: id,
            market_id: "btc-updown-15m-1767226500".to_string(),
            parameter_set_id: "baseline".to_string(),
            t1_timestamp: Utc::now(),
            first_leg_side: Outcome::Yes,
            p1_points: 39,
            reference_yes_points: 45,
            reference_no_points: 53,
            time_remaining_at_start: 600,
            yes_spread_entry_points: Some(2),
            no_spread_entry_points: Some(3),
            delta_points: 3,
            s0_points: 5,
            stop_loss_threshold_points: None,
            annotations: None,
        }
    }

    fn bootstrap(store: &mut SqliteStore) {
        store
            .apply_batch(&[
                WriteCommand::InsertParameterSet(param_row()),
                WriteCommand::UpsertMarket(market_row()),
            ])
            .unwrap();
    }

    fn attempt_status(store: &SqliteStore, id: i64) -> String {
        store
            .conn
            .query_row(
                "SELECT status FROM attempts WHERE attempt_id = ?1",
                [id],
                |row| row.get(0),
            )
            .unwrap()
    }

    fn terminal_paired(id: i64, opposite: i64) -> AttemptTerminalUpdate {
        AttemptTerminalUpdate {
            attempt_id: id,
            status: "completed_paired".to_string(),
            t2_timestamp: Some(Utc::now()),
            time_to_pair_seconds: Some(20),
            time_remaining_at_completion: Some(580),
            actual_opposite_price: Some(opposite),
            pair_cost_points: Some(39 + opposite),
            pair_profit_points: Some(100 - 39 - opposite),
            fail_reason: None,
            yes_spread_exit_points: Some(2),
            no_spread_exit_points: Some(2),
            max_adverse_excursion_points: Some(1),
            closest_approach_points: Some(0),
            had_feed_gap: false,
        }
    }

    #[test]
    fn test_insert_and_pair_attempt() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        bootstrap(&mut store);
        store
            .apply_batch(&[WriteCommand::InsertAttempt(attempt_row(1))])
            .unwrap();
        assert_eq!(attempt_status(&store, 1), "active");

        store
            .apply_batch(&[WriteCommand::UpdateAttemptTerminal(terminal_paired(1, 47))])
            .unwrap();
        assert_eq!(attempt_status(&store, 1), "completed_paired");
    }

    #[test]
    fn test_terminal_update_is_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        bootstrap(&mut store);
        store
            .apply_batch(&[WriteCommand::InsertAttempt(attempt_row(1))])
            .unwrap();
        store
            .apply_batch(&[WriteCommand::UpdateAttemptTerminal(terminal_paired(1, 47))])
            .unwrap();

        // A replayed terminal with different values must not win.
        let mut replay = terminal_paired(1, 55);
        replay.status = "completed_failed".to_string();
        store
            .apply_batch(&[WriteCommand::UpdateAttemptTerminal(replay)])
            .unwrap();

        assert_eq!(attempt_status(&store, 1), "completed_paired");
        let opposite: i64 = store
            .conn
            .query_row(
                "SELECT actual_opposite_price FROM attempts WHERE attempt_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(opposite, 47);
    }

    #[test]
    fn test_running_update_ignored_after_terminal() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        bootstrap(&mut store);
        store
            .apply_batch(&[WriteCommand::InsertAttempt(attempt_row(1))])
            .unwrap();
        store
            .apply_batch(&[WriteCommand::UpdateAttemptTerminal(terminal_paired(1, 47))])
            .unwrap();

        store
            .apply_batch(&[WriteCommand::UpdateAttemptRunning(AttemptRunningUpdate {
                attempt_id: 1,
                max_adverse_excursion_points: Some(40),
                closest_approach_points: Some(-5),
                had_feed_gap: true,
            })])
            .unwrap();

        let mae: i64 = store
            .conn
            .query_row(
                "SELECT max_adverse_excursion_points FROM attempts WHERE attempt_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(mae, 1);
    }

    #[test]
    fn test_finalize_bulk_fails_active_only() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        bootstrap(&mut store);
        store
            .apply_batch(&[
                WriteCommand::InsertAttempt(attempt_row(1)),
                WriteCommand::InsertAttempt(attempt_row(2)),
                WriteCommand::UpdateAttemptTerminal(terminal_paired(1, 47)),
            ])
            .unwrap();

        let summary = MarketSummary {
            market_id: "btc-updown-15m-1767226500".to_string(),
            actual_settlement_time: Utc::now(),
            total_attempts: 2,
            total_pairs: 1,
            total_failed: 1,
            settlement_failures: 1,
            pair_rate: Some(0.5),
            avg_time_to_pair: Some(20.0),
            median_time_to_pair: Some(20.0),
            max_concurrent_attempts: 2,
            total_cycles_run: 90,
            anomaly_count: 0,
        };
        store
            .apply_batch(&[WriteCommand::FinalizeMarket {
                summary,
                yes_spread_exit_points: Some(4),
                no_spread_exit_points: Some(5),
                ack: None,
            }])
            .unwrap();

        // Attempt 1 keeps its paired terminal state.
        assert_eq!(attempt_status(&store, 1), "completed_paired");
        // Attempt 2 was bulk-failed with null pair economics.
        assert_eq!(attempt_status(&store, 2), "completed_failed");
        let (reason, opposite, cost, t2): (String, Option<i64>, Option<i64>, Option<String>) =
            store
                .conn
                .query_row(
                    "SELECT fail_reason, actual_opposite_price, pair_cost_points, t2_timestamp
                     FROM attempts WHERE attempt_id = 2",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .unwrap();
        assert_eq!(reason, "settlement_reached");
        assert!(opposite.is_none());
        assert!(cost.is_none());
        assert!(t2.is_none());

        let (pairs, failed): (i64, i64) = store
            .conn
            .query_row(
                "SELECT total_pairs, total_failed FROM markets WHERE market_id = ?1",
                ["btc-updown-15m-1767226500"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(pairs + failed, 2);
    }

    #[test]
    fn test_max_attempt_id_seeds_allocator() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.max_attempt_id().unwrap(), 0);
        bootstrap(&mut store);
        store
            .apply_batch(&[
                WriteCommand::InsertAttempt(attempt_row(7)),
                WriteCommand::InsertAttempt(attempt_row(12)),
            ])
            .unwrap();
        assert_eq!(store.max_attempt_id().unwrap(), 12);
    }

    #[test]
    fn test_parameter_set_insert_idempotent() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.insert_parameter_set(&param_row()).unwrap();
        store.insert_parameter_set(&param_row()).unwrap();
        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM parameter_sets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
