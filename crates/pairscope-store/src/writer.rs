//! The durable-writer task.
//!
//! Single consumer over an unbounded command channel. Commands are
//! applied in arrival order in batches, bounded by a short timer or a
//! size threshold. A failed batch is retried with bounded backoff and
//! otherwise kept buffered; breaching the buffer cap is fatal, because
//! losing measurements silently is worse than halting.

use crate::command::WriteCommand;
use crate::error::{StoreError, StoreResult};
use crate::store::SqliteStore;
use pairscope_telemetry::metrics::WRITER_QUEUE_DEPTH;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Writer batching and overflow configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum latency before a partial batch is applied.
    pub batch_interval: Duration,
    /// Queue length that forces an immediate flush.
    pub batch_threshold: usize,
    /// Retries per failed batch before buffering.
    pub max_retries: u32,
    /// Base delay between retries (doubles per attempt).
    pub retry_base_delay: Duration,
    /// Commands that may remain buffered after retries are exhausted.
    pub max_buffered_commands: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(250),
            batch_threshold: 64,
            max_retries: 5,
            retry_base_delay: Duration::from_millis(100),
            max_buffered_commands: 10_000,
        }
    }
}

/// Producer side of the writer queue.
pub type WriterHandle = mpsc::UnboundedSender<WriteCommand>;

/// The single writer task.
pub struct DurableWriter {
    store: SqliteStore,
    rx: mpsc::UnboundedReceiver<WriteCommand>,
    config: WriterConfig,
}

impl DurableWriter {
    /// Create the writer and its producer handle.
    pub fn new(store: SqliteStore, config: WriterConfig) -> (Self, WriterHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { store, rx, config }, tx)
    }

    /// Run until every producer handle is dropped and the queue has
    /// drained. Returns an error only on the fatal overflow path.
    pub async fn run(mut self) -> StoreResult<()> {
        let mut pending: VecDeque<WriteCommand> = VecDeque::new();
        let mut tick = tokio::time::interval(self.config.batch_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(command) => {
                            pending.push_back(command);
                            WRITER_QUEUE_DEPTH.set(pending.len() as i64);
                            if pending.len() >= self.config.batch_threshold {
                                self.flush(&mut pending).await?;
                            }
                        }
                        None => {
                            // Shutdown: drain everything before exit.
                            self.flush(&mut pending).await?;
                            info!("Durable writer drained and stopped");
                            return Ok(());
                        }
                    }
                }
                _ = tick.tick() => {
                    if !pending.is_empty() {
                        self.flush(&mut pending).await?;
                    }
                }
            }
        }
    }

    async fn flush(&mut self, pending: &mut VecDeque<WriteCommand>) -> StoreResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.store.apply_batch(pending.make_contiguous()) {
                Ok(()) => {
                    let applied = pending.len();
                    for mut command in pending.drain(..) {
                        if let WriteCommand::FinalizeMarket { ack, .. } = &mut command {
                            if let Some(ack) = ack.take() {
                                let _ = ack.send(());
                            }
                        }
                    }
                    WRITER_QUEUE_DEPTH.set(0);
                    debug!(applied, "Writer batch applied");
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Writer batch failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Keep the batch buffered; the next flush retries it
                    // ahead of newer commands. Past the cap we stop the
                    // process rather than drop measurements.
                    if pending.len() > self.config.max_buffered_commands {
                        error!(
                            error = %e,
                            buffered = pending.len(),
                            "Writer buffer cap breached; shutting down"
                        );
                        return Err(StoreError::BufferOverflow(pending.len()));
                    }
                    warn!(
                        error = %e,
                        buffered = pending.len(),
                        "Writer batch still failing; buffering"
                    );
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AttemptRow, MarketRow, ParameterSetRow};
    use chrono::Utc;
    use pairscope_core::Outcome;
    use tempfile::TempDir;

    fn rows() -> (ParameterSetRow, MarketRow, AttemptRow) {
        let params = ParameterSetRow {
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
        };
        let market = MarketRow {
            market_id: "btc-updown-15m-1".to_string(),
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
        };
        let attempt = AttemptRow {
            attempt_id: 1,
            market_id: "btc-updown-15m-1".to_string(),
            parameter_set_id: "baseline".to_string(),
            t1_timestamp: Utc::now(),
            first_leg_side: Outcome::Yes,
            p1_points: 39,
            reference_yes_points: 45,
            reference_no_points: 53,
            time_remaining_at_start: 600,
            yes_spread_entry_points: None,
            no_spread_entry_points: None,
            delta_points: 3,
            s0_points: 5,
            stop_loss_threshold_points: None,
            annotations: None,
        };
        (params, market, attempt)
    }

    #[tokio::test]
    async fn test_writer_drains_on_handle_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("measurements.db");
        let store = SqliteStore::open(&path).unwrap();
        let (writer, handle) = DurableWriter::new(store, WriterConfig::default());
        let join = tokio::spawn(writer.run());

        let (params, market, attempt) = rows();
        handle.send(WriteCommand::InsertParameterSet(params)).unwrap();
        handle.send(WriteCommand::UpsertMarket(market)).unwrap();
        handle.send(WriteCommand::InsertAttempt(attempt)).unwrap();
        drop(handle);

        join.await.unwrap().unwrap();

        // Everything the producers enqueued must be on disk.
        let conn = rusqlite::Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM attempts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_finalize_ack_fires_after_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("measurements.db");
        let store = SqliteStore::open(&path).unwrap();
        let (writer, handle) = DurableWriter::new(store, WriterConfig::default());
        let join = tokio::spawn(writer.run());

        let (params, market, attempt) = rows();
        handle.send(WriteCommand::InsertParameterSet(params)).unwrap();
        handle.send(WriteCommand::UpsertMarket(market)).unwrap();
        handle.send(WriteCommand::InsertAttempt(attempt)).unwrap();

        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        handle
            .send(WriteCommand::FinalizeMarket {
                summary: crate::command::MarketSummary {
                    market_id: "btc-updown-15m-1".to_string(),
                    actual_settlement_time: Utc::now(),
                    total_attempts: 1,
                    total_pairs: 0,
                    total_failed: 1,
                    settlement_failures: 1,
                    pair_rate: Some(0.0),
                    avg_time_to_pair: None,
                    median_time_to_pair: None,
                    max_concurrent_attempts: 1,
                    total_cycles_run: 12,
                    anomaly_count: 0,
                },
                yes_spread_exit_points: None,
                no_spread_exit_points: None,
                ack: Some(ack_tx),
            })
            .unwrap();

        // The ack resolves once the settlement transaction commits.
        ack_rx.await.unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        let status: String = conn
            .query_row(
                "SELECT status FROM attempts WHERE attempt_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "completed_failed");

        drop(handle);
        join.await.unwrap().unwrap();
    }
}
