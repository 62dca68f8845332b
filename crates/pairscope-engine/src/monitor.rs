//! Per-market monitor.
//!
//! One monitor owns everything for one market window: the stream
//! session, the order-book mirror, the cycle schedule, the
//! active-attempt set and the reference state. It runs as a single
//! task, so the evaluator is never invoked concurrently with itself
//! and every mirror read is consistent.
//!
//! States: STARTING -> ACTIVE -> DRAINING -> SETTLED. Both the
//! settlement clock and a rotation-loop drain signal lead to DRAINING
//! exactly once.

use crate::attempt::{ActiveAttempt, CompletedAttempt, Completion, FailReason};
use crate::evaluator::{evaluate_cycle, CycleContext, CycleReport, RefPair, SkipReason};
use crate::schedule::{CycleSchedule, PlannedCycle, Tick};
use chrono::Utc;
use pairscope_clob::{PollingClient, WireBook};
use pairscope_core::{MarketWindow, ParameterSet, Points};
use pairscope_feed::{Applied, MarketMirror, PairSnapshot};
use pairscope_store::{
    AttemptRow, AttemptRunningUpdate, AttemptTerminalUpdate, LifecycleRow, MarketRow,
    MarketSummary, SnapshotRow, WriteCommand, WriterHandle,
};
use pairscope_telemetry::{metrics, AnomalyKind, AnomalyTally};
use pairscope_ws::{
    BookEvent, StreamClient, StreamCommand, StreamConfig, StreamNotice, WireLevel,
};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long STARTING waits for first books before polling for them.
const BOOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Clock skew against the server worth warning about.
const CLOCK_SKEW_WARN_SECS: i64 = 2;

/// Monitor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Active,
    Draining,
    Settled,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Draining => write!(f, "DRAINING"),
            Self::Settled => write!(f, "SETTLED"),
        }
    }
}

/// Shared collaborators handed to every monitor.
#[derive(Clone)]
pub struct MonitorDeps {
    pub writer: WriterHandle,
    pub polling: Arc<PollingClient>,
    pub stream_config: StreamConfig,
    /// Process-wide monotone attempt-id allocator.
    pub attempt_ids: Arc<AtomicI64>,
    pub capture_snapshots: bool,
    pub capture_lifecycle: bool,
    pub max_anomalies_per_market: u64,
}

/// Handle held by the rotation loop.
pub struct MonitorHandle {
    pub market_id: String,
    pub asset: String,
    pub settlement_time: chrono::DateTime<Utc>,
    state_rx: watch::Receiver<MonitorState>,
    cancel: CancellationToken,
    cycle_counter: Arc<AtomicU64>,
    join: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    pub fn state(&self) -> MonitorState {
        *self.state_rx.borrow()
    }

    pub fn is_settled(&self) -> bool {
        self.state() == MonitorState::Settled || self.join.is_finished()
    }

    /// Signal the monitor to drain; settlement completes normally.
    pub fn drain(&self) {
        self.cancel.cancel();
    }

    /// Last executed cycle number, for stall detection.
    pub fn cycle_number(&self) -> u64 {
        self.cycle_counter.load(Ordering::Relaxed)
    }

    /// Wait for the monitor task to finish.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            if !e.is_cancelled() {
                error!(error = %e, "Monitor task panicked");
            }
        }
    }
}

/// Rolling per-market counters, owned by the monitor.
#[derive(Debug, Default)]
struct MarketCounters {
    total_attempts: i64,
    total_pairs: i64,
    total_failed: i64,
    settlement_failures: i64,
    max_concurrent: i64,
    cycles_run: i64,
    times_to_pair: Vec<i64>,
}

/// One market's monitor.
pub struct MarketMonitor {
    market: MarketWindow,
    params: Arc<ParameterSet>,
    deps: MonitorDeps,
    mirror: MarketMirror,
    tick: Points,
    active: Vec<ActiveAttempt>,
    refs: Option<RefPair>,
    counters: MarketCounters,
    tally: AnomalyTally,
    /// Reconnect storm: read books through the polling client until
    /// the stream recovers.
    degraded: bool,
    state_tx: watch::Sender<MonitorState>,
    cancel: CancellationToken,
    cycle_counter: Arc<AtomicU64>,
}

impl MarketMonitor {
    /// Spawn a monitor task for one market window.
    pub fn spawn(
        market: MarketWindow,
        params: Arc<ParameterSet>,
        deps: MonitorDeps,
    ) -> MonitorHandle {
        let (state_tx, state_rx) = watch::channel(MonitorState::Starting);
        let cancel = CancellationToken::new();
        let cycle_counter = Arc::new(AtomicU64::new(0));

        let handle = MonitorHandle {
            market_id: market.market_id.clone(),
            asset: market.crypto_asset.clone(),
            settlement_time: market.settlement_time,
            state_rx,
            cancel: cancel.clone(),
            cycle_counter: Arc::clone(&cycle_counter),
            join: tokio::spawn({
                let max_anomalies = deps.max_anomalies_per_market;
                let mirror = MarketMirror::new(&market);
                let tick = Points(market.tick_size_points);
                let monitor = Self {
                    market,
                    params,
                    deps,
                    mirror,
                    tick,
                    active: Vec::new(),
                    refs: None,
                    counters: MarketCounters::default(),
                    tally: AnomalyTally::new(max_anomalies),
                    degraded: false,
                    state_tx,
                    cancel,
                    cycle_counter,
                };
                monitor.run()
            }),
        };
        handle
    }

    fn set_state(&self, state: MonitorState) {
        info!(market_id = %self.market.market_id, state = %state, "Monitor state");
        let _ = self.state_tx.send(state);
    }

    async fn run(mut self) {
        let yes_token = self.market.yes_token.as_str().to_string();
        let no_token = self.market.no_token.as_str().to_string();

        // The stream session is owned exclusively by this monitor.
        let stream = StreamClient::new(
            self.deps.stream_config.clone(),
            vec![yes_token.clone(), no_token.clone()],
        );
        let stream_counters = stream.counters();
        let (cmd_tx, cmd_rx) = mpsc::channel::<StreamCommand>(16);
        let (notice_tx, mut notice_rx) = mpsc::channel::<StreamNotice>(1024);
        let stream_task = tokio::spawn(stream.run(cmd_rx, notice_tx));

        self.probe_clock_skew().await;
        self.boot(&mut notice_rx).await;

        // A pre-discovered successor waits for its window to open.
        let now = Utc::now();
        if self.market.start_time > now {
            let wait = (self.market.start_time - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            debug!(
                market_id = %self.market.market_id,
                wait_secs = wait.as_secs(),
                "Waiting for window start"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let time_remaining = self.market.time_remaining_secs(Utc::now());
        let mut schedule = CycleSchedule::new(
            self.params.sampling,
            Instant::now(),
            Duration::from_secs(time_remaining.max(0) as u64),
        );
        self.upsert_market(time_remaining, schedule.interval_seconds());

        self.set_state(MonitorState::Active);
        metrics::MONITORS_ACTIVE.inc();

        let cancel = self.cancel.clone();
        while !cancel.is_cancelled() {
            match schedule.poll(Instant::now()) {
                Tick::Finished { skipped } => {
                    self.record_skipped(skipped);
                    break;
                }
                Tick::Due { cycle, skipped } => {
                    self.record_skipped(skipped);
                    self.run_cycle(cycle).await;
                }
                Tick::Wait(at) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        notice = notice_rx.recv() => {
                            match notice {
                                Some(notice) => self.handle_notice(notice),
                                // Stream task gone; polling carries the
                                // monitor to settlement.
                                None => {
                                    self.degraded = true;
                                    tokio::time::sleep_until(at.into()).await;
                                }
                            }
                        }
                        _ = tokio::time::sleep_until(at.into()) => {}
                    }
                }
            }
        }

        self.set_state(MonitorState::Draining);
        metrics::MONITORS_ACTIVE.dec();

        // The last cycle fires inside the grace margin; settlement
        // itself is a wall-clock event.
        let now = Utc::now();
        if !cancel.is_cancelled() && self.market.settlement_time > now {
            let wait = (self.market.settlement_time - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.finalize().await;

        // Unsubscribe and release the session.
        let _ = cmd_tx
            .send(StreamCommand::Unsubscribe(vec![yes_token, no_token]))
            .await;
        drop(cmd_tx);
        drop(notice_rx);
        stream_task.abort();

        let reconnects = stream_counters.reconnects.load(Ordering::Relaxed);
        metrics::WS_RECONNECTS_TOTAL.inc_by(reconnects);
        info!(
            market_id = %self.market.market_id,
            reconnects,
            parse_errors = stream_counters.parse_errors.load(Ordering::Relaxed),
            unknown_events = stream_counters.unknown_events.load(Ordering::Relaxed),
            "Stream session released"
        );

        self.set_state(MonitorState::Settled);
    }

    /// Best-effort server-time probe at boot.
    async fn probe_clock_skew(&mut self) {
        match self.deps.polling.fetch_server_time().await {
            Ok(server_unix) => {
                let skew = (Utc::now().timestamp() - server_unix).abs();
                if skew > CLOCK_SKEW_WARN_SECS {
                    warn!(
                        market_id = %self.market.market_id,
                        skew_secs = skew,
                        "clock_skew against server time"
                    );
                    self.record_anomaly(AnomalyKind::ClockSkew);
                }
            }
            Err(e) => debug!(error = %e, "Server time probe failed"),
        }
    }

    /// Wait for the first book on each side, falling back to the
    /// polling client after the boot timeout.
    async fn boot(&mut self, notice_rx: &mut mpsc::Receiver<StreamNotice>) {
        let deadline = tokio::time::Instant::now() + BOOT_TIMEOUT;
        let cancel = self.cancel.clone();
        while !self.mirror.has_both_books() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break,
                notice = notice_rx.recv() => {
                    match notice {
                        Some(notice) => self.handle_notice(notice),
                        None => break,
                    }
                }
            }
        }

        if !self.mirror.has_both_books() {
            warn!(
                market_id = %self.market.market_id,
                "No books from stream within boot timeout; polling"
            );
            self.poll_books().await;
        }
    }

    fn handle_notice(&mut self, notice: StreamNotice) {
        match notice {
            StreamNotice::Event { event, received_at } => {
                metrics::STREAM_EVENTS_TOTAL
                    .with_label_values(&[event.kind()])
                    .inc();
                match self.mirror.apply(&event, received_at) {
                    Ok(Applied::TickSize(side, points)) => {
                        if points != self.tick.inner() {
                            warn!(
                                market_id = %self.market.market_id,
                                side = %side,
                                old = self.tick.inner(),
                                new = points,
                                "Tick size changed"
                            );
                            self.tick = Points(points);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(market_id = %self.market.market_id, error = %e, "Bad stream event");
                        self.record_anomaly(AnomalyKind::MalformedPrice);
                    }
                }
            }
            StreamNotice::Degraded => {
                warn!(
                    market_id = %self.market.market_id,
                    "Stream degraded; switching to polling fallback"
                );
                self.degraded = true;
                self.record_anomaly(AnomalyKind::ReconnectStorm);
            }
            StreamNotice::Recovered => {
                info!(market_id = %self.market.market_id, "Stream recovered");
                self.degraded = false;
            }
        }
    }

    /// Read both books through the polling fallback into the mirror.
    async fn poll_books(&mut self) {
        let tokens = vec![
            self.market.yes_token.as_str().to_string(),
            self.market.no_token.as_str().to_string(),
        ];
        match self.deps.polling.fetch_books(&tokens).await {
            Ok(books) => {
                let received_at = Utc::now();
                for book in books {
                    let event =
                        pairscope_ws::StreamEvent::Book(book_event_from_poll(book));
                    if let Err(e) = self.mirror.apply(&event, received_at) {
                        warn!(error = %e, "Bad polled book");
                        self.record_anomaly(AnomalyKind::MalformedPrice);
                    }
                }
            }
            Err(e) => debug!(error = %e, "Polling fallback read failed"),
        }
    }

    fn record_skipped(&mut self, skipped: u32) {
        for _ in 0..skipped {
            self.record_anomaly(AnomalyKind::MissedCycle);
        }
        if skipped > 0 {
            metrics::CYCLES_SKIPPED_TOTAL
                .with_label_values(&["overload"])
                .inc_by(skipped as u64);
            warn!(
                market_id = %self.market.market_id,
                skipped,
                "Scheduler overload dropped cycles"
            );
        }
    }

    fn record_anomaly(&mut self, kind: AnomalyKind) {
        if self.tally.record(kind) {
            warn!(
                market_id = %self.market.market_id,
                anomalies = self.tally.total(),
                "Market flagged: anomaly budget exceeded"
            );
        }
    }

    async fn run_cycle(&mut self, cycle: PlannedCycle) {
        if self.degraded {
            self.poll_books().await;
        }

        let snap = self.mirror.snapshot_pair();
        let now = Utc::now();
        let ctx = CycleContext {
            params: self.params.as_ref(),
            tick: self.tick,
            cycle: cycle.number,
            now,
            time_remaining_secs: self.market.time_remaining_secs(now),
            prev_refs: self.refs,
        };

        let ids = Arc::clone(&self.deps.attempt_ids);
        let mut next_id = || ids.fetch_add(1, Ordering::Relaxed) + 1;
        let report = evaluate_cycle(&ctx, &snap, &mut self.active, &mut next_id);

        if let Some(refs) = report.refs {
            self.refs = Some(refs);
        }

        for kind in &report.anomalies {
            self.record_anomaly(*kind);
        }

        match report.skipped {
            Some(SkipReason::FeedGap) => {
                metrics::CYCLES_SKIPPED_TOTAL
                    .with_label_values(&["feed_gap"])
                    .inc();
            }
            Some(SkipReason::EmptyOrderbook) => {
                metrics::CYCLES_SKIPPED_TOTAL
                    .with_label_values(&["orderbook_empty"])
                    .inc();
            }
            None => {
                self.counters.cycles_run += 1;
                metrics::CYCLES_RUN_TOTAL.inc();
            }
        }

        self.persist_report(&report, cycle.number, &snap);

        self.counters.max_concurrent = self.counters.max_concurrent.max(self.active.len() as i64);
        self.cycle_counter.store(cycle.number as u64, Ordering::Relaxed);
    }

    fn persist_report(
        &mut self,
        report: &CycleReport,
        cycle_number: u32,
        snap: &PairSnapshot,
    ) {
        for attempt in &report.created {
            self.counters.total_attempts += 1;
            metrics::ATTEMPTS_CREATED_TOTAL
                .with_label_values(&[attempt.first_leg.as_str()])
                .inc();
            info!(
                market_id = %self.market.market_id,
                attempt_id = attempt.attempt_id,
                side = %attempt.first_leg,
                p1 = %attempt.p1,
                opposite_trigger = %attempt.opposite_trigger,
                "Attempt created"
            );
            self.send(WriteCommand::InsertAttempt(self.attempt_row(attempt)));
            if self.deps.capture_lifecycle {
                self.send(WriteCommand::InsertLifecycle(self.lifecycle_row(
                    attempt.attempt_id,
                    cycle_number,
                    "created",
                    Some(format!("side={} p1={}", attempt.first_leg, attempt.p1)),
                )));
            }
        }

        for completed in &report.completed {
            let update = self.terminal_update(completed, snap);
            let (status, reason) = match &completed.completion {
                Completion::Paired {
                    time_to_pair_seconds,
                    ..
                } => {
                    self.counters.total_pairs += 1;
                    self.counters.times_to_pair.push(*time_to_pair_seconds);
                    ("completed_paired", "paired")
                }
                Completion::StopLoss { .. } => {
                    self.counters.total_failed += 1;
                    ("completed_failed", FailReason::StopLoss.as_str())
                }
            };
            metrics::ATTEMPTS_COMPLETED_TOTAL
                .with_label_values(&[status, reason])
                .inc();
            info!(
                market_id = %self.market.market_id,
                attempt_id = completed.attempt.attempt_id,
                status,
                reason,
                "Attempt completed"
            );
            self.send(WriteCommand::UpdateAttemptTerminal(update));
            if self.deps.capture_lifecycle {
                self.send(WriteCommand::InsertLifecycle(self.lifecycle_row(
                    completed.attempt.attempt_id,
                    cycle_number,
                    status,
                    Some(reason.to_string()),
                )));
            }
        }

        for update in &report.running_updates {
            self.send(WriteCommand::UpdateAttemptRunning(AttemptRunningUpdate {
                attempt_id: update.attempt_id,
                max_adverse_excursion_points: update.mae_points,
                closest_approach_points: update.closest_approach_points,
                had_feed_gap: update.had_feed_gap,
            }));
        }

        if self.deps.capture_snapshots {
            self.send(WriteCommand::InsertSnapshot(SnapshotRow {
                market_id: self.market.market_id.clone(),
                cycle_number: cycle_number as i64,
                captured_at: snap.taken_at,
                yes_bid_points: snap.yes.bid.map(|p| p.inner()),
                yes_ask_points: snap.yes.ask.map(|p| p.inner()),
                no_bid_points: snap.no.bid.map(|p| p.inner()),
                no_ask_points: snap.no.ask.map(|p| p.inner()),
                yes_last_trade_points: snap.yes.last_trade.map(|p| p.inner()),
                no_last_trade_points: snap.no.last_trade.map(|p| p.inner()),
            }));
        }
    }

    fn attempt_row(&self, attempt: &ActiveAttempt) -> AttemptRow {
        AttemptRow {
            attempt_id: attempt.attempt_id,
            market_id: self.market.market_id.clone(),
            parameter_set_id: self.params.name.clone(),
            t1_timestamp: attempt.t1,
            first_leg_side: attempt.first_leg,
            p1_points: attempt.p1.inner(),
            reference_yes_points: attempt.reference_yes.inner(),
            reference_no_points: attempt.reference_no.inner(),
            time_remaining_at_start: attempt.time_remaining_at_start,
            yes_spread_entry_points: attempt.yes_spread_entry,
            no_spread_entry_points: attempt.no_spread_entry,
            delta_points: self.params.delta_points,
            s0_points: self.params.s0_points,
            stop_loss_threshold_points: self.params.stop_loss_threshold_points,
            annotations: attempt.annotations_string(),
        }
    }

    fn terminal_update(
        &self,
        completed: &CompletedAttempt,
        snap: &PairSnapshot,
    ) -> AttemptTerminalUpdate {
        let attempt = &completed.attempt;
        let base = AttemptTerminalUpdate {
            attempt_id: attempt.attempt_id,
            status: String::new(),
            t2_timestamp: None,
            time_to_pair_seconds: None,
            time_remaining_at_completion: Some(completed.time_remaining_at_completion),
            actual_opposite_price: None,
            pair_cost_points: None,
            pair_profit_points: None,
            fail_reason: None,
            yes_spread_exit_points: snap.yes.spread(),
            no_spread_exit_points: snap.no.spread(),
            max_adverse_excursion_points: attempt.mae_points(),
            closest_approach_points: attempt.closest_approach,
            had_feed_gap: attempt.had_feed_gap,
        };
        match &completed.completion {
            Completion::Paired {
                t2,
                actual_opposite_price,
                pair_cost_points,
                pair_profit_points,
                time_to_pair_seconds,
            } => AttemptTerminalUpdate {
                status: "completed_paired".to_string(),
                t2_timestamp: Some(*t2),
                time_to_pair_seconds: Some(*time_to_pair_seconds),
                actual_opposite_price: Some(actual_opposite_price.inner()),
                pair_cost_points: Some(*pair_cost_points),
                pair_profit_points: Some(*pair_profit_points),
                ..base
            },
            Completion::StopLoss {
                exit_bid,
                pair_cost_points,
                pair_profit_points,
            } => AttemptTerminalUpdate {
                status: "completed_failed".to_string(),
                fail_reason: Some(FailReason::StopLoss.as_str().to_string()),
                actual_opposite_price: Some(exit_bid.inner()),
                pair_cost_points: Some(*pair_cost_points),
                pair_profit_points: Some(*pair_profit_points),
                ..base
            },
        }
    }

    fn lifecycle_row(
        &self,
        attempt_id: i64,
        cycle_number: u32,
        event: &str,
        detail: Option<String>,
    ) -> LifecycleRow {
        LifecycleRow {
            attempt_id,
            market_id: self.market.market_id.clone(),
            cycle_number: cycle_number as i64,
            recorded_at: Utc::now(),
            event: event.to_string(),
            detail,
        }
    }

    fn upsert_market(&mut self, time_remaining: i64, interval_seconds: u64) {
        self.send(WriteCommand::UpsertMarket(MarketRow {
            market_id: self.market.market_id.clone(),
            crypto_asset: self.market.crypto_asset.clone(),
            condition_id: self.market.condition_id.clone(),
            yes_token_id: self.market.yes_token.as_str().to_string(),
            no_token_id: self.market.no_token.as_str().to_string(),
            tick_size_points: self.market.tick_size_points,
            start_time: self.market.start_time,
            settlement_time: self.market.settlement_time,
            parameter_set_id: self.params.name.clone(),
            time_remaining_at_start: time_remaining,
            cycle_interval_seconds: Some(interval_seconds as i64),
        }));
    }

    /// Settlement: fail the still-active attempts and write the market
    /// summary in one writer transaction, then await the commit.
    async fn finalize(&mut self) {
        let still_active = std::mem::take(&mut self.active);
        self.counters.settlement_failures = still_active.len() as i64;
        self.counters.total_failed += still_active.len() as i64;

        let snap = self.mirror.snapshot_pair();
        let now = Utc::now();

        if self.deps.capture_lifecycle {
            for attempt in &still_active {
                self.send(WriteCommand::InsertLifecycle(self.lifecycle_row(
                    attempt.attempt_id,
                    self.cycle_counter.load(Ordering::Relaxed) as u32,
                    "completed_failed",
                    Some(FailReason::SettlementReached.as_str().to_string()),
                )));
            }
        }

        let pair_rate = if self.counters.total_attempts > 0 {
            Some(self.counters.total_pairs as f64 / self.counters.total_attempts as f64)
        } else {
            None
        };
        let (avg_ttp, median_ttp) = time_to_pair_stats(&mut self.counters.times_to_pair);

        let summary = MarketSummary {
            market_id: self.market.market_id.clone(),
            actual_settlement_time: now,
            total_attempts: self.counters.total_attempts,
            total_pairs: self.counters.total_pairs,
            total_failed: self.counters.total_failed,
            settlement_failures: self.counters.settlement_failures,
            pair_rate,
            avg_time_to_pair: avg_ttp,
            median_time_to_pair: median_ttp,
            max_concurrent_attempts: self.counters.max_concurrent,
            total_cycles_run: self.counters.cycles_run,
            anomaly_count: self.tally.total() as i64,
        };

        info!(
            market_id = %self.market.market_id,
            attempts = summary.total_attempts,
            pairs = summary.total_pairs,
            failed = summary.total_failed,
            settlement_failures = summary.settlement_failures,
            anomalies = summary.anomaly_count,
            "Finalizing market"
        );
        metrics::ATTEMPTS_COMPLETED_TOTAL
            .with_label_values(&["completed_failed", FailReason::SettlementReached.as_str()])
            .inc_by(still_active.len() as u64);

        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(WriteCommand::FinalizeMarket {
            summary,
            yes_spread_exit_points: snap.yes.spread(),
            no_spread_exit_points: snap.no.spread(),
            ack: Some(ack_tx),
        });

        // Cancellation must not lose the settlement transaction.
        if ack_rx.await.is_err() {
            error!(
                market_id = %self.market.market_id,
                "Writer dropped before settlement ack"
            );
        }
    }

    fn send(&self, command: WriteCommand) {
        if self.deps.writer.send(command).is_err() {
            error!(
                market_id = %self.market.market_id,
                "Writer queue closed; measurement lost"
            );
        }
    }
}

/// Mean and median of times-to-pair; sorts in place.
fn time_to_pair_stats(times: &mut [i64]) -> (Option<f64>, Option<f64>) {
    if times.is_empty() {
        return (None, None);
    }
    times.sort_unstable();
    let sum: i64 = times.iter().sum();
    let avg = sum as f64 / times.len() as f64;
    let mid = times.len() / 2;
    let median = if times.len() % 2 == 1 {
        times[mid] as f64
    } else {
        (times[mid - 1] + times[mid]) as f64 / 2.0
    };
    (Some(avg), Some(median))
}

fn book_event_from_poll(book: WireBook) -> BookEvent {
    BookEvent {
        asset_id: book.asset_id,
        bids: book
            .bids
            .into_iter()
            .map(|level| WireLevel {
                price: level.price,
                size: level.size,
            })
            .collect(),
        asks: book
            .asks
            .into_iter()
            .map(|level| WireLevel {
                price: level.price,
                size: level.size,
            })
            .collect(),
        timestamp: book.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_to_pair_stats_odd() {
        let mut times = vec![30, 10, 20];
        let (avg, median) = time_to_pair_stats(&mut times);
        assert_eq!(avg, Some(20.0));
        assert_eq!(median, Some(20.0));
    }

    #[test]
    fn test_time_to_pair_stats_even() {
        let mut times = vec![40, 10, 20, 30];
        let (avg, median) = time_to_pair_stats(&mut times);
        assert_eq!(avg, Some(25.0));
        assert_eq!(median, Some(25.0));
    }

    #[test]
    fn test_time_to_pair_stats_empty() {
        let mut times: Vec<i64> = Vec::new();
        assert_eq!(time_to_pair_stats(&mut times), (None, None));
    }

    #[test]
    fn test_poll_book_conversion_keeps_strings() {
        let book = WireBook {
            market: None,
            asset_id: "123456789012345678901234567890".to_string(),
            bids: vec![pairscope_clob::BookLevel {
                price: "0.44".to_string(),
                size: "10".to_string(),
            }],
            asks: vec![],
            timestamp: Some("1767225600123".to_string()),
        };
        let event = book_event_from_poll(book);
        assert_eq!(event.asset_id, "123456789012345678901234567890");
        assert_eq!(event.bids[0].price, "0.44");
    }
}
