//! Stream session manager.
//!
//! Owns one long-lived market-channel session for a monitor. Handles
//! the connection lifecycle, reconnection with capped exponential
//! backoff, full resubscription before event delivery, and
//! reconnect-storm detection for the polling fallback.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{parse_events, OperationRequest, StreamEvent, SubscribeRequest};
use crate::subscription::SubscriptionManager;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Stream session configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Market-channel WebSocket URL.
    pub url: String,
    /// Heartbeat interval; read deadline is twice this.
    pub heartbeat_interval_ms: u64,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Backoff cap.
    pub reconnect_max_delay_ms: u64,
    /// Reconnects within the storm window that trigger the fallback.
    pub storm_threshold: u32,
    /// Storm observation window.
    pub storm_window_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            heartbeat_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            storm_threshold: 5,
            storm_window_secs: 60,
        }
    }
}

/// Commands accepted mid-session without tearing it down.
#[derive(Debug)]
pub enum StreamCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Notices delivered to the owning monitor.
#[derive(Debug)]
pub enum StreamNotice {
    /// A parsed event with its wall-clock receive time.
    Event {
        event: StreamEvent,
        received_at: DateTime<Utc>,
    },
    /// Reconnect storm: the monitor should poll until recovery.
    Degraded,
    /// Stream healthy again after a degradation.
    Recovered,
}

/// Transport/parse counters, shared with the owning monitor.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub reconnects: AtomicU64,
    pub parse_errors: AtomicU64,
    pub unknown_events: AtomicU64,
}

/// One monitor's stream session.
pub struct StreamClient {
    config: StreamConfig,
    subscriptions: Arc<SubscriptionManager>,
    heartbeat: HeartbeatManager,
    counters: Arc<StreamCounters>,
}

impl StreamClient {
    pub fn new(config: StreamConfig, initial_tokens: Vec<String>) -> Self {
        let heartbeat = HeartbeatManager::new(Duration::from_millis(config.heartbeat_interval_ms));
        Self {
            config,
            subscriptions: Arc::new(SubscriptionManager::new(initial_tokens)),
            heartbeat,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }

    /// Run the session until the command channel closes or the notice
    /// receiver is dropped. Never returns an error to the monitor;
    /// transport failures reconnect internally.
    pub async fn run(
        self,
        mut cmd_rx: mpsc::Receiver<StreamCommand>,
        notice_tx: mpsc::Sender<StreamNotice>,
    ) {
        let mut attempt = 0u32;
        let mut recent_reconnects: VecDeque<Instant> = VecDeque::new();
        let mut degraded = false;

        loop {
            match self.session(&mut cmd_rx, &notice_tx, &mut degraded).await {
                Ok(SessionEnd::Shutdown) => {
                    info!("Stream session shut down");
                    return;
                }
                Ok(SessionEnd::ServerClosed) => {
                    warn!("Stream closed by server");
                }
                Err(e) => {
                    error!(error = %e, "Stream session error");
                }
            }

            if notice_tx.is_closed() {
                return;
            }

            // Health is judged before the backoff sleep ages the clock.
            let was_healthy = self.session_was_healthy();
            attempt += 1;
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);

            // Storm detection over a sliding window.
            let now = Instant::now();
            recent_reconnects.push_back(now);
            let window = Duration::from_secs(self.config.storm_window_secs);
            while recent_reconnects
                .front()
                .is_some_and(|t| now.duration_since(*t) > window)
            {
                recent_reconnects.pop_front();
            }
            if !degraded && recent_reconnects.len() as u32 > self.config.storm_threshold {
                warn!(
                    reconnects = recent_reconnects.len(),
                    window_secs = self.config.storm_window_secs,
                    "Reconnect storm; notifying monitor to fall back to polling"
                );
                degraded = true;
                if notice_tx.send(StreamNotice::Degraded).await.is_err() {
                    return;
                }
            }

            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting stream");
            tokio::time::sleep(delay).await;

            // A session that was still receiving traffic when it died
            // resets the backoff ladder, not the storm window.
            if was_healthy {
                attempt = 0;
            }
        }
    }

    fn session_was_healthy(&self) -> bool {
        !self.heartbeat.is_read_deadline_expired()
    }

    async fn session(
        &self,
        cmd_rx: &mut mpsc::Receiver<StreamCommand>,
        notice_tx: &mpsc::Sender<StreamNotice>,
        degraded: &mut bool,
    ) -> WsResult<SessionEnd> {
        info!(url = %self.config.url, "Connecting to market channel");

        let (ws_stream, _response) = connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Resubscribe the full current set before delivering any event.
        let tokens = self.subscriptions.current();
        if !tokens.is_empty() {
            let sub = SubscribeRequest::market(tokens.clone());
            write
                .send(Message::Text(serde_json::to_string(&sub)?))
                .await?;
            info!(tokens = tokens.len(), "Subscribed market channel");
        }

        self.heartbeat.reset();
        let mut delivered_since_connect = false;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            if text.eq_ignore_ascii_case("PONG") {
                                debug!("Received PONG");
                                continue;
                            }
                            let received_at = Utc::now();
                            match parse_events(&text) {
                                Ok(batch) => {
                                    self.counters
                                        .unknown_events
                                        .fetch_add(batch.unknown as u64, Ordering::Relaxed);
                                    self.counters
                                        .parse_errors
                                        .fetch_add(batch.failed as u64, Ordering::Relaxed);
                                    for event in batch.events {
                                        if !delivered_since_connect && *degraded {
                                            *degraded = false;
                                            if notice_tx.send(StreamNotice::Recovered).await.is_err() {
                                                return Ok(SessionEnd::Shutdown);
                                            }
                                        }
                                        delivered_since_connect = true;
                                        if notice_tx
                                            .send(StreamNotice::Event { event, received_at })
                                            .await
                                            .is_err()
                                        {
                                            return Ok(SessionEnd::Shutdown);
                                        }
                                    }
                                }
                                Err(e) => {
                                    debug!(error = %e, "Unparseable frame");
                                    self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "normal close".to_string()));
                            warn!(code, %reason, "Market channel closed by server");
                            return Ok(SessionEnd::ServerClosed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::ServerClosed),
                        _ => {}
                    }
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(StreamCommand::Subscribe(tokens)) => {
                            let new = self.subscriptions.add(&tokens);
                            if !new.is_empty() {
                                let req = OperationRequest::subscribe(new);
                                write.send(Message::Text(serde_json::to_string(&req)?)).await?;
                            }
                        }
                        Some(StreamCommand::Unsubscribe(tokens)) => {
                            let gone = self.subscriptions.remove(&tokens);
                            if !gone.is_empty() {
                                let req = OperationRequest::unsubscribe(gone);
                                write.send(Message::Text(serde_json::to_string(&req)?)).await?;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                }

                _ = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_read_deadline_expired() {
                        return Err(WsError::ReadDeadline);
                    }
                    if self.heartbeat.should_send_ping() {
                        write.send(Message::Text("PING".to_string())).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent PING");
                    }
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped.
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        // Jitter (0-500ms) spreads simultaneous reconnects.
        Duration::from_millis(delay + subsec_jitter())
    }
}

enum SessionEnd {
    /// Command channel closed; the monitor is done with the stream.
    Shutdown,
    /// Server ended the session; reconnect.
    ServerClosed,
}

/// Jitter (0-500ms) derived from the subsecond clock.
fn subsec_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 500) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.reconnect_max_delay_ms, 60_000);
        assert_eq!(config.storm_threshold, 5);
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let client = StreamClient::new(
            StreamConfig {
                reconnect_base_delay_ms: 1_000,
                reconnect_max_delay_ms: 60_000,
                ..StreamConfig::default()
            },
            vec![],
        );
        // Attempt 1 is the base delay, large attempts hit the cap.
        assert!(client.backoff_delay(1) < Duration::from_millis(1_600));
        let capped = client.backoff_delay(30);
        assert!(capped >= Duration::from_millis(60_000));
        assert!(capped < Duration::from_millis(60_600));
    }
}
