//! Heartbeat management for the stream session.
//!
//! The market channel expects a text "PING" and answers with "PONG";
//! any inbound message proves liveness. The read deadline is twice the
//! heartbeat interval: a session silent for that long is torn down and
//! reconnected.

use parking_lot::RwLock;
use std::time::{Duration, Instant};

/// Heartbeat manager for session health.
pub struct HeartbeatManager {
    interval: Duration,
    last_message: RwLock<Instant>,
    last_ping: RwLock<Option<Instant>>,
}

impl HeartbeatManager {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_message: RwLock::new(Instant::now()),
            last_ping: RwLock::new(None),
        }
    }

    /// Reset state (called on connection).
    pub fn reset(&self) {
        *self.last_message.write() = Instant::now();
        *self.last_ping.write() = None;
    }

    /// Record that any inbound message arrived.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Instant::now());
    }

    /// Read deadline: no inbound messages for twice the interval.
    pub fn is_read_deadline_expired(&self) -> bool {
        self.last_message.read().elapsed() > self.interval * 2
    }

    /// A ping is due when the interval elapsed since the last inbound
    /// message and no ping is already outstanding within the interval.
    pub fn should_send_ping(&self) -> bool {
        if self.last_message.read().elapsed() < self.interval {
            return false;
        }
        match *self.last_ping.read() {
            Some(sent) => sent.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Half the interval; the session checks health on this cadence.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.interval / 2).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_session_not_expired() {
        let hb = HeartbeatManager::new(Duration::from_secs(30));
        assert!(!hb.is_read_deadline_expired());
        assert!(!hb.should_send_ping());
    }

    #[test]
    fn test_ping_due_after_silence() {
        let hb = HeartbeatManager::new(Duration::from_millis(0));
        // Zero interval: silence is immediate, ping immediately due.
        assert!(hb.should_send_ping());
        hb.record_ping();
        hb.record_message();
    }
}
