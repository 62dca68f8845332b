//! Market discovery and monitor rotation.
//!
//! Polls the catalog on a fixed interval and keeps, per asset, at most
//! one monitor in ACTIVE plus at most one pre-discovered successor in
//! STARTING. Retired monitors drain and settle normally; the rotation
//! loop never kills a monitor mid-settlement.

use crate::error::EngineResult;
use crate::monitor::{MarketMonitor, MonitorDeps, MonitorHandle, MonitorState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use pairscope_clob::{CatalogClient, CatalogMarket};
use pairscope_core::{MarketWindow, ParameterSet, Points, Sampling, TokenId};
use pairscope_telemetry::metrics::ANOMALIES_TOTAL;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Window length implied by the 15-minute slug family.
const WINDOW_MINUTES: i64 = 15;

/// Cycle intervals a monitor may miss before the watchdog calls it
/// stalled.
const STALL_INTERVALS: u32 = 3;

/// Last observed cycle progress for one monitored market.
#[derive(Debug, Clone, Copy)]
struct CycleProgress {
    number: u64,
    at: Instant,
}

/// Rotation configuration.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Catalog poll cadence.
    pub discovery_interval: Duration,
    /// Slug fragment identifying the window family, e.g. "-updown-15m-".
    pub slug_pattern: String,
    /// Assets to observe, lowercase symbols.
    pub assets: Vec<String>,
    /// Runway below which the successor window is pre-discovered.
    pub pre_discovery_lead: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(60),
            slug_pattern: "-updown-15m-".to_string(),
            assets: vec!["btc".to_string()],
            pre_discovery_lead: Duration::from_secs(120),
        }
    }
}

/// The discovery loop.
pub struct DiscoveryLoop {
    catalog: CatalogClient,
    config: RotationConfig,
    params: Arc<ParameterSet>,
    deps: MonitorDeps,
    cancel: CancellationToken,
}

impl DiscoveryLoop {
    pub fn new(
        catalog: CatalogClient,
        config: RotationConfig,
        params: Arc<ParameterSet>,
        deps: MonitorDeps,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            config,
            params,
            deps,
            cancel,
        }
    }

    /// Run until cancelled, then drain every monitor and wait for the
    /// settlements to land.
    pub async fn run(self) {
        let mut monitors: HashMap<String, Vec<MonitorHandle>> = HashMap::new();
        let mut progress: HashMap<String, CycleProgress> = HashMap::new();

        let mut ticker = tokio::time::interval(self.config.discovery_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.iteration(&mut monitors, &mut progress).await {
                warn!(error = %e, "Discovery iteration failed");
            }
        }

        info!("Discovery loop stopping; draining monitors");
        for (_, handles) in monitors.drain() {
            for handle in handles {
                handle.drain();
                handle.join().await;
            }
        }
    }

    async fn iteration(
        &self,
        monitors: &mut HashMap<String, Vec<MonitorHandle>>,
        progress: &mut HashMap<String, CycleProgress>,
    ) -> EngineResult<()> {
        let records = self.catalog.fetch_markets(&self.config.slug_pattern).await?;
        let now = Utc::now();

        // Settled monitors release their slots and their watchdog state.
        for handles in monitors.values_mut() {
            handles.retain(|handle| !handle.is_settled());
        }
        progress.retain(|market_id, _| {
            monitors
                .values()
                .flatten()
                .any(|handle| handle.market_id == *market_id)
        });

        for asset in &self.config.assets {
            let mut windows: Vec<MarketWindow> = records
                .iter()
                .filter(|record| record.is_observable())
                .filter_map(window_from_catalog)
                .filter(|window| {
                    window.crypto_asset == *asset && window.settlement_time > now
                })
                .collect();
            windows.sort_by_key(|window| window.settlement_time);

            let handles = monitors.entry(asset.clone()).or_default();

            let Some(current) = windows.first() else {
                debug!(asset = %asset, "No active window in catalog");
                continue;
            };

            // A monitor whose market the catalog no longer lists as
            // live drains early; settlement completes normally.
            let live_ids: Vec<&str> = windows.iter().map(|w| w.market_id.as_str()).collect();
            for handle in handles.iter() {
                if !live_ids.contains(&handle.market_id.as_str())
                    && handle.state() == MonitorState::Active
                {
                    info!(
                        market_id = %handle.market_id,
                        "Market no longer active in catalog; draining monitor"
                    );
                    handle.drain();
                }
            }

            // Spawn the current window's monitor if it has none.
            if !handles.iter().any(|h| h.market_id == current.market_id) {
                info!(
                    asset = %asset,
                    market_id = %current.market_id,
                    settlement = %current.settlement_time,
                    "Spawning monitor"
                );
                handles.push(MarketMonitor::spawn(
                    current.clone(),
                    Arc::clone(&self.params),
                    self.deps.clone(),
                ));
            }

            // Pre-discover the successor once runway is short, keeping
            // at most one extra monitor in STARTING.
            let runway = (current.settlement_time - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if runway < self.config.pre_discovery_lead {
                if let Some(next) = windows.get(1) {
                    let known = handles.iter().any(|h| h.market_id == next.market_id);
                    if !known && handles.len() < 2 {
                        info!(
                            asset = %asset,
                            market_id = %next.market_id,
                            "Pre-spawning successor monitor"
                        );
                        handles.push(MarketMonitor::spawn(
                            next.clone(),
                            Arc::clone(&self.params),
                            self.deps.clone(),
                        ));
                    }
                }
            }

            // Watchdog: an ACTIVE monitor whose cycle number has not
            // advanced for three cycle intervals is stalled.
            let stall_after = stall_threshold(&self.params);
            let observed_at = Instant::now();
            for handle in handles.iter() {
                if handle.state() != MonitorState::Active {
                    continue;
                }
                let number = handle.cycle_number();
                let entry = progress
                    .entry(handle.market_id.clone())
                    .or_insert(CycleProgress {
                        number,
                        at: observed_at,
                    });
                if entry.number != number {
                    entry.number = number;
                    entry.at = observed_at;
                } else if observed_at.duration_since(entry.at) >= stall_after {
                    warn!(
                        market_id = %handle.market_id,
                        cycle = number,
                        stalled_secs = observed_at.duration_since(entry.at).as_secs(),
                        "monitor_stalled: no cycle progress"
                    );
                    ANOMALIES_TOTAL
                        .with_label_values(&["monitor_stalled"])
                        .inc();
                    // Rearm so the next warning needs another full
                    // stall period.
                    entry.at = observed_at;
                }
            }
        }

        Ok(())
    }
}

/// Stall threshold: three planned cycle intervals. FIXED_COUNT spreads
/// its cycles over the window, so its interval derives from the window
/// length.
fn stall_threshold(params: &ParameterSet) -> Duration {
    let interval_seconds = match params.sampling {
        Sampling::FixedInterval { interval_seconds } => interval_seconds.max(1),
        Sampling::FixedCount { cycles_per_market } => {
            ((WINDOW_MINUTES * 60) as u64 / u64::from(cycles_per_market.max(1))).max(1)
        }
    };
    STALL_INTERVALS * Duration::from_secs(interval_seconds)
}

/// Build a market window from a catalog record.
///
/// The slug carries the identity: `{asset}-updown-15m-{settlement_unix}`.
/// The settlement time prefers `end_date_iso` and falls back to the
/// slug's trailing unix timestamp. Records that fit neither are
/// skipped, not errors.
pub fn window_from_catalog(record: &CatalogMarket) -> Option<MarketWindow> {
    let slug = record.market_slug.as_str();
    let asset = slug.split('-').next()?.to_lowercase();
    if asset.is_empty() {
        return None;
    }

    let settlement_time = record
        .end_date_iso
        .as_deref()
        .and_then(parse_iso)
        .or_else(|| {
            slug.rsplit('-')
                .next()
                .and_then(|raw| raw.parse::<i64>().ok())
                .and_then(|unix| DateTime::from_timestamp(unix, 0))
        })?;

    let tick = Points::from_decimal(record.minimum_tick_size).ok()?;
    if tick.inner() <= 0 {
        return None;
    }

    // Token order is the contract: first is the YES-equivalent.
    let yes = record.tokens.first()?;
    let no = record.tokens.get(1)?;

    let window = MarketWindow {
        market_id: slug.to_string(),
        crypto_asset: asset,
        condition_id: record.condition_id.clone(),
        yes_token: TokenId::new(yes.token_id.clone()),
        no_token: TokenId::new(no.token_id.clone()),
        tick_size_points: tick.inner(),
        start_time: settlement_time - ChronoDuration::minutes(WINDOW_MINUTES),
        settlement_time,
    };
    window.validate().ok()?;
    Some(window)
}

fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairscope_clob::CatalogToken;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(slug: &str, end_date_iso: Option<&str>) -> CatalogMarket {
        CatalogMarket {
            condition_id: "0xabc".to_string(),
            market_slug: slug.to_string(),
            tokens: vec![
                CatalogToken {
                    token_id: "101".to_string(),
                    outcome: "Up".to_string(),
                },
                CatalogToken {
                    token_id: "102".to_string(),
                    outcome: "Down".to_string(),
                },
            ],
            minimum_tick_size: Decimal::from_str("0.01").unwrap(),
            end_date_iso: end_date_iso.map(|s| s.to_string()),
            active: true,
            accepting_orders: true,
        }
    }

    #[test]
    fn test_window_from_slug_unix() {
        let window =
            window_from_catalog(&record("btc-updown-15m-1767226500", None)).unwrap();
        assert_eq!(window.crypto_asset, "btc");
        assert_eq!(window.market_id, "btc-updown-15m-1767226500");
        assert_eq!(window.settlement_time.timestamp(), 1_767_226_500);
        assert_eq!(
            window.start_time.timestamp(),
            1_767_226_500 - WINDOW_MINUTES * 60
        );
        assert_eq!(window.tick_size_points, 1);
        assert_eq!(window.yes_token.as_str(), "101");
        assert_eq!(window.no_token.as_str(), "102");
    }

    #[test]
    fn test_window_prefers_end_date_iso() {
        let window = window_from_catalog(&record(
            "eth-updown-15m-1767226500",
            Some("2026-01-01T00:20:00Z"),
        ))
        .unwrap();
        assert_eq!(
            window.settlement_time,
            parse_iso("2026-01-01T00:20:00Z").unwrap()
        );
    }

    #[test]
    fn test_window_rejects_unparseable_settlement() {
        assert!(window_from_catalog(&record("btc-updown-15m-soon", None)).is_none());
    }

    #[test]
    fn test_window_rejects_sub_point_tick() {
        let mut rec = record("btc-updown-15m-1767226500", None);
        rec.minimum_tick_size = Decimal::from_str("0.001").unwrap();
        assert!(window_from_catalog(&rec).is_none());
    }

    #[test]
    fn test_window_requires_two_tokens() {
        let mut rec = record("btc-updown-15m-1767226500", None);
        rec.tokens.pop();
        assert!(window_from_catalog(&rec).is_none());
    }

    fn params_with(sampling: Sampling) -> ParameterSet {
        ParameterSet::new(
            "watchdog",
            5,
            3,
            pairscope_core::TriggerRule::AskTouch,
            pairscope_core::ReferenceSource::Midpoint,
            sampling,
            10,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_stall_threshold_fixed_interval() {
        let params = params_with(Sampling::FixedInterval {
            interval_seconds: 10,
        });
        assert_eq!(stall_threshold(&params), Duration::from_secs(30));
    }

    #[test]
    fn test_stall_threshold_fixed_count_derives_from_window() {
        // 90 cycles over a 15-minute window: 10s interval, 30s stall.
        let params = params_with(Sampling::FixedCount {
            cycles_per_market: 90,
        });
        assert_eq!(stall_threshold(&params), Duration::from_secs(30));
    }
}
