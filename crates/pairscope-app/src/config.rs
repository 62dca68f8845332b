//! Application configuration.
//!
//! Everything except the store path and log verbosity comes from the
//! TOML file; those two may be overridden through the environment
//! (`PAIRSCOPE_DB`, `RUST_LOG`).

use crate::error::{AppError, AppResult};
use pairscope_core::{ParameterSet, ReferenceSource, Sampling, TriggerRule};
use pairscope_engine::RotationConfig;
use pairscope_store::WriterConfig;
use pairscope_ws::StreamConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Measurement parameter section, one per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersConfig {
    /// Parameter-set name; also its store identity.
    pub name: String,
    pub s0_points: i64,
    pub delta_points: i64,
    #[serde(default)]
    pub trigger_rule: TriggerRule,
    #[serde(default)]
    pub reference_source: ReferenceSource,
    /// "fixed_interval" or "fixed_count".
    #[serde(default = "default_sampling_mode")]
    pub sampling_mode: String,
    #[serde(default)]
    pub cycle_interval_seconds: Option<u64>,
    #[serde(default)]
    pub cycles_per_market: Option<u32>,
    #[serde(default = "default_feed_gap_threshold")]
    pub feed_gap_threshold_seconds: u64,
    #[serde(default)]
    pub stop_loss_threshold_points: Option<i64>,
}

fn default_sampling_mode() -> String {
    "fixed_interval".to_string()
}

fn default_feed_gap_threshold() -> u64 {
    10
}

impl ParametersConfig {
    /// Build the validated, immutable parameter set.
    pub fn build(&self) -> AppResult<ParameterSet> {
        let sampling = match self.sampling_mode.as_str() {
            "fixed_interval" => Sampling::FixedInterval {
                interval_seconds: self.cycle_interval_seconds.ok_or_else(|| {
                    AppError::Config(
                        "fixed_interval sampling requires cycle_interval_seconds".to_string(),
                    )
                })?,
            },
            "fixed_count" => Sampling::FixedCount {
                cycles_per_market: self.cycles_per_market.ok_or_else(|| {
                    AppError::Config(
                        "fixed_count sampling requires cycles_per_market".to_string(),
                    )
                })?,
            },
            other => {
                return Err(AppError::Config(format!(
                    "unknown sampling_mode '{other}'"
                )))
            }
        };

        Ok(ParameterSet::new(
            self.name.clone(),
            self.s0_points,
            self.delta_points,
            self.trigger_rule,
            self.reference_source,
            sampling,
            self.feed_gap_threshold_seconds,
            self.stop_loss_threshold_points,
        )?)
    }
}

/// Discovery and rotation section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_slug_pattern")]
    pub slug_pattern: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    #[serde(default = "default_pre_discovery_lead")]
    pub pre_discovery_lead_seconds: u64,
}

fn default_discovery_interval() -> u64 {
    60
}

fn default_slug_pattern() -> String {
    "-updown-15m-".to_string()
}

fn default_assets() -> Vec<String> {
    vec!["btc".to_string()]
}

fn default_pre_discovery_lead() -> u64 {
    120
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_discovery_interval(),
            slug_pattern: default_slug_pattern(),
            assets: default_assets(),
            pre_discovery_lead_seconds: default_pre_discovery_lead(),
        }
    }
}

/// Store section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite path; `PAIRSCOPE_DB` overrides.
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,
    #[serde(default = "default_max_buffered_commands")]
    pub max_buffered_commands: usize,
}

fn default_store_path() -> String {
    "./data/measurements.db".to_string()
}

fn default_batch_interval_ms() -> u64 {
    250
}

fn default_batch_threshold() -> usize {
    64
}

fn default_max_buffered_commands() -> usize {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            batch_interval_ms: default_batch_interval_ms(),
            batch_threshold: default_batch_threshold(),
            max_buffered_commands: default_max_buffered_commands(),
        }
    }
}

/// Stream session section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_seconds")]
    pub reconnect_max_delay_seconds: u64,
    #[serde(default = "default_storm_threshold")]
    pub storm_threshold: u32,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_seconds() -> u64 {
    60
}

fn default_storm_threshold() -> u32 {
    5
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_seconds: default_reconnect_max_delay_seconds(),
            storm_threshold: default_storm_threshold(),
        }
    }
}

/// Optional diagnostic capture flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub snapshots: bool,
    #[serde(default)]
    pub lifecycle: bool,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Market-channel WebSocket URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// CLOB REST base URL (catalog and polling fallback).
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    pub parameters: ParametersConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Anomaly budget before a market is flagged.
    #[serde(default = "default_max_anomalies_per_market")]
    pub max_anomalies_per_market: u64,
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_max_anomalies_per_market() -> u64 {
    100
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config {path}: {e}")))
    }

    /// Load from `path` if it exists, from defaults otherwise.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Err(AppError::Config(format!("Config file not found: {path}")))
        }
    }

    /// Store path with the environment override applied.
    pub fn store_path(&self) -> String {
        std::env::var("PAIRSCOPE_DB").unwrap_or_else(|_| self.store.path.clone())
    }

    /// Snapshot capture, overridable via `PAIRSCOPE_CAPTURE_SNAPSHOTS`.
    pub fn capture_snapshots(&self) -> bool {
        env_flag("PAIRSCOPE_CAPTURE_SNAPSHOTS").unwrap_or(self.capture.snapshots)
    }

    /// Lifecycle capture, overridable via `PAIRSCOPE_CAPTURE_LIFECYCLE`.
    pub fn capture_lifecycle(&self) -> bool {
        env_flag("PAIRSCOPE_CAPTURE_LIFECYCLE").unwrap_or(self.capture.lifecycle)
    }

    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            discovery_interval: Duration::from_secs(self.discovery.interval_seconds.max(1)),
            slug_pattern: self.discovery.slug_pattern.clone(),
            assets: self
                .discovery
                .assets
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            pre_discovery_lead: Duration::from_secs(self.discovery.pre_discovery_lead_seconds),
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.ws_url.clone(),
            heartbeat_interval_ms: self.websocket.heartbeat_interval_ms,
            reconnect_base_delay_ms: self.websocket.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.websocket.reconnect_max_delay_seconds * 1000,
            storm_threshold: self.websocket.storm_threshold,
            storm_window_secs: 60,
        }
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            batch_interval: Duration::from_millis(self.store.batch_interval_ms.max(1)),
            batch_threshold: self.store.batch_threshold.max(1),
            max_buffered_commands: self.store.max_buffered_commands,
            ..WriterConfig::default()
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [parameters]
        name = "baseline"
        s0_points = 5
        delta_points = 3
        cycle_interval_seconds = 10
    "#;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.ws_url, default_ws_url());
        assert_eq!(config.discovery.interval_seconds, 60);
        assert_eq!(config.store.batch_interval_ms, 250);
        assert_eq!(config.websocket.heartbeat_interval_ms, 30_000);
        assert!(!config.capture.snapshots);

        let params = config.parameters.build().unwrap();
        assert_eq!(params.pair_cap_points, 97);
        assert!(matches!(
            params.sampling,
            Sampling::FixedInterval {
                interval_seconds: 10
            }
        ));
    }

    #[test]
    fn test_fixed_count_requires_cycle_count() {
        let raw = r#"
            [parameters]
            name = "counted"
            s0_points = 5
            delta_points = 3
            sampling_mode = "fixed_count"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert!(config.parameters.build().is_err());
    }

    #[test]
    fn test_unknown_sampling_mode_rejected() {
        let raw = r#"
            [parameters]
            name = "odd"
            s0_points = 5
            delta_points = 3
            sampling_mode = "adaptive"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert!(config.parameters.build().is_err());
    }

    #[test]
    fn test_out_of_range_parameters_rejected() {
        let raw = r#"
            [parameters]
            name = "wild"
            s0_points = 70
            delta_points = 3
            cycle_interval_seconds = 10
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert!(config.parameters.build().is_err());
    }

    #[test]
    fn test_stream_config_mapping() {
        let config: AppConfig = toml::from_str(MINIMAL).unwrap();
        let stream = config.stream_config();
        assert_eq!(stream.reconnect_max_delay_ms, 60_000);
        assert_eq!(stream.heartbeat_interval_ms, 30_000);
    }
}
