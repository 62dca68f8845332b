//! Application orchestration.
//!
//! Wires the store, the durable writer, the discovery loop and the
//! signal handlers together, and owns the shutdown order: signal ->
//! monitors drain (settlements flush through the writer) -> writer
//! queue drains -> store flushes -> exit.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use pairscope_clob::{CatalogClient, PollingClient};
use pairscope_engine::{DiscoveryLoop, MonitorDeps};
use pairscope_store::{DurableWriter, ParameterSetRow, SqliteStore};
use pairscope_telemetry::metrics;
use std::path::PathBuf;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The pairscope application.
pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run until a shutdown signal or an unrecoverable store failure.
    pub async fn run(self) -> AppResult<()> {
        let params = Arc::new(self.config.parameters.build()?);
        info!(
            name = %params.name,
            s0 = params.s0_points,
            delta = params.delta_points,
            pair_cap = params.pair_cap_points,
            stop_loss = ?params.stop_loss_threshold_points,
            "Parameter set loaded"
        );

        // Store bootstrap is the only fatal-at-startup I/O.
        let store_path = PathBuf::from(self.config.store_path());
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut store = SqliteStore::open(&store_path)?;
        store.insert_parameter_set(&ParameterSetRow::from(params.as_ref()))?;
        let next_attempt_id = store.max_attempt_id()?;

        let (writer, writer_handle) = DurableWriter::new(store, self.config.writer_config());
        let mut writer_task = tokio::spawn(writer.run());

        let cancel = CancellationToken::new();
        let deps = MonitorDeps {
            writer: writer_handle.clone(),
            polling: Arc::new(PollingClient::new(self.config.clob_url.clone())?),
            stream_config: self.config.stream_config(),
            attempt_ids: Arc::new(AtomicI64::new(next_attempt_id)),
            capture_snapshots: self.config.capture_snapshots(),
            capture_lifecycle: self.config.capture_lifecycle(),
            max_anomalies_per_market: self.config.max_anomalies_per_market,
        };

        let discovery = DiscoveryLoop::new(
            CatalogClient::new(self.config.clob_url.clone())?,
            self.config.rotation_config(),
            params,
            deps,
            cancel.clone(),
        );
        let discovery_task = tokio::spawn(discovery.run());

        info!("pairscope running; waiting for shutdown signal");
        let fatal = tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received; draining");
                None
            }
            result = &mut writer_task => {
                // The writer only exits early on the overflow path.
                error!("Durable writer stopped; shutting down");
                Some(result)
            }
        };

        // Drain: monitors settle and flush their writes first.
        cancel.cancel();
        if let Err(e) = discovery_task.await {
            error!(error = %e, "Discovery task failed during drain");
        }

        // Closing the last producer lets the writer drain and stop.
        drop(writer_handle);
        let writer_result = match fatal {
            Some(result) => result,
            None => writer_task.await,
        };
        match writer_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Durable writer failed");
                return Err(AppError::Store(e));
            }
            Err(e) => {
                return Err(AppError::Config(format!("writer task panicked: {e}")));
            }
        }

        metrics::log_shutdown_summary();
        info!("Shutdown complete");
        Ok(())
    }
}

/// SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
