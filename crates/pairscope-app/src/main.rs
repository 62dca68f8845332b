//! pairscope - passive hedged-pair measurement engine - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Passive hedged-pair measurement engine for 15-minute binary markets
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PAIRSCOPE_CONFIG)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS crypto provider must be installed before any WS connections.
    pairscope_ws::init_crypto();

    let args = Args::parse();

    pairscope_telemetry::init_logging()?;

    info!("Starting pairscope v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("PAIRSCOPE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = pairscope_app::AppConfig::load(&config_path)?;

    pairscope_app::Application::new(config).run().await?;

    Ok(())
}
