use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use telemetry_stream::history::HistoryStore;
use telemetry_stream::types::config::StreamConfig;
use telemetry_stream::{init_tracing, StreamHandler};

#[derive(Debug, Parser)]
#[command(version, about = "Stream telemetry into a rolling in-memory history")]
struct Cli {
    /// JSON config file; flags and environment override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// WebSocket endpoint, e.g. ws://localhost:8000/ecu-telemetry-stream/0
    #[arg(long, env = "TELEMETRY_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "TELEMETRY_RETENTION_SECS")]
    retention_secs: Option<f64>,

    /// Snapshot JSON used to pre-populate the store.
    #[arg(long)]
    initial_snapshot: Option<PathBuf>,

    /// Seconds between summary log lines.
    #[arg(long, default_value_t = 5)]
    summary_secs: u64,
}

fn load_config(cli: &Cli) -> Result<StreamConfig, String> {
    let mut config = match &cli.config {
        Some(path) => StreamConfig::from_file(path).map_err(|e| e.to_string())?,
        None => StreamConfig::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(secs) = cli.retention_secs {
        config.retention_secs = secs;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_snapshot(path: &Path, config: &StreamConfig) -> Result<HistoryStore, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&raw).map_err(|e| format!("Invalid snapshot JSON: {}", e))?;
    HistoryStore::from_json(value, config.retention())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };

    let handler = match &cli.initial_snapshot {
        Some(path) => match load_snapshot(path, &config) {
            Ok(initial) => StreamHandler::with_snapshot(config, initial),
            Err(e) => {
                error!(error = %e, "Failed to load initial snapshot");
                std::process::exit(2);
            }
        },
        None => StreamHandler::new(config),
    };
    let handle = handler.spawn();

    let mut summary = tokio::time::interval(Duration::from_secs(cli.summary_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = summary.tick() => {
                let state = handle.connection_state();
                let snapshot = handle.snapshot();
                info!(
                    ?state,
                    groups = snapshot.groups().count(),
                    samples = snapshot.sample_count(),
                    last_update_elapsed = ?snapshot.last_update_elapsed(),
                    "Telemetry summary"
                );
            }
        }
    }

    info!("Shutting down");
    handle.shutdown().await;
}
