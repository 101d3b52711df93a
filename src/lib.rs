pub mod connection;
pub mod error;
pub mod fetch;
pub mod format;
pub mod handler;
pub mod history;
pub mod liveness;
pub mod message;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

use tracing_subscriber::EnvFilter;

pub use connection::ConnectionState;
pub use handler::{StreamHandle, StreamHandler};
pub use history::HistoryStore;
pub use types::config::StreamConfig;

/// Initialize structured logging with tracing.
/// Respects RUST_LOG env var; defaults to `info` level for this crate.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("telemetry_stream=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Wall-clock time in Unix epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
