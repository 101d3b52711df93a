use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_RETENTION_SECS: f64 = 30.0;
pub const HEARTBEAT_PERIOD_MS: u64 = 1_000;
pub const STALENESS_THRESHOLD_MS: u64 = 5_000;
pub const CLOSE_GRACE_MS: u64 = 500;

pub const ENV_ENDPOINT: &str = "TELEMETRY_ENDPOINT";
pub const ENV_RETENTION_SECS: &str = "TELEMETRY_RETENTION_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    pub endpoint: String,
    pub retention_secs: f64,
    pub heartbeat_period_ms: u64,
    pub staleness_threshold_ms: u64,
    pub close_grace_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            retention_secs: DEFAULT_RETENTION_SECS,
            heartbeat_period_ms: HEARTBEAT_PERIOD_MS,
            staleness_threshold_ms: STALENESS_THRESHOLD_MS,
            close_grace_ms: CLOSE_GRACE_MS,
        }
    }
}

impl StreamConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn with_retention_secs(mut self, secs: f64) -> Self {
        self.retention_secs = secs;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Build from `TELEMETRY_ENDPOINT` / `TELEMETRY_RETENTION_SECS`.
    /// Callers load `.env` first if they want it honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint =
            std::env::var(ENV_ENDPOINT).map_err(|_| ConfigError::Missing(ENV_ENDPOINT))?;
        let mut config = Self::new(endpoint);
        if let Ok(raw) = std::env::var(ENV_RETENTION_SECS) {
            config.retention_secs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: ENV_RETENTION_SECS,
                reason: format!("not a number: {raw}"),
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                name: "endpoint",
                reason: format!("expected ws:// or wss:// URL, got {}", self.endpoint),
            });
        }
        if !(self.retention_secs.is_finite() && self.retention_secs > 0.0) {
            return Err(ConfigError::Invalid {
                name: "retentionSecs",
                reason: format!("must be positive, got {}", self.retention_secs),
            });
        }
        if self.heartbeat_period_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "heartbeatPeriodMs",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs_f64(self.retention_secs)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
