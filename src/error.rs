use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Why an inbound frame could not be turned into a [`crate::message::TelemetryMessage`].
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message top level must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("Binary frame is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    #[error("Server responded with status {0}")]
    Http(u16),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to decode response body: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}
