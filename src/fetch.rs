use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Fetch `url` and decode its JSON body, failing with [`FetchError::Timeout`]
/// if the whole exchange (connect through body) takes longer than `timeout`.
/// One attempt, no retries.
pub async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Value, FetchError> {
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            warn!(url, timeout_ms, "Fetch timed out");
            FetchError::Timeout(timeout_ms)
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    };

    let response = client.get(url).timeout(timeout).send().await.map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Http(status.as_u16()));
    }

    let body: Value = response.json().await.map_err(classify)?;
    debug!(url, status = status.as_u16(), "Fetched JSON");
    Ok(body)
}
