use std::time::Duration;

use tracing::debug;

use crate::connection::ConnectionState;

/// What a heartbeat tick should do about the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Connection looks usable.
    Keep,
    /// No connection or it is closed: start a fresh one.
    Connect,
    /// Connection claims to be alive but has been silent too long.
    Reconnect,
}

/// Decides, independently of transport signaling, whether the current
/// connection is usable.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    staleness_threshold: Duration,
}

impl LivenessMonitor {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self { staleness_threshold }
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// `reference_ms` is the later of the last inbound message and the start
    /// of the current connection attempt.
    pub fn check(&self, state: &ConnectionState, reference_ms: u64, now_ms: u64) -> TickAction {
        match state {
            ConnectionState::Disconnected | ConnectionState::Closed { .. } => TickAction::Connect,
            ConnectionState::Connecting | ConnectionState::Open => {
                let silent_for = Duration::from_millis(now_ms.saturating_sub(reference_ms));
                if silent_for >= self.staleness_threshold {
                    debug!(
                        silent_ms = silent_for.as_millis() as u64,
                        threshold_ms = self.staleness_threshold.as_millis() as u64,
                        "Connection is silent past threshold"
                    );
                    TickAction::Reconnect
                } else {
                    TickAction::Keep
                }
            }
        }
    }
}

/// Seconds between `last_activity_ms` and `now_ms`, `None` before the first message.
pub fn elapsed_secs(last_activity_ms: Option<u64>, now_ms: u64) -> Option<f64> {
    last_activity_ms.map(|last| now_ms.saturating_sub(last) as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> LivenessMonitor {
        LivenessMonitor::new(Duration::from_secs(5))
    }

    #[test]
    fn disconnected_requires_connect() {
        assert_eq!(monitor().check(&ConnectionState::Disconnected, 0, 0), TickAction::Connect);
    }

    #[test]
    fn closed_requires_connect_on_next_tick() {
        let state = ConnectionState::Closed {
            error: Some("connection reset".to_string()),
        };
        assert_eq!(monitor().check(&state, 10_000, 10_001), TickAction::Connect);
        let clean = ConnectionState::Closed { error: None };
        assert_eq!(monitor().check(&clean, 10_000, 10_001), TickAction::Connect);
    }

    #[test]
    fn open_with_recent_activity_is_kept() {
        assert_eq!(monitor().check(&ConnectionState::Open, 1_000, 5_999), TickAction::Keep);
    }

    #[test]
    fn open_silent_for_threshold_forces_reconnect() {
        assert_eq!(monitor().check(&ConnectionState::Open, 1_000, 6_000), TickAction::Reconnect);
        assert_eq!(monitor().check(&ConnectionState::Open, 1_000, 60_000), TickAction::Reconnect);
    }

    #[test]
    fn hung_connect_attempt_is_replaced() {
        assert_eq!(monitor().check(&ConnectionState::Connecting, 0, 4_000), TickAction::Keep);
        assert_eq!(monitor().check(&ConnectionState::Connecting, 0, 5_000), TickAction::Reconnect);
    }

    #[test]
    fn reference_in_future_is_not_stale() {
        // Wall clock stepped backwards after the last message.
        assert_eq!(monitor().check(&ConnectionState::Open, 9_000, 8_000), TickAction::Keep);
    }

    #[test]
    fn elapsed_is_none_before_first_message() {
        assert_eq!(elapsed_secs(None, 1_000), None);
        assert_eq!(elapsed_secs(Some(1_000), 3_500), Some(2.5));
    }
}
