use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionManager, ConnectionState, LinkEvent};
use crate::error::MessageError;
use crate::history::HistoryStore;
use crate::liveness::{elapsed_secs, LivenessMonitor, TickAction};
use crate::message::TelemetryMessage;
use crate::now_ms;
use crate::types::config::StreamConfig;

/// Telemetry stream handler: connection, liveness monitor and history store
/// driven from a single task so no two passes ever interleave.
pub struct StreamHandler {
    config: StreamConfig,
    connection: ConnectionManager,
    monitor: LivenessMonitor,
    store: watch::Sender<HistoryStore>,
    state: watch::Sender<ConnectionState>,
    last_activity_ms: Option<u64>,
}

impl StreamHandler {
    pub fn new(config: StreamConfig) -> Self {
        let initial = HistoryStore::new(config.retention());
        Self::with_snapshot(config, initial)
    }

    /// Start from a pre-populated store. Its retention is replaced by the config's.
    pub fn with_snapshot(config: StreamConfig, mut initial: HistoryStore) -> Self {
        initial.set_retention(config.retention());
        let (store, _) = watch::channel(initial);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connection: ConnectionManager::new(config.endpoint.clone()),
            monitor: LivenessMonitor::new(config.staleness_threshold()),
            config,
            store,
            state,
            last_activity_ms: None,
        }
    }

    /// Spawn the handler onto the current tokio runtime.
    pub fn spawn(self) -> StreamHandle {
        let cancel = CancellationToken::new();
        let snapshot = self.store.subscribe();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run(cancel.clone()));
        StreamHandle {
            cancel,
            task: Some(task),
            snapshot,
            state,
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        info!(endpoint = %self.config.endpoint, "Stream handler started");
        self.connection.connect(now_ms());
        self.publish_state();

        let period = self.config.heartbeat_period();
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => self.on_tick(now_ms()),
                event = self.connection.next_event() => self.on_link_event(event, now_ms()),
            }
        }

        self.connection.close(self.config.close_grace()).await;
        self.publish_state();
        info!(endpoint = %self.config.endpoint, "Stream handler stopped");
    }

    fn on_link_event(&mut self, event: LinkEvent, now_ms: u64) {
        match event {
            LinkEvent::Message(message) => self.on_message(message, now_ms),
            LinkEvent::Opened | LinkEvent::Closed => self.publish_state(),
            LinkEvent::Ignored => {}
        }
    }

    /// Any delivered data frame counts as activity, even one that fails to parse.
    fn on_message(&mut self, message: Result<TelemetryMessage, MessageError>, now_ms: u64) {
        self.last_activity_ms = Some(now_ms);
        match message {
            Ok(message) => {
                self.store.send_modify(|store| {
                    let report = store.ingest(&message, now_ms);
                    store.set_last_update_elapsed(Some(0.0));
                    debug!(
                        appended = report.samples_appended,
                        replaced = report.groups_replaced,
                        skipped = report.groups_skipped,
                        "Ingested message"
                    );
                });
            }
            Err(e) => warn!(error = %e, "Dropping malformed message"),
        }
    }

    fn on_tick(&mut self, now_ms: u64) {
        let reference = self
            .connection
            .started_ms()
            .unwrap_or(0)
            .max(self.last_activity_ms.unwrap_or(0));

        match self.monitor.check(self.connection.state(), reference, now_ms) {
            TickAction::Keep => {}
            TickAction::Connect => {
                info!(state = ?self.connection.state(), "Connection unavailable, reconnecting");
                self.connection.connect(now_ms);
            }
            TickAction::Reconnect => {
                warn!(
                    threshold_ms = self.config.staleness_threshold_ms,
                    "No data within staleness threshold, forcing reconnect"
                );
                self.connection.connect(now_ms);
            }
        }

        let elapsed = elapsed_secs(self.last_activity_ms, now_ms);
        self.store.send_modify(|store| {
            let evicted = store.evict(now_ms);
            if evicted > 0 {
                debug!(evicted, "Evicted expired samples");
            }
            store.set_last_update_elapsed(elapsed);
        });
        self.publish_state();
    }

    fn publish_state(&self) {
        let current = self.connection.state().clone();
        self.state.send_if_modified(|published| {
            if *published == current {
                false
            } else {
                *published = current;
                true
            }
        });
    }
}

/// Handle to a running [`StreamHandler`]. Dropping it tears the handler down.
pub struct StreamHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    snapshot: watch::Receiver<HistoryStore>,
    state: watch::Receiver<ConnectionState>,
}

impl StreamHandle {
    /// Borrow the current store. Do not hold across an await point.
    pub fn snapshot(&self) -> watch::Ref<'_, HistoryStore> {
        self.snapshot.borrow()
    }

    /// Receiver notified after every ingestion and heartbeat tick.
    pub fn subscribe(&self) -> watch::Receiver<HistoryStore> {
        self.snapshot.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the heartbeat, close the connection and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Stream handler task ended abnormally");
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
