use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::MessageError;
use crate::message::TelemetryMessage;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, tungstenite::Error>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed { error: Option<String> },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// What the transport produced for the handler.
#[derive(Debug)]
pub enum LinkEvent {
    Opened,
    Closed,
    Message(Result<TelemetryMessage, MessageError>),
    Ignored,
}

/// Classification of one read from an open socket.
#[derive(Debug)]
pub enum FrameEvent {
    Data(Result<TelemetryMessage, MessageError>),
    Control,
    Closed { error: Option<String> },
}

pub fn classify_frame(frame: Option<Result<Message, tungstenite::Error>>) -> FrameEvent {
    match frame {
        Some(Ok(Message::Text(text))) => FrameEvent::Data(TelemetryMessage::parse(&text)),
        Some(Ok(Message::Binary(bytes))) => {
            FrameEvent::Data(TelemetryMessage::parse_bytes(&bytes))
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => FrameEvent::Control,
        Some(Ok(Message::Close(frame))) => {
            if let Some(frame) = frame {
                debug!(
                    code = u16::from(frame.code),
                    reason = %frame.reason,
                    "Server sent close frame"
                );
            }
            FrameEvent::Closed { error: None }
        }
        Some(Err(e)) => FrameEvent::Closed {
            error: Some(e.to_string()),
        },
        None => FrameEvent::Closed { error: None },
    }
}

enum Link {
    Idle,
    Connecting(ConnectFuture),
    Open(WsStream),
}

/// Owns the streaming connection. Closure and errors are recorded here but
/// never trigger a reconnect; that decision belongs to the liveness monitor.
pub struct ConnectionManager {
    endpoint: String,
    link: Link,
    state: ConnectionState,
    started_ms: Option<u64>,
    attempts: u64,
}

impl ConnectionManager {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            link: Link::Idle,
            state: ConnectionState::Disconnected,
            started_ms: None,
            attempts: 0,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// When the current connection attempt began, Unix epoch milliseconds.
    pub fn started_ms(&self) -> Option<u64> {
        self.started_ms
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Start a fresh connection attempt, dropping any prior connection.
    pub fn connect(&mut self, now_ms: u64) {
        if matches!(self.link, Link::Open(_)) {
            debug!(endpoint = %self.endpoint, "Dropping previous connection");
        }
        let endpoint = self.endpoint.clone();
        let attempt =
            connect_async(endpoint).map(|result| result.map(|(stream, _response)| stream));
        self.link = Link::Connecting(Box::pin(attempt));
        self.state = ConnectionState::Connecting;
        self.started_ms = Some(now_ms);
        self.attempts += 1;
        debug!(endpoint = %self.endpoint, attempt = self.attempts, "Connecting");
    }

    /// Wait for the next transport event. Pending forever while idle.
    /// Cancel-safe: an in-flight connect attempt survives being dropped here.
    pub async fn next_event(&mut self) -> LinkEvent {
        match &mut self.link {
            Link::Idle => std::future::pending().await,
            Link::Connecting(attempt) => {
                let result = attempt.as_mut().await;
                self.on_established(result)
            }
            Link::Open(stream) => {
                let frame = stream.next().await;
                self.on_frame(frame)
            }
        }
    }

    fn on_established(&mut self, result: Result<WsStream, tungstenite::Error>) -> LinkEvent {
        match result {
            Ok(stream) => {
                info!(endpoint = %self.endpoint, "Connection open");
                self.link = Link::Open(stream);
                self.state = ConnectionState::Open;
                LinkEvent::Opened
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Connection attempt failed");
                self.mark_closed(Some(e.to_string()));
                LinkEvent::Closed
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) -> LinkEvent {
        match classify_frame(frame) {
            FrameEvent::Data(message) => LinkEvent::Message(message),
            FrameEvent::Control => LinkEvent::Ignored,
            FrameEvent::Closed { error } => {
                match &error {
                    Some(e) => warn!(endpoint = %self.endpoint, error = %e, "Connection lost"),
                    None => info!(endpoint = %self.endpoint, "Connection closed by peer"),
                }
                self.mark_closed(error);
                LinkEvent::Closed
            }
        }
    }

    fn mark_closed(&mut self, error: Option<String>) {
        self.link = Link::Idle;
        if !matches!(self.state, ConnectionState::Closed { .. }) {
            self.state = ConnectionState::Closed { error };
        }
    }

    /// Send a close frame and drop the connection. Idempotent.
    pub async fn close(&mut self, grace: Duration) {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Open(mut stream) => {
                if tokio::time::timeout(grace, stream.close(None)).await.is_err() {
                    debug!(endpoint = %self.endpoint, "Close handshake timed out");
                }
            }
            Link::Connecting(_) => debug!(endpoint = %self.endpoint, "Abandoned connect attempt"),
            Link::Idle => {}
        }
        self.mark_closed(None);
    }
}
