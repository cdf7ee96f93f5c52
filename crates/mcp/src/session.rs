// Session manager for the SSE transport
//
// Owns the table of open streaming sessions. Opening a session registers an
// output channel, queues the `endpoint` handshake and starts a heartbeat task
// tied to a cancellation token. Closing removes the entry and cancels the
// heartbeat; dropping the returned stream closes the session.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MESSAGE_PATH: &str = "/messages";
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Event delivered on a session's stream
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake carrying the POST URL for this session
    Endpoint(String),
    /// Keep-alive
    Heartbeat(DateTime<Utc>),
    /// Named JSON payload, e.g. the echoed `initialize` response
    Message { event: String, data: Value },
}

impl SessionEvent {
    /// SSE event name
    pub fn name(&self) -> &str {
        match self {
            Self::Endpoint(_) => "endpoint",
            Self::Heartbeat(_) => "ping",
            Self::Message { event, .. } => event,
        }
    }

    /// SSE data line
    pub fn data(&self) -> String {
        match self {
            Self::Endpoint(url) => url.clone(),
            Self::Heartbeat(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
            Self::Message { data, .. } => data.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session closed: {0}")]
    Closed(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    /// Path announced in the `endpoint` event; the session id is appended as
    /// a `session_id` query parameter
    pub message_path: String,
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            message_path: DEFAULT_MESSAGE_PATH.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

struct SessionEntry {
    sender: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

/// Correlation handle for an open session, returned by `lookup`
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    sender: mpsc::Sender<SessionEvent>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the stream side is still attached
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Sole owner of the active-session table
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    config: Arc<SessionConfig>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            clock,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session. The returned stream yields the `endpoint` event
    /// first, then heartbeats and fan-out messages until the session closes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self) -> SessionStream {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = CancellationToken::new();

        let id = {
            let mut sessions = self.sessions();
            let mut id = uuid::Uuid::new_v4().to_string();
            while sessions.contains_key(&id) {
                id = uuid::Uuid::new_v4().to_string();
            }

            let endpoint = format!("{}?session_id={}", self.config.message_path, id);
            if sender.try_send(SessionEvent::Endpoint(endpoint)).is_err() {
                tracing::warn!(session_id = %id, "failed to queue endpoint event");
            }

            sessions.insert(
                id.clone(),
                SessionEntry {
                    sender: sender.clone(),
                    cancel: cancel.clone(),
                },
            );
            id
        };

        tokio::spawn(heartbeat_loop(
            self.clone(),
            id.clone(),
            sender,
            cancel,
            self.config.heartbeat_interval,
        ));

        tracing::info!(session_id = %id, "SSE session opened");

        SessionStream {
            id,
            inner: ReceiverStream::new(receiver),
            manager: self.clone(),
        }
    }

    /// Resolve an open session. Unknown and closed ids both fail.
    pub fn lookup(&self, session_id: &str) -> Result<Session, SessionError> {
        let sender = self
            .sessions()
            .get(session_id)
            .map(|entry| entry.sender.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if sender.is_closed() {
            self.close(session_id);
            return Err(SessionError::Closed(session_id.to_string()));
        }

        Ok(Session {
            id: session_id.to_string(),
            sender,
        })
    }

    /// Push an event onto a session's stream without waiting. A full buffer
    /// drops the event; a detached stream closes the session.
    pub fn notify(&self, session_id: &str, event: SessionEvent) -> Result<(), SessionError> {
        let session = self.lookup(session_id)?;
        match session.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    session_id,
                    event = event.name(),
                    "session buffer full, dropping event"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.close(session_id);
                Err(SessionError::Closed(session_id.to_string()))
            }
        }
    }

    /// Close a session. Returns false when it was not open; safe to repeat.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions().remove(session_id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(session_id, "SSE session closed");
                true
            }
            None => false,
        }
    }

    /// Close every open session
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions().drain().collect();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all SSE sessions");
        }
        drained.len()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions().len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

async fn heartbeat_loop(
    manager: SessionManager,
    session_id: String,
    sender: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    period: Duration,
) {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let event = SessionEvent::Heartbeat(manager.clock.now());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sender.send(event) => {
                if sent.is_err() {
                    tracing::debug!(session_id = %session_id, "heartbeat write failed");
                    manager.close(&session_id);
                    break;
                }
            }
        }
    }

    tracing::debug!(session_id = %session_id, "heartbeat stopped");
}

/// Event stream for one session; closes the session when dropped
pub struct SessionStream {
    id: String,
    inner: ReceiverStream<SessionEvent>,
    manager: SessionManager,
}

impl SessionStream {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Stream for SessionStream {
    type Item = SessionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.manager.close(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;
    use futures::StreamExt;
    use std::collections::HashSet;

    fn manager() -> SessionManager {
        SessionManager::default()
    }

    #[tokio::test]
    async fn test_open_sends_endpoint_first() {
        let manager = manager();
        let mut stream = manager.open();
        let id = stream.id().to_string();

        let event = stream.next().await.unwrap();
        assert_eq!(event.name(), "endpoint");
        assert_eq!(event.data(), format!("/messages?session_id={}", id));
        assert!(manager.contains(&id));
    }

    #[tokio::test]
    async fn test_lookup_lifecycle() {
        let manager = manager();
        let stream = manager.open();
        let id = stream.id().to_string();

        let session = manager.lookup(&id).unwrap();
        assert_eq!(session.id(), id);
        assert!(session.is_connected());

        assert!(manager.close(&id));
        assert!(!manager.close(&id));
        assert_eq!(manager.lookup(&id).unwrap_err(), SessionError::NotFound(id));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = manager();
        assert!(matches!(
            manager.lookup("missing"),
            Err(SessionError::NotFound(_))
        ));
        assert!(manager.notify("missing", SessionEvent::Endpoint("x".into())).is_err());
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_session() {
        let manager = manager();
        let stream = manager.open();
        let id = stream.id().to_string();
        assert_eq!(manager.active_count(), 1);

        drop(stream);
        assert_eq!(manager.active_count(), 0);
        assert!(manager.lookup(&id).is_err());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let manager = manager();
        let mut stream = manager.open();
        let id = stream.id().to_string();

        assert_eq!(stream.next().await.unwrap().name(), "endpoint");
        manager.close(&id);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_interval() {
        let instant = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let manager = SessionManager::with_clock(
            SessionConfig::default(),
            Arc::new(FixedClock(instant)),
        );
        let mut stream = manager.open();
        stream.next().await.unwrap();

        let started = tokio::time::Instant::now();
        let event = stream.next().await.unwrap();
        assert_eq!(event, SessionEvent::Heartbeat(instant));
        assert_eq!(event.name(), "ping");
        assert_eq!(event.data(), "2024-01-02T03:04:05Z");
        assert!(started.elapsed() >= DEFAULT_HEARTBEAT_INTERVAL);

        let event = stream.next().await.unwrap();
        assert_eq!(event.name(), "ping");
        assert!(started.elapsed() >= DEFAULT_HEARTBEAT_INTERVAL * 2);
    }

    #[tokio::test]
    async fn test_notify_delivers_message() {
        let manager = manager();
        let mut stream = manager.open();
        let id = stream.id().to_string();
        stream.next().await.unwrap();

        manager
            .notify(
                &id,
                SessionEvent::Message {
                    event: "initialized".to_string(),
                    data: serde_json::json!({"ok": true}),
                },
            )
            .unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.name(), "initialized");
        assert_eq!(event.data(), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_ids_unique_among_open_sessions() {
        let manager = manager();
        let streams: Vec<_> = (0..50).map(|_| manager.open()).collect();
        let ids: HashSet<_> = streams.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(manager.active_count(), 50);

        assert_eq!(manager.close_all(), 50);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_custom_message_path() {
        let manager = SessionManager::new(SessionConfig {
            message_path: "/rpc/messages".to_string(),
            ..SessionConfig::default()
        });
        let mut stream = manager.open();
        let endpoint = stream.next().await.unwrap().data();
        assert!(endpoint.starts_with("/rpc/messages?session_id="));
    }
}
