//! Per-session publish/subscribe.
//!
//! The [`Broadcaster`] trait is the seam between the orchestration core and
//! whatever transport carries events to clients. [`BroadcastHub`] is the
//! in-process implementation built on [`tokio::sync::broadcast`].
//!
//! # Ordering
//!
//! A hub never reorders events of one publisher: each `publish` call enqueues
//! synchronously before returning, so a task that awaits its publishes in
//! sequence produces a FIFO topic. Concurrent publishers on different topics
//! of the same session interleave freely; subscribers demultiplex by
//! [`Topic`](crate::research::event::Topic) or role.
//!
//! # Slow subscribers
//!
//! Publishing never waits for subscribers. Each session buffers up to
//! `capacity` undelivered events per subscriber; a subscriber that falls
//! further behind loses the **oldest** events and its next `recv` reports
//! [`SubscriptionError::Lagged`] with the number skipped. Generation is never
//! throttled by a slow reader.
//!
//! # Example
//!
//! ```rust
//! use fanout_research::channel::{BroadcastHub, Broadcaster};
//! use fanout_research::event::StreamEvent;
//! use fanout_research::role::RoleKind;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = BroadcastHub::new(64);
//! let mut subscription = hub.subscribe("session-1");
//!
//! hub.publish("session-1", StreamEvent::chunk(RoleKind::Analyst, "hello"))
//!     .await
//!     .unwrap();
//!
//! let envelope = subscription.recv().await.unwrap();
//! assert_eq!(envelope.event.role(), Some(RoleKind::Analyst));
//! # }
//! ```

use crate::research::event::{Envelope, StreamEvent};
use crate::research::substrate::{retry_step, RetryPolicy};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;

/// A broadcast emission that did not reach the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishError {
    pub session_id: String,
    pub message: String,
}

impl PublishError {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Publish failed for session {}: {}",
            self.session_id, self.message
        )
    }
}

impl Error for PublishError {}

/// Sink for session-scoped stream events.
///
/// Implementations must be safe to call concurrently from every in-flight
/// agent task of a session and must preserve the order of calls made by a
/// single caller.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Publish `event` on its topic ([`StreamEvent::topic`]) of `session_id`.
    async fn publish(&self, session_id: &str, event: StreamEvent) -> Result<(), PublishError>;

    /// Called once a run of `session_id` has reached a terminal state and
    /// nothing more will be published for it. Sinks with per-session state
    /// release it here.
    async fn end_session(&self, _session_id: &str) {}
}

/// Publish `event` with the delivery guarantee its kind calls for.
///
/// Best-effort events ([`StreamEvent::is_best_effort`]) get one attempt.
/// Everything else is retried under `retry`. Failures are logged, never
/// returned; the result only reports whether the event got through.
pub async fn deliver(
    broadcaster: &dyn Broadcaster,
    retry: &RetryPolicy,
    session_id: &str,
    event: StreamEvent,
) -> bool {
    if event.is_best_effort() {
        return match broadcaster.publish(session_id, event).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("fanout_research::channel::deliver(...): dropped best-effort event: {}", err);
                false
            }
        };
    }

    let topic = event.topic();
    match retry_step(retry, "publish", |_| broadcaster.publish(session_id, event.clone())).await {
        Ok(()) => true,
        Err(failure) => {
            log::warn!(
                "fanout_research::channel::deliver(...): {} event on {} not delivered: {}",
                session_id,
                topic,
                failure
            );
            false
        }
    }
}

/// Reasons a subscription could not yield the next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscriber fell behind and this many of the oldest events were dropped.
    Lagged(u64),
    /// The session was closed and every buffered event has been read.
    Closed,
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionError::Lagged(n) => write!(f, "Subscriber lagged, {} events dropped", n),
            SubscriptionError::Closed => write!(f, "Session closed"),
        }
    }
}

impl Error for SubscriptionError {}

struct SessionChannel {
    sender: broadcast::Sender<Envelope>,
    history: Option<Mutex<Vec<Envelope>>>,
}

impl SessionChannel {
    fn new(capacity: usize, record_history: bool) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: if record_history {
                Some(Mutex::new(Vec::new()))
            } else {
                None
            },
        }
    }

    fn snapshot(&self) -> Vec<Envelope> {
        self.history
            .as_ref()
            .map(|history| history.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }

    fn send(&self, envelope: Envelope) {
        match &self.history {
            Some(history) => {
                // Hold the log lock across the send so history order equals delivery order.
                let mut log = history.lock().unwrap_or_else(PoisonError::into_inner);
                log.push(envelope.clone());
                let _ = self.sender.send(envelope);
            }
            None => {
                // No receivers is not a failure; there is simply nobody listening yet.
                let _ = self.sender.send(envelope);
            }
        }
    }
}

/// Finished sessions whose history a hub keeps by default.
pub const DEFAULT_RETAINED_HISTORIES: usize = 64;

/// In-process broadcast channel with one fan-out per session.
///
/// # Retention
///
/// A session's channel lives from its first publish or subscribe until
/// [`close_session`](Self::close_session) (or [`Broadcaster::end_session`],
/// which the pipeline calls when a run ends). Closing drops the sender, so
/// subscribers drain what is buffered and then see
/// [`SubscriptionError::Closed`]. With history on, the closed session's log
/// moves to a bounded store of the most recent finished sessions; the oldest
/// log is evicted once the store is full.
pub struct BroadcastHub {
    capacity: usize,
    record_history: bool,
    retained_limit: usize,
    sessions: RwLock<HashMap<String, Arc<SessionChannel>>>,
    finished: Mutex<VecDeque<(String, Vec<Envelope>)>>,
}

impl BroadcastHub {
    /// Create a hub buffering up to `capacity` events per subscriber (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            record_history: false,
            retained_limit: DEFAULT_RETAINED_HISTORIES,
            sessions: RwLock::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
        }
    }

    /// Keep a full, ordered log of every event published per session (builder pattern).
    ///
    /// The log lets late observers reconstruct a run with [`BroadcastHub::history`].
    pub fn with_history(mut self) -> Self {
        self.record_history = true;
        self
    }

    /// Keep the logs of at most `limit` closed sessions (builder pattern).
    pub fn with_retained_histories(mut self, limit: usize) -> Self {
        self.retained_limit = limit;
        self
    }

    fn channel(&self, session_id: &str) -> Arc<SessionChannel> {
        {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(channel) = sessions.get(session_id) {
                return Arc::clone(channel);
            }
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(SessionChannel::new(self.capacity, self.record_history))),
        )
    }

    /// Subscribe to every topic of a session, starting from the next event published.
    pub fn subscribe(&self, session_id: &str) -> SessionSubscription {
        SessionSubscription {
            session_id: session_id.to_string(),
            receiver: self.channel(session_id).sender.subscribe(),
        }
    }

    /// Ordered log of a session's events, live or retained after close.
    /// Empty unless built [`with_history`](Self::with_history).
    pub fn history(&self, session_id: &str) -> Vec<Envelope> {
        {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(channel) = sessions.get(session_id) {
                return channel.snapshot();
            }
        }
        let finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        finished
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, log)| log.clone())
            .unwrap_or_default()
    }

    /// Drop a session's channel. Subscribers drain what is buffered, then see
    /// [`SubscriptionError::Closed`]. Its history, if any, is retained.
    pub fn close_session(&self, session_id: &str) {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        let Some(channel) = removed else {
            return;
        };
        log::debug!(
            "fanout_research::channel::close_session({}): released, {} subscriber(s) still draining",
            session_id,
            channel.sender.receiver_count()
        );
        if !self.record_history || self.retained_limit == 0 {
            return;
        }
        let log = channel.snapshot();
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        finished.retain(|(id, _)| id != session_id);
        finished.push_back((session_id.to_string(), log));
        while finished.len() > self.retained_limit {
            finished.pop_front();
        }
    }

    /// Number of sessions that currently have a live channel.
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of closed sessions whose history is still retained.
    pub fn retained_history_count(&self) -> usize {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broadcaster for BroadcastHub {
    async fn publish(&self, session_id: &str, event: StreamEvent) -> Result<(), PublishError> {
        let envelope = Envelope {
            session_id: session_id.to_string(),
            topic: event.topic(),
            event,
        };
        self.channel(session_id).send(envelope);
        Ok(())
    }

    async fn end_session(&self, session_id: &str) {
        self.close_session(session_id);
    }
}

/// Receiving side of one session's channel.
pub struct SessionSubscription {
    session_id: String,
    receiver: broadcast::Receiver<Envelope>,
}

impl SessionSubscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Result<Envelope, SubscriptionError> {
        match self.receiver.recv().await {
            Ok(envelope) => Ok(envelope),
            Err(broadcast::error::RecvError::Lagged(n)) => Err(SubscriptionError::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => Err(SubscriptionError::Closed),
        }
    }

    /// Collect every event buffered right now, skipping over lag gaps.
    ///
    /// Returns the events and the total number dropped to lag.
    pub fn drain(&mut self) -> (Vec<Envelope>, u64) {
        let mut events = Vec::new();
        let mut dropped = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => events.push(envelope),
                Err(broadcast::error::TryRecvError::Lagged(n)) => dropped += n,
                Err(_) => break,
            }
        }
        (events, dropped)
    }
}
