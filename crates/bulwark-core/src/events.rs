//! Session notices and subscriptions
//!
//! Every observer gets its own receiver on a broadcast channel. Dropping a
//! [`Subscription`] unsubscribes it.

use crate::types::*;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// A state transition as seen by observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub state: PlaybackState,
    /// Set on transitions into `Paused`
    pub pause_trigger: Option<PauseTrigger>,
    /// Set on transitions into `FatalError`: was the cause a stall timeout
    pub is_buffering_timeout_error: Option<bool>,
}

impl StateChange {
    pub fn new(state: PlaybackState) -> Self {
        Self {
            state,
            pause_trigger: None,
            is_buffering_timeout_error: None,
        }
    }
}

/// Logical playback position, published on every adapter time update
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeUpdate {
    pub current_time: Option<f64>,
    pub seekable_range: SeekableRange,
    pub duration: f64,
}

/// Severity of a failover notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recovered by switching origin
    Warning,
    /// Nothing left to switch to
    Error,
}

/// The media origin was switched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CdnFailover {
    pub old_cdn: String,
    pub new_cdn: String,
    pub is_buffering_timeout_error: bool,
    pub error_code: Option<i32>,
}

/// A subtitles origin failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitlesFailover {
    pub status_code: Option<u16>,
    pub severity: Severity,
    pub cdn: String,
    pub new_cdn: Option<String>,
}

/// Everything a session tells its observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged(StateChange),
    TimeUpdate(TimeUpdate),
    BufferingRaised,
    BufferingCleared,
    ErrorRaised(MediaError),
    ErrorCleared,
    CdnFailover(CdnFailover),
    SubtitlesFailover(SubtitlesFailover),
    Seeking,
    Seeked,
    SeekAttempted,
    SeekFinished,
}

/// Event bus shared by the session and its source set
///
/// `publish()` never blocks; with no subscribers the event is dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        Subscription::new(self.tx.subscribe(), Some)
    }

    pub fn state_changes(&self) -> Subscription<StateChange> {
        Subscription::new(self.tx.subscribe(), |event| match event {
            SessionEvent::StateChanged(change) => Some(change),
            _ => None,
        })
    }

    pub fn time_updates(&self) -> Subscription<TimeUpdate> {
        Subscription::new(self.tx.subscribe(), |event| match event {
            SessionEvent::TimeUpdate(update) => Some(update),
            _ => None,
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A filtered view of the session's events
#[derive(Debug)]
pub struct Subscription<T> {
    rx: broadcast::Receiver<SessionEvent>,
    select: fn(SessionEvent) -> Option<T>,
}

impl<T> Subscription<T> {
    fn new(rx: broadcast::Receiver<SessionEvent>, select: fn(SessionEvent) -> Option<T>) -> Self {
        Self { rx, select }
    }

    /// Wait for the next matching event; `None` once the session is gone
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(item) = (self.select)(event) {
                        return Some(item);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already delivered, without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(item) = (self.select)(event) {
                        return Some(item);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Everything matching that has been delivered so far
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
