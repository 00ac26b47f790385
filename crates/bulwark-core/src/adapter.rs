//! Playback adapter seam
//!
//! An adapter wraps one native player (a media element, a streaming engine,
//! a vendor plugin). The session owns it; the adapter only holds an
//! [`AdapterEventSink`] to report what the native player does.
//!
//! Adapters may emit events from inside any of their methods. Events are
//! queued and handled after the call returns, never re-entrantly.

use crate::types::*;
use std::any::Any;
use tokio::sync::mpsc;

/// Events surfaced by an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Playing,
    Paused,
    Waiting,
    Seeking,
    Seeked,
    Ended,
    Error(MediaError),
    TimeUpdate,
    SeekAttempted,
    SeekFinished,
}

impl AdapterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AdapterEvent::Playing => "playing",
            AdapterEvent::Paused => "paused",
            AdapterEvent::Waiting => "waiting",
            AdapterEvent::Seeking => "seeking",
            AdapterEvent::Seeked => "seeked",
            AdapterEvent::Ended => "ended",
            AdapterEvent::Error(_) => "error",
            AdapterEvent::TimeUpdate => "time_update",
            AdapterEvent::SeekAttempted => "seek_attempted",
            AdapterEvent::SeekFinished => "seek_finished",
        }
    }
}

/// Generation-tagged event envelope
pub(crate) type Envelope = (u64, AdapterEvent);

/// Where an adapter reports its events
///
/// Each adapter instance gets a sink bound to its own generation; once the
/// session replaces or tears down that adapter, its events are dropped.
#[derive(Debug, Clone)]
pub struct AdapterEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl AdapterEventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Report an event; silently ignored once the session is gone
    pub fn emit(&self, event: AdapterEvent) {
        let _ = self.tx.send((self.generation, event));
    }

    pub fn emit_error(&self, error: MediaError) {
        self.emit(AdapterEvent::Error(error));
    }

    /// False once the owning session has been torn down
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Capability set of a native player
pub trait PlaybackAdapter: Send {
    /// Load media, optionally starting at `start_time` (native seconds).
    /// `None` means the default position: start of content or live edge.
    fn load(&mut self, mime_type: &str, start_time: Option<f64>);

    fn play(&mut self);

    fn pause(&mut self, options: PauseOptions);

    /// Seek to native seconds
    fn set_current_time(&mut self, seconds: f64);

    /// Unload media, keeping the adapter usable for another `load`
    fn reset(&mut self);

    /// Native current time, `None` before playback has started
    fn current_time(&self) -> Option<f64>;

    fn duration(&self) -> f64;

    fn seekable_range(&self) -> SeekableRange;

    fn is_paused(&self) -> bool;

    /// Handle to the native element, if the adapter exposes one
    fn player_element(&self) -> Option<&dyn Any> {
        None
    }

    /// Stands in for event, error and time-update callback registration
    fn register_event_sink(&mut self, sink: AdapterEventSink);

    /// Release the native player; the adapter is not used afterwards
    fn tear_down(&mut self);

    /// Inspect an event before the session sees it. Returning `None`
    /// swallows the event.
    fn intercept(&mut self, event: AdapterEvent) -> Option<AdapterEvent> {
        Some(event)
    }

    /// Called after the session has handled and published `event`
    fn after_dispatch(&mut self, _event: &AdapterEvent) {}
}

/// What a factory needs to know to build an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterContext {
    pub window_type: WindowType,
    pub transfer_format: Option<TransferFormat>,
    pub live_support: LiveSupport,
    /// URL of the origin currently at the head of the media list
    pub url: String,
    pub mime_type: String,
}

/// Creates adapters for a session; chosen once by the caller's environment
/// detection and handed to [`crate::PlayerSession::init`].
pub trait AdapterFactory: Send + Sync {
    fn create(&self, context: &AdapterContext) -> Box<dyn PlaybackAdapter>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&AdapterContext) -> Box<dyn PlaybackAdapter> + Send + Sync,
{
    fn create(&self, context: &AdapterContext) -> Box<dyn PlaybackAdapter> {
        self(context)
    }
}
