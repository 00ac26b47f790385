//! Exit-seek workaround
//!
//! Some devices ignore a pause issued right after a seek, and some live
//! streams raise a spurious error while a seek is landing. This adapter
//! decorator defers the pause until the reported time reaches the seek
//! target, and turns the spurious error into a reset-and-reload.

use crate::adapter::{AdapterEvent, AdapterEventSink, PlaybackAdapter};
use crate::types::*;
use std::any::Any;
use tracing::{debug, warn};

/// How close (in seconds) the reported time must be to the seek target
/// before the seek counts as landed
pub const EXIT_SEEK_TOLERANCE_SECONDS: f64 = 30.0;

/// State of the seek in flight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSeekContext {
    pub exiting_seek: bool,
    /// Native seconds the seek was issued for
    pub target_seek_time: f64,
    pub pause_on_exit_seek: bool,
}

/// Decorates an adapter with the exit-seek workaround
pub struct ExitSeekWorkaround {
    inner: Box<dyn PlaybackAdapter>,
    delay_pause: bool,
    restart_on_error: bool,
    context: Option<ExitSeekContext>,
    mime_type: String,
}

impl ExitSeekWorkaround {
    /// Whether the device quirks call for the workaround on this window
    pub fn applies(quirks: &DeviceQuirks, window_type: WindowType) -> bool {
        quirks.delay_pause_on_exit_seek
            || (quirks.restart_on_exit_seek_error && window_type.is_live())
    }

    pub fn new(
        inner: Box<dyn PlaybackAdapter>,
        quirks: &DeviceQuirks,
        window_type: WindowType,
    ) -> Self {
        Self {
            inner,
            delay_pause: quirks.delay_pause_on_exit_seek,
            restart_on_error: quirks.restart_on_exit_seek_error && window_type.is_live(),
            context: None,
            mime_type: String::new(),
        }
    }

    /// Wrap `adapter` when the quirks apply, otherwise hand it back untouched
    pub fn wrap(
        adapter: Box<dyn PlaybackAdapter>,
        quirks: &DeviceQuirks,
        window_type: WindowType,
    ) -> Box<dyn PlaybackAdapter> {
        if Self::applies(quirks, window_type) {
            Box::new(Self::new(adapter, quirks, window_type))
        } else {
            adapter
        }
    }

    pub fn context(&self) -> Option<&ExitSeekContext> {
        self.context.as_ref()
    }

    fn is_exiting_seek(&self) -> bool {
        self.context.is_some_and(|context| context.exiting_seek)
    }

    fn check_seek_landed(&mut self) {
        let Some(context) = self.context else {
            return;
        };
        let Some(now) = self.inner.current_time() else {
            return;
        };

        let reference = self.inner.seekable_range().start.max(context.target_seek_time);
        if (now - reference).abs() > EXIT_SEEK_TOLERANCE_SECONDS {
            return;
        }

        debug!(now, target = context.target_seek_time, "Exit seek landed");
        self.context = None;
        if context.pause_on_exit_seek && self.delay_pause {
            self.inner.pause(PauseOptions::default());
        }
    }
}

impl PlaybackAdapter for ExitSeekWorkaround {
    fn load(&mut self, mime_type: &str, start_time: Option<f64>) {
        self.mime_type = mime_type.to_string();
        self.context = None;
        self.inner.load(mime_type, start_time);
    }

    fn play(&mut self) {
        if let Some(context) = self.context.as_mut() {
            context.pause_on_exit_seek = false;
        }
        self.inner.play();
    }

    fn pause(&mut self, options: PauseOptions) {
        if self.delay_pause && self.is_exiting_seek() {
            if let Some(context) = self.context.as_mut() {
                context.pause_on_exit_seek = true;
            }
            debug!("Pause deferred until seek lands");
            return;
        }
        self.inner.pause(options);
    }

    fn set_current_time(&mut self, seconds: f64) {
        let pause_on_exit_seek = self.inner.is_paused();
        self.context = Some(ExitSeekContext {
            exiting_seek: true,
            target_seek_time: seconds,
            pause_on_exit_seek,
        });

        self.inner.set_current_time(seconds);

        if pause_on_exit_seek && !self.delay_pause {
            self.inner.pause(PauseOptions::default());
        }
    }

    fn reset(&mut self) {
        self.context = None;
        self.inner.reset();
    }

    fn current_time(&self) -> Option<f64> {
        self.inner.current_time()
    }

    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn seekable_range(&self) -> SeekableRange {
        self.inner.seekable_range()
    }

    fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    fn player_element(&self) -> Option<&dyn Any> {
        self.inner.player_element()
    }

    fn register_event_sink(&mut self, sink: AdapterEventSink) {
        self.inner.register_event_sink(sink);
    }

    fn tear_down(&mut self) {
        self.context = None;
        self.inner.tear_down();
    }

    fn intercept(&mut self, event: AdapterEvent) -> Option<AdapterEvent> {
        let event = self.inner.intercept(event)?;

        match event {
            AdapterEvent::Error(error) if self.restart_on_error && self.is_exiting_seek() => {
                // the player already reports the seek position; the target covers one that doesn't
                let resume_at = self
                    .inner
                    .current_time()
                    .or_else(|| self.context.map(|context| context.target_seek_time));
                warn!(
                    code = error.code,
                    message = %error.message,
                    resume_at = ?resume_at,
                    "Error while exiting seek, restarting playback"
                );

                self.context = None;
                self.inner.reset();
                self.inner.load(&self.mime_type, resume_at);
                None
            }
            other => Some(other),
        }
    }

    fn after_dispatch(&mut self, event: &AdapterEvent) {
        self.inner.after_dispatch(event);

        if *event == AdapterEvent::TimeUpdate && self.is_exiting_seek() {
            self.check_seek_landed();
        }
    }
}
