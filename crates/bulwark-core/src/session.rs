//! Player Session - orchestrator for one playback attempt
//!
//! Coordinates:
//! - The playback state machine driven by adapter events
//! - Buffering and fatal-error escalation timers
//! - CDN failover through the [`SourceSet`]
//! - Logical/native time conversion for every read and seek
//!
//! Nothing runs in the background. Adapter events are queued and timers are
//! deadlines; the owner drives the session with [`PlayerSession::tick`],
//! [`PlayerSession::wait`] or [`PlayerSession::step`].

use crate::{
    adapter::{
        AdapterContext, AdapterEvent, AdapterEventSink, AdapterFactory, Envelope, PlaybackAdapter,
    },
    events::{EventBus, SessionEvent, StateChange, Subscription, TimeUpdate},
    exit_seek::ExitSeekWorkaround,
    manifest::{HttpManifestLoader, ManifestLoader},
    sources::{FailoverRequest, SourceSet},
    time,
    timers::{earliest, Deadline},
    types::*,
    Error, Result,
};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

/// Stall allowance before the first frame of the session
pub const INITIAL_BUFFERING_TIMEOUT: Duration = Duration::from_millis(30_000);
/// Stall allowance once playback has started
pub const BUFFERING_TIMEOUT: Duration = Duration::from_millis(20_000);
/// Grace period for a native error to resolve itself
pub const FATAL_ERROR_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    BufferingTimeout,
    FatalError,
}

/// Player session managing a single playback
pub struct PlayerSession {
    /// Unique session ID
    id: SessionId,
    config: SessionConfig,
    window_type: WindowType,
    state: PlaybackState,
    sources: SourceSet,
    factory: Arc<dyn AdapterFactory>,
    adapter: Option<Box<dyn PlaybackAdapter>>,
    /// Bumped on every adapter load; older events are dropped
    generation: u64,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    pending: VecDeque<Envelope>,
    bus: EventBus,
    buffering_timeout: Deadline,
    fatal_error_timeout: Deadline,
    is_initial_play: bool,
    fatal_error_declared: bool,
    buffering_raised: bool,
    error_raised: bool,
    last_error: Option<MediaError>,
    pending_pause: Option<PauseTrigger>,
    /// Set once the session is fatal: whether a stall caused it
    fatal_cause: Option<bool>,
    torn_down: bool,
}

impl PlayerSession {
    /// Start a session, fetching manifests over HTTP
    pub async fn init(
        config: SessionConfig,
        window_type: WindowType,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<Self> {
        let loader = HttpManifestLoader::new(config.manifest_request_timeout())?;
        Self::init_with_loader(config, window_type, factory, Arc::new(loader)).await
    }

    /// Start a session with a custom manifest loader
    #[instrument(skip_all, fields(window_type = %window_type))]
    pub async fn init_with_loader(
        config: SessionConfig,
        window_type: WindowType,
        factory: Arc<dyn AdapterFactory>,
        loader: Arc<dyn ManifestLoader>,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::default();
        let sources = SourceSet::init(&config, window_type, loader, bus.clone()).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut session = Self {
            id: SessionId::new(),
            config,
            window_type,
            state: PlaybackState::Waiting,
            sources,
            factory,
            adapter: None,
            generation: 0,
            events_tx,
            events_rx,
            pending: VecDeque::new(),
            bus,
            buffering_timeout: Deadline::default(),
            fatal_error_timeout: Deadline::default(),
            is_initial_play: true,
            fatal_error_declared: false,
            buffering_raised: false,
            error_raised: false,
            last_error: None,
            pending_pause: None,
            fatal_cause: None,
            torn_down: false,
        };

        let start_time = session.resolve_start_position();
        session.load_adapter(start_time)?;

        info!(
            session_id = %session.id,
            cdn = ?session.sources.current_cdn(),
            start_time = ?start_time,
            "Session started"
        );

        Ok(session)
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get current state
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    /// Logical start time for the first load
    fn resolve_start_position(&self) -> Option<f64> {
        match self.config.start {
            StartPosition::Default => None,
            StartPosition::PlayerSeconds(seconds) => Some(seconds),
            StartPosition::EpochMillis(epoch_ms) => match self.sources.time().window_start_time {
                Some(window_start) => Some(time::epoch_ms_to_seekable_player_seconds(
                    epoch_ms,
                    window_start,
                )),
                None => {
                    warn!(epoch_ms, "No window start known, starting at the default position");
                    None
                }
            },
        }
    }

    /// Create an adapter for the current origin and load it at a logical time
    fn load_adapter(&mut self, start_time: Option<f64>) -> Result<()> {
        let url = self
            .sources
            .current_source()
            .map(|origin| origin.url.clone())
            .ok_or(Error::SessionTornDown)?;

        let context = AdapterContext {
            window_type: self.window_type,
            transfer_format: self.sources.transfer_format(),
            live_support: self.sources.live_support(),
            url,
            mime_type: self.config.mime_type.clone(),
        };

        let adapter = self.factory.create(&context);
        let mut adapter = ExitSeekWorkaround::wrap(adapter, &self.config.quirks, self.window_type);

        self.generation += 1;
        adapter.register_event_sink(AdapterEventSink::new(
            self.generation,
            self.events_tx.clone(),
        ));

        let correction = self.sources.time().time_correction_seconds;
        let native_start = start_time.map(|seconds| time::to_native(seconds, correction));
        adapter.load(&self.config.mime_type, native_start);

        debug!(
            generation = self.generation,
            url = %context.url,
            native_start = ?native_start,
            "Adapter loaded"
        );
        self.adapter = Some(adapter);
        Ok(())
    }

    fn tear_down_adapter(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.tear_down();
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.torn_down {
            Err(Error::SessionTornDown)
        } else {
            Ok(())
        }
    }

    /// Handle queued adapter events, then due re-admissions and timers
    pub async fn tick(&mut self) {
        if self.torn_down {
            return;
        }

        while let Some(envelope) = self.next_queued() {
            self.dispatch(envelope);
        }

        // Cooled origins come back before an escalation decides on failover
        let now = Instant::now();
        self.sources.readmit_due(now);

        if let Some(escalation) = self.take_due_escalation(now) {
            match escalation {
                Escalation::BufferingTimeout => self.on_buffering_timeout().await,
                Escalation::FatalError => self.on_fatal_error_timeout().await,
            }
        }
    }

    /// Wait until there is something for [`tick`](Self::tick) to do.
    /// Cancel-safe: a received event is kept for the next tick.
    pub async fn wait(&mut self) {
        if self.torn_down || !self.pending.is_empty() {
            return;
        }

        let deadline = self.next_deadline();
        let received = tokio::select! {
            received = self.events_rx.recv() => received,
            _ = sleep_until_optional(deadline) => None,
        };
        if let Some(envelope) = received {
            self.pending.push_back(envelope);
        }
    }

    /// Wait for work and handle it
    pub async fn step(&mut self) {
        self.wait().await;
        self.tick().await;
    }

    /// Next timer or re-admission deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        earliest([
            self.buffering_timeout.instant(),
            self.fatal_error_timeout.instant(),
            self.sources.next_readmission(),
        ])
    }

    fn next_queued(&mut self) -> Option<Envelope> {
        self.pending
            .pop_front()
            .or_else(|| self.events_rx.try_recv().ok())
    }

    /// Whichever escalation timer is due first wins; both are cancelled
    fn take_due_escalation(&mut self, now: Instant) -> Option<Escalation> {
        let escalation = match (
            self.buffering_timeout.is_due(now),
            self.fatal_error_timeout.is_due(now),
        ) {
            (true, true)
                if self.fatal_error_timeout.instant() < self.buffering_timeout.instant() =>
            {
                Escalation::FatalError
            }
            (true, _) => Escalation::BufferingTimeout,
            (false, true) => Escalation::FatalError,
            (false, false) => return None,
        };

        self.buffering_timeout.cancel();
        self.fatal_error_timeout.cancel();
        Some(escalation)
    }

    fn dispatch(&mut self, (generation, event): Envelope) {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                event = event.name(),
                "Dropping event from replaced adapter"
            );
            return;
        }
        if self.state.is_terminal() {
            debug!(event = event.name(), "Session is fatal, ignoring adapter event");
            return;
        }

        let Some(event) = self
            .adapter
            .as_mut()
            .and_then(|adapter| adapter.intercept(event))
        else {
            return;
        };

        self.handle_event(&event);

        if let Some(adapter) = self.adapter.as_mut() {
            adapter.after_dispatch(&event);
        }
    }

    fn handle_event(&mut self, event: &AdapterEvent) {
        match event {
            AdapterEvent::Playing => self.on_playing(),
            AdapterEvent::Paused => self.on_paused(),
            AdapterEvent::Waiting => self.on_waiting(),
            AdapterEvent::Ended => self.on_ended(),
            AdapterEvent::Error(error) => self.on_error(error),
            AdapterEvent::TimeUpdate => self.publish_time_update(),
            AdapterEvent::Seeking => self.bus.publish(SessionEvent::Seeking),
            AdapterEvent::Seeked => self.bus.publish(SessionEvent::Seeked),
            AdapterEvent::SeekAttempted => self.bus.publish(SessionEvent::SeekAttempted),
            AdapterEvent::SeekFinished => self.bus.publish(SessionEvent::SeekFinished),
        }
    }

    fn on_playing(&mut self) {
        self.pending_pause = None;
        self.buffering_timeout.cancel();
        self.fatal_error_timeout.cancel();
        self.clear_error_notice();
        self.clear_buffering_notice();
        self.is_initial_play = false;
        self.fatal_error_declared = false;
        self.set_state(StateChange::new(PlaybackState::Playing));
    }

    fn on_paused(&mut self) {
        let trigger = self.pending_pause.take().unwrap_or(PauseTrigger::Device);
        self.set_state(StateChange {
            pause_trigger: Some(trigger),
            ..StateChange::new(PlaybackState::Paused)
        });
    }

    fn on_waiting(&mut self) {
        self.set_state(StateChange::new(PlaybackState::Waiting));

        let timeout = if self.is_initial_play {
            INITIAL_BUFFERING_TIMEOUT
        } else {
            BUFFERING_TIMEOUT
        };
        self.buffering_timeout.arm(timeout);
        debug!(timeout_ms = timeout.as_millis() as u64, "Buffering timer started");

        if !self.buffering_raised {
            self.buffering_raised = true;
            self.bus.publish(SessionEvent::BufferingRaised);
        }
    }

    fn on_ended(&mut self) {
        self.buffering_timeout.cancel();
        self.fatal_error_timeout.cancel();
        self.clear_buffering_notice();
        self.set_state(StateChange::new(PlaybackState::Ended));
    }

    fn on_error(&mut self, error: &MediaError) {
        if self.fatal_error_declared {
            debug!(code = error.code, "Fatal error already declared, ignoring error");
            return;
        }

        warn!(code = error.code, message = %error.message, "Playback error");
        self.buffering_timeout.cancel();
        self.last_error = Some(error.clone());
        self.error_raised = true;
        self.bus.publish(SessionEvent::ErrorRaised(error.clone()));
        self.set_state(StateChange::new(PlaybackState::Waiting));

        if !self.fatal_error_timeout.is_armed() {
            self.fatal_error_timeout.arm(FATAL_ERROR_TIMEOUT);
        }
    }

    async fn on_buffering_timeout(&mut self) {
        if self.state != PlaybackState::Waiting {
            return;
        }
        warn!(initial_play = self.is_initial_play, "Buffering timed out");
        self.clear_buffering_notice();
        self.attempt_failover(true).await;
    }

    async fn on_fatal_error_timeout(&mut self) {
        warn!(error = ?self.last_error, "Playback error did not resolve");
        self.fatal_error_declared = true;
        self.attempt_failover(false).await;
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    async fn attempt_failover(&mut self, is_buffering_timeout_error: bool) {
        let old_window_start = self.sources.time().window_start_time;
        let current_time = self.current_time();
        let duration = self.duration();

        let request = match (is_buffering_timeout_error, &self.last_error) {
            (false, Some(error)) => FailoverRequest::playback_error(error, current_time, duration),
            (false, None) => FailoverRequest::playback_error(
                &MediaError::new(0, "unknown playback error"),
                current_time,
                duration,
            ),
            (true, _) => FailoverRequest::buffering_timeout(current_time, duration),
        };

        if let Err(error) = self.sources.failover(&request).await {
            self.enter_fatal_error(is_buffering_timeout_error, &error);
            return;
        }

        let then_pause = self.is_paused();
        self.tear_down_adapter();

        let new_window_start = self.sources.time().window_start_time;
        let start_time = current_time.map(|seconds| {
            time::rebase_player_seconds(seconds, old_window_start, new_window_start)
        });

        if let Err(error) = self.load_adapter(start_time) {
            self.enter_fatal_error(is_buffering_timeout_error, &error);
            return;
        }
        if then_pause {
            self.pending_pause = Some(PauseTrigger::App);
            if let Some(adapter) = self.adapter.as_mut() {
                adapter.pause(PauseOptions::app());
            }
        }

        info!(
            cdn = ?self.sources.current_cdn(),
            start_time = ?start_time,
            "Resumed on next origin"
        );
        self.set_state(StateChange::new(PlaybackState::Waiting));
    }

    fn enter_fatal_error(&mut self, is_buffering_timeout_error: bool, cause: &Error) {
        warn!(error = %cause, is_buffering_timeout_error, "Session is fatal");
        self.buffering_timeout.cancel();
        self.fatal_error_timeout.cancel();
        self.fatal_cause = Some(is_buffering_timeout_error);
        self.set_state(StateChange {
            is_buffering_timeout_error: Some(is_buffering_timeout_error),
            ..StateChange::new(PlaybackState::FatalError)
        });
    }

    fn set_state(&mut self, change: StateChange) {
        if change.state == self.state && change.state != PlaybackState::Paused {
            return;
        }
        info!(from = %self.state, to = %change.state, "State transition");
        self.state = change.state;
        self.bus.publish(SessionEvent::StateChanged(change));
    }

    fn clear_buffering_notice(&mut self) {
        if self.buffering_raised {
            self.buffering_raised = false;
            self.bus.publish(SessionEvent::BufferingCleared);
        }
    }

    fn clear_error_notice(&mut self) {
        if self.error_raised {
            self.error_raised = false;
            self.bus.publish(SessionEvent::ErrorCleared);
        }
    }

    fn publish_time_update(&self) {
        self.bus.publish(SessionEvent::TimeUpdate(TimeUpdate {
            current_time: self.current_time(),
            seekable_range: self.seekable_range(),
            duration: self.duration(),
        }));
    }

    /// Seek to logical seconds.
    ///
    /// Live windows that cannot describe themselves get a manifest refresh
    /// first; the requested time is moved onto the refreshed window.
    #[instrument(skip(self))]
    pub async fn set_current_time(&mut self, seconds: f64) -> Result<()> {
        self.ensure_active()?;

        let mut target = seconds;
        if self.sources.requires_manifest_reload() {
            let old_window_start = self.sources.time().window_start_time;
            match self.sources.refresh().await {
                Ok(()) => {
                    target = time::rebase_player_seconds(
                        seconds,
                        old_window_start,
                        self.sources.time().window_start_time,
                    );
                }
                Err(error) => warn!(error = %error, "Manifest refresh before seek failed"),
            }

            if self.sources.live_support() == LiveSupport::Restartable {
                let then_pause = self.is_paused();
                self.tear_down_adapter();
                self.load_adapter(Some(target))?;
                if then_pause {
                    self.pause(PauseOptions::app())?;
                }
                self.set_state(StateChange::new(PlaybackState::Waiting));
                return Ok(());
            }
        }

        let native = time::to_native(target, self.sources.time().time_correction_seconds);
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.set_current_time(native);
        }
        Ok(())
    }

    /// Logical current time, `None` before playback started
    pub fn current_time(&self) -> Option<f64> {
        let correction = self.sources.time().time_correction_seconds;
        self.adapter
            .as_ref()
            .and_then(|adapter| adapter.current_time())
            .map(|seconds| time::to_logical(seconds, correction))
    }

    /// Logical seekable range
    pub fn seekable_range(&self) -> SeekableRange {
        let correction = self.sources.time().time_correction_seconds;
        let native = self
            .adapter
            .as_ref()
            .map(|adapter| adapter.seekable_range())
            .unwrap_or_default();
        SeekableRange::new(
            time::to_logical(native.start, correction),
            time::to_logical(native.end, correction),
        )
    }

    pub fn duration(&self) -> f64 {
        self.adapter.as_ref().map_or(0.0, |adapter| adapter.duration())
    }

    pub fn play(&mut self) -> Result<()> {
        self.ensure_active()?;
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.play();
        }
        Ok(())
    }

    pub fn pause(&mut self, options: PauseOptions) -> Result<()> {
        self.ensure_active()?;
        self.pending_pause = Some(if options.user_pause {
            PauseTrigger::User
        } else {
            PauseTrigger::App
        });
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.pause(options);
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.adapter.as_ref().is_some_and(|adapter| adapter.is_paused())
    }

    pub fn is_ended(&self) -> bool {
        self.state == PlaybackState::Ended
    }

    /// Why the session became fatal, if it has
    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal_cause.map(|stalled| {
            if stalled {
                Error::PlaybackStalled
            } else {
                let error = self.last_error.clone().unwrap_or_default();
                Error::Playback {
                    code: error.code,
                    message: error.message,
                }
            }
        })
    }

    pub fn register_for_state_changes(&self) -> Subscription<StateChange> {
        self.bus.state_changes()
    }

    pub fn register_for_time_updates(&self) -> Subscription<TimeUpdate> {
        self.bus.time_updates()
    }

    /// Every notice, including failovers and seek progress
    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn player_element(&self) -> Option<&dyn Any> {
        self.adapter.as_ref().and_then(|adapter| adapter.player_element())
    }

    pub fn failover_subtitles(&mut self, status_code: Option<u16>) -> Result<()> {
        self.ensure_active()?;
        self.sources.failover_subtitles(status_code)
    }

    pub fn current_subtitles_source(&self) -> Option<&str> {
        self.sources.current_subtitles_source()
    }

    pub fn current_subtitles_cdn(&self) -> Option<&str> {
        self.sources.current_subtitles_cdn()
    }

    pub fn current_subtitles_segment_length(&self) -> Option<f64> {
        self.sources.current_subtitles_segment_length()
    }

    pub fn subtitles_request_timeout(&self) -> Duration {
        self.sources.subtitles_request_timeout()
    }

    pub fn current_source(&self) -> Option<&str> {
        self.sources.current_source().map(|origin| origin.url.as_str())
    }

    pub fn current_cdn(&self) -> Option<&str> {
        self.sources.current_cdn()
    }

    pub fn available_cdns(&self) -> Vec<String> {
        self.sources.available_cdns()
    }

    /// Current live window
    pub fn window(&self) -> WindowDescriptor {
        self.sources.time()
    }

    /// Epoch milliseconds to seekable logical seconds in the current window
    pub fn convert_epoch_ms_to_player_seconds(&self, epoch_ms: i64) -> Option<f64> {
        self.sources
            .time()
            .window_start_time
            .map(|start| time::epoch_ms_to_seekable_player_seconds(epoch_ms, start))
    }

    pub fn convert_player_seconds_to_epoch_ms(&self, seconds: f64) -> Option<i64> {
        time::player_seconds_to_epoch_ms(seconds, self.sources.time().window_start_time)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release the adapter, cancel every timer and forget all origins.
    /// Further events and re-admissions are dropped.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn tear_down(&mut self) {
        if self.torn_down {
            return;
        }
        self.buffering_timeout.cancel();
        self.fatal_error_timeout.cancel();
        self.tear_down_adapter();
        self.sources.tear_down();
        self.pending.clear();
        self.events_rx.close();
        self.torn_down = true;
        info!("Session torn down");
    }
}

async fn sleep_until_optional(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{SimulatedCall, SimulatedFactory, SimulatedHandle, StaticManifestLoader};

    const NOW: i64 = 1_700_000_600_000;

    fn two_origins() -> SessionConfig {
        SessionConfig::new(vec![
            Origin::new("https://cdn1.example.com/vod.mpd", "cdn1"),
            Origin::new("https://cdn2.example.com/vod.mpd", "cdn2"),
        ])
    }

    async fn start(
        config: SessionConfig,
        window_type: WindowType,
    ) -> (PlayerSession, SimulatedHandle) {
        start_with_loader(config, window_type, StaticManifestLoader::new(NOW)).await
    }

    async fn start_with_loader(
        config: SessionConfig,
        window_type: WindowType,
        loader: StaticManifestLoader,
    ) -> (PlayerSession, SimulatedHandle) {
        let (factory, handle) = SimulatedFactory::new();
        let session = PlayerSession::init_with_loader(
            config,
            window_type,
            Arc::new(factory),
            Arc::new(loader),
        )
        .await
        .unwrap();
        (session, handle)
    }

    fn failovers(events: &mut Subscription<SessionEvent>) -> usize {
        events
            .drain()
            .iter()
            .filter(|event| matches!(event, SessionEvent::CdnFailover(_)))
            .count()
    }

    async fn advance(session: &mut PlayerSession, millis: u64) {
        tokio::time::advance(Duration::from_millis(millis)).await;
        session.tick().await;
    }

    #[tokio::test]
    async fn test_init_rejects_empty_origins() {
        let (factory, _handle) = SimulatedFactory::new();
        let result = PlayerSession::init_with_loader(
            SessionConfig::default(),
            WindowType::Fixed,
            Arc::new(factory),
            Arc::new(StaticManifestLoader::new(NOW)),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_init_loads_adapter_waiting() {
        let (session, handle) = start(two_origins(), WindowType::Fixed).await;

        assert_eq!(session.state(), PlaybackState::Waiting);
        assert_eq!(handle.loads(), vec![None]);
        assert_eq!(handle.contexts()[0].url, "https://cdn1.example.com/vod.mpd");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_buffering_timeout_fails_over_once() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut events = session.subscribe();

        handle.emit(AdapterEvent::Waiting);
        session.tick().await;

        advance(&mut session, 29_999).await;
        assert_eq!(failovers(&mut events), 0);
        assert_eq!(session.current_cdn(), Some("cdn1"));

        advance(&mut session, 1).await;
        assert_eq!(failovers(&mut events), 1);
        assert_eq!(session.current_cdn(), Some("cdn2"));
        assert_eq!(handle.players_created(), 2);
        assert_eq!(session.state(), PlaybackState::Waiting);

        advance(&mut session, 60_000).await;
        assert_eq!(failovers(&mut events), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_buffering_uses_shorter_timeout() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut events = session.subscribe();

        handle.emit(AdapterEvent::Playing);
        handle.emit(AdapterEvent::Waiting);
        session.tick().await;

        advance(&mut session, 20_000).await;
        assert_eq!(failovers(&mut events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_cancels_timers_and_clears_notices() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut events = session.subscribe();

        handle.emit(AdapterEvent::Waiting);
        session.tick().await;
        handle.emit(AdapterEvent::Playing);
        session.tick().await;
        advance(&mut session, 60_000).await;

        let events = events.drain();
        assert!(events.contains(&SessionEvent::BufferingRaised));
        assert!(events.contains(&SessionEvent::BufferingCleared));
        assert!(!events.iter().any(|event| matches!(event, SessionEvent::CdnFailover(_))));
        assert_eq!(session.state(), PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_escalates_after_grace_period() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut events = session.subscribe();

        handle.emit_error(MediaError::new(3, "decode failed"));
        session.tick().await;
        handle.emit_error(MediaError::new(3, "decode failed"));
        session.tick().await;

        advance(&mut session, 4_999).await;
        assert_eq!(failovers(&mut events), 0);

        advance(&mut session, 1).await;
        let notices = events.drain();
        let failover = notices
            .iter()
            .find_map(|event| match event {
                SessionEvent::CdnFailover(failover) => Some(failover.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!failover.is_buffering_timeout_error);
        assert_eq!(failover.error_code, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_cancels_buffering_timer() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut events = session.subscribe();

        handle.emit(AdapterEvent::Waiting);
        handle.emit_error(MediaError::new(2, "network"));
        session.tick().await;

        advance(&mut session, 5_000).await;
        advance(&mut session, 30_000).await;
        assert_eq!(failovers(&mut events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_buffering_race_fails_over_once() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut events = session.subscribe();

        // both escalation timers armed: fatal at 5s, buffering at 30s
        handle.emit_error(MediaError::new(2, "network"));
        handle.emit(AdapterEvent::Waiting);
        session.tick().await;
        assert_eq!(session.next_deadline(), Some(Instant::now() + FATAL_ERROR_TIMEOUT));

        advance(&mut session, 4_999).await;
        assert_eq!(failovers(&mut events), 0);
        advance(&mut session, 1).await;
        assert_eq!(failovers(&mut events), 1);

        advance(&mut session, 15_000).await;
        assert_eq!(failovers(&mut events), 0);
        advance(&mut session, 10_000).await;
        assert_eq!(failovers(&mut events), 0);
        assert_eq!(session.current_cdn(), Some("cdn2"));
        assert_eq!(session.state(), PlaybackState::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readmitted_origin_available_to_same_tick_escalation() {
        let config = SessionConfig {
            failover_reset_time_ms: 10_000,
            ..two_origins()
        };
        let (mut session, handle) = start(config, WindowType::Fixed).await;
        let mut events = session.subscribe();

        handle.emit(AdapterEvent::Waiting);
        session.tick().await;
        advance(&mut session, 30_000).await;
        assert_eq!(session.current_cdn(), Some("cdn2"));

        // cdn1 is due back at 40s, the next stall escalates at 50s
        handle.emit(AdapterEvent::Playing);
        handle.emit(AdapterEvent::Waiting);
        session.tick().await;
        tokio::time::advance(Duration::from_millis(25_000)).await;
        session.tick().await;

        assert_eq!(failovers(&mut events), 2);
        assert_eq!(session.state(), PlaybackState::Waiting);
        assert_eq!(session.current_cdn(), Some("cdn1"));
        assert_eq!(session.available_cdns(), vec!["cdn1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_fatal_and_terminal() {
        let config =
            SessionConfig::new(vec![Origin::new("https://cdn1.example.com/vod.mpd", "cdn1")]);
        let (mut session, handle) = start(config, WindowType::Fixed).await;
        let mut states = session.register_for_state_changes();

        handle.emit(AdapterEvent::Waiting);
        session.tick().await;
        advance(&mut session, 30_000).await;

        assert_eq!(session.state(), PlaybackState::FatalError);
        let fatal = states.drain().pop().unwrap();
        assert_eq!(fatal.state, PlaybackState::FatalError);
        assert_eq!(fatal.is_buffering_timeout_error, Some(true));
        assert!(matches!(session.fatal_error(), Some(Error::PlaybackStalled)));

        handle.emit(AdapterEvent::Playing);
        session.tick().await;
        assert_eq!(session.state(), PlaybackState::FatalError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_near_end_is_fatal() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        handle.set_duration(100.0);
        handle.emit(AdapterEvent::Playing);
        handle.time_update(96.0);
        handle.emit(AdapterEvent::Waiting);
        session.tick().await;

        advance(&mut session, 20_000).await;
        assert_eq!(session.state(), PlaybackState::FatalError);
        assert_eq!(session.available_cdns(), vec!["cdn1", "cdn2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_resumes_at_current_time_and_repauses() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        handle.set_duration(600.0);
        handle.emit(AdapterEvent::Playing);
        handle.time_update(42.0);
        session.tick().await;

        session.pause(PauseOptions::default()).unwrap();
        handle.emit(AdapterEvent::Waiting);
        session.tick().await;
        advance(&mut session, 20_000).await;

        assert_eq!(handle.loads(), vec![None, Some(42.0)]);
        let calls = handle.calls();
        assert_eq!(calls.last(), Some(&SimulatedCall::Pause));
        assert!(calls.contains(&SimulatedCall::TearDown));
    }

    #[tokio::test]
    async fn test_pause_triggers() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut states = session.register_for_state_changes();

        session.pause(PauseOptions::default()).unwrap();
        handle.emit(AdapterEvent::Paused);
        session.tick().await;
        session.pause(PauseOptions::app()).unwrap();
        handle.emit(AdapterEvent::Paused);
        session.tick().await;
        handle.emit(AdapterEvent::Paused);
        session.tick().await;

        let triggers: Vec<_> = states
            .drain()
            .into_iter()
            .map(|change| change.pause_trigger)
            .collect();
        assert_eq!(
            triggers,
            vec![
                Some(PauseTrigger::User),
                Some(PauseTrigger::App),
                Some(PauseTrigger::Device)
            ]
        );
        assert!(session.is_paused());
    }

    #[tokio::test]
    async fn test_unanswered_pause_does_not_label_later_device_pause() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        let mut states = session.register_for_state_changes();

        handle.emit(AdapterEvent::Paused);
        session.tick().await;
        // already paused, so the player never answers with a Paused event
        session.pause(PauseOptions::default()).unwrap();
        handle.emit(AdapterEvent::Playing);
        handle.emit(AdapterEvent::Paused);
        session.tick().await;

        let triggers: Vec<_> = states
            .drain()
            .into_iter()
            .filter_map(|change| change.pause_trigger)
            .collect();
        assert_eq!(triggers, vec![PauseTrigger::Device, PauseTrigger::Device]);
    }

    #[tokio::test]
    async fn test_time_update_is_logical() {
        let mpd = r#"<MPD type="dynamic" availabilityStartTime="2023-11-14T22:13:20Z" timeShiftBufferDepth="PT2M"></MPD>"#;
        let loader =
            StaticManifestLoader::new(NOW).with_manifest("https://cdn1.example.com/live.mpd", mpd);
        let config =
            SessionConfig::new(vec![Origin::new("https://cdn1.example.com/live.mpd", "cdn1")]);
        let (mut session, handle) = start_with_loader(config, WindowType::Sliding, loader).await;
        let mut times = session.register_for_time_updates();

        assert_eq!(session.window().time_correction_seconds, 480.0);
        handle.set_seekable_range(SeekableRange::new(480.0, 600.0));
        handle.time_update(500.0);
        session.tick().await;

        let update = times.try_recv().unwrap();
        assert_eq!(update.current_time, Some(20.0));
        assert_eq!(update.seekable_range, SeekableRange::new(0.0, 120.0));

        session.set_current_time(30.0).await.unwrap();
        assert_eq!(handle.calls().last(), Some(&SimulatedCall::Seek(510.0)));
    }

    #[tokio::test]
    async fn test_epoch_start_position() {
        let mpd = r#"<MPD type="dynamic" availabilityStartTime="2023-11-14T22:13:20Z" timeShiftBufferDepth="PT2M"></MPD>"#;
        let loader =
            StaticManifestLoader::new(NOW).with_manifest("https://cdn1.example.com/live.mpd", mpd);
        let config = SessionConfig {
            start: StartPosition::EpochMillis(1_700_000_500_000),
            ..SessionConfig::new(vec![Origin::new("https://cdn1.example.com/live.mpd", "cdn1")])
        };
        let (session, handle) = start_with_loader(config, WindowType::Sliding, loader).await;

        // window starts at 1_700_000_480_000; 20s in, plus the 480s correction
        assert_eq!(handle.loads(), vec![Some(500.0)]);
        assert_eq!(session.convert_player_seconds_to_epoch_ms(20.0), Some(1_700_000_500_000));
    }

    #[tokio::test]
    async fn test_seek_on_hls_live_refreshes_window() {
        let playlist = |pdt: &str| {
            format!("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PROGRAM-DATE-TIME:{pdt}\n#EXTINF:4.0,\na.ts\n#EXTINF:4.0,\nb.ts\n")
        };
        let loader = Arc::new(
            StaticManifestLoader::new(NOW).with_manifest(
                "https://cdn1.example.com/live.m3u8",
                playlist("2023-11-14T22:13:20Z"),
            ),
        );
        let config = SessionConfig {
            mime_type: "application/vnd.apple.mpegurl".into(),
            ..SessionConfig::new(vec![Origin::new("https://cdn1.example.com/live.m3u8", "cdn1")])
        };
        let (factory, handle) = SimulatedFactory::new();
        let mut session = PlayerSession::init_with_loader(
            config,
            WindowType::Sliding,
            Arc::new(factory),
            loader.clone(),
        )
        .await
        .unwrap();

        // the window moved on by ten seconds
        loader.set_manifest("https://cdn1.example.com/live.m3u8", playlist("2023-11-14T22:13:30Z"));
        session.set_current_time(25.0).await.unwrap();

        assert_eq!(handle.calls().last(), Some(&SimulatedCall::Seek(15.0)));
        assert_eq!(session.window().window_start_time, Some(1_700_000_010_000));
    }

    #[tokio::test]
    async fn test_seek_on_restartable_tier_reloads() {
        let loader = Arc::new(StaticManifestLoader::new(NOW).with_manifest(
            "https://cdn1.example.com/live.m3u8",
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PROGRAM-DATE-TIME:2023-11-14T22:13:20Z\n#EXTINF:4.0,\na.ts\n",
        ));
        let config = SessionConfig {
            live_support: LiveSupport::Restartable,
            ..SessionConfig::new(vec![Origin::new("https://cdn1.example.com/live.m3u8", "cdn1")])
        };
        let (factory, handle) = SimulatedFactory::new();
        let mut session =
            PlayerSession::init_with_loader(config, WindowType::Growing, Arc::new(factory), loader)
                .await
                .unwrap();

        session.set_current_time(12.0).await.unwrap();
        assert_eq!(handle.loads(), vec![None, Some(12.0)]);
        assert_eq!(handle.players_created(), 2);
    }

    #[tokio::test]
    async fn test_stale_adapter_events_dropped() {
        let loader = Arc::new(StaticManifestLoader::new(NOW).with_manifest(
            "https://cdn1.example.com/live.m3u8",
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PROGRAM-DATE-TIME:2023-11-14T22:13:20Z\n#EXTINF:4.0,\na.ts\n",
        ));
        let config = SessionConfig {
            live_support: LiveSupport::Restartable,
            ..SessionConfig::new(vec![Origin::new("https://cdn1.example.com/live.m3u8", "cdn1")])
        };
        let (factory, handle) = SimulatedFactory::new();
        let mut session =
            PlayerSession::init_with_loader(config, WindowType::Growing, Arc::new(factory), loader)
                .await
                .unwrap();

        // queued by the first player, handled after it was replaced
        handle.emit(AdapterEvent::Playing);
        session.set_current_time(12.0).await.unwrap();
        session.tick().await;

        assert_eq!(session.state(), PlaybackState::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tear_down_stops_everything() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;
        handle.emit(AdapterEvent::Waiting);
        session.tick().await;

        session.tear_down();
        session.tear_down();
        assert!(session.next_deadline().is_none());
        assert!(handle.calls().contains(&SimulatedCall::TearDown));
        assert!(matches!(session.play(), Err(Error::SessionTornDown)));

        handle.emit(AdapterEvent::Playing);
        advance(&mut session, 60_000).await;
        assert_eq!(session.state(), PlaybackState::Waiting);
        assert_eq!(handle.players_created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_wakes_for_events_and_timers() {
        let (mut session, handle) = start(two_origins(), WindowType::Fixed).await;

        handle.emit(AdapterEvent::Waiting);
        session.step().await;
        assert!(session.next_deadline().is_some());

        // nothing queued: sleeps until the buffering deadline
        session.step().await;
        assert_eq!(session.current_cdn(), Some("cdn2"));
    }

    #[tokio::test]
    async fn test_subtitles_failover_through_session() {
        let config = SessionConfig {
            subtitles: vec![SubtitleOrigin::new("https://subs1.example.com/en.xml", "subs1")],
            ..two_origins()
        };
        let (mut session, _handle) = start(config, WindowType::Fixed).await;

        assert_eq!(session.subtitles_request_timeout(), Duration::from_millis(5_000));
        assert!(matches!(
            session.failover_subtitles(Some(404)),
            Err(Error::SubtitlesExhausted { .. })
        ));
        assert_eq!(session.current_subtitles_cdn(), Some("subs1"));
    }
}
