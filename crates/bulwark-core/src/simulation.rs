//! Scripted players and manifests
//!
//! [`SimulatedPlayer`] stands in for a native player: it records every call
//! and only emits the events it is told to. [`StaticManifestLoader`] serves
//! manifests from memory. [`Scenario`] drives a whole session from a script.

use crate::{
    adapter::{AdapterContext, AdapterEvent, AdapterEventSink, AdapterFactory, PlaybackAdapter},
    events::{SessionEvent, Subscription},
    manifest::{parse_manifest, LoadedManifest, ManifestLoader, ParsedManifest},
    session::PlayerSession,
    types::*,
    Error, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use url::Url;

/// A call made on a simulated player
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedCall {
    Load {
        mime_type: String,
        start_time: Option<f64>,
    },
    Play,
    Pause,
    Seek(f64),
    Reset,
    TearDown,
}

#[derive(Debug, Default)]
struct SimulatedState {
    calls: Vec<SimulatedCall>,
    current_time: Option<f64>,
    duration: f64,
    seekable_range: SeekableRange,
    paused: bool,
    players_created: usize,
    contexts: Vec<AdapterContext>,
    sink: Option<AdapterEventSink>,
}

/// Shared view of every simulated player created through one handle
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit an event through the most recently registered player
    pub fn emit(&self, event: AdapterEvent) {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => sink.emit(event),
            None => debug!(event = event.name(), "No player registered, event dropped"),
        }
    }

    pub fn emit_error(&self, error: MediaError) {
        self.emit(AdapterEvent::Error(error));
    }

    /// Move the playhead and emit a time update
    pub fn time_update(&self, native_seconds: f64) {
        self.set_current_time(Some(native_seconds));
        self.emit(AdapterEvent::TimeUpdate);
    }

    pub fn set_current_time(&self, seconds: Option<f64>) {
        self.lock().current_time = seconds;
    }

    pub fn set_duration(&self, seconds: f64) {
        self.lock().duration = seconds;
    }

    pub fn set_seekable_range(&self, range: SeekableRange) {
        self.lock().seekable_range = range;
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn calls(&self) -> Vec<SimulatedCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Start times of every load, in order
    pub fn loads(&self) -> Vec<Option<f64>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                SimulatedCall::Load { start_time, .. } => Some(*start_time),
                _ => None,
            })
            .collect()
    }

    pub fn players_created(&self) -> usize {
        self.lock().players_created
    }

    /// Contexts handed to the factory, in order
    pub fn contexts(&self) -> Vec<AdapterContext> {
        self.lock().contexts.clone()
    }
}

/// A native player that does only what it is told
pub struct SimulatedPlayer {
    handle: SimulatedHandle,
}

impl SimulatedPlayer {
    pub fn new() -> (Self, SimulatedHandle) {
        let handle = SimulatedHandle::default();
        (Self::with_handle(handle.clone()), handle)
    }

    pub fn with_handle(handle: SimulatedHandle) -> Self {
        handle.lock().players_created += 1;
        Self { handle }
    }

    fn record(&self, call: SimulatedCall) {
        self.handle.lock().calls.push(call);
    }
}

impl PlaybackAdapter for SimulatedPlayer {
    fn load(&mut self, mime_type: &str, start_time: Option<f64>) {
        self.record(SimulatedCall::Load {
            mime_type: mime_type.to_string(),
            start_time,
        });
        let mut state = self.handle.lock();
        state.current_time = start_time;
        state.paused = false;
    }

    fn play(&mut self) {
        self.record(SimulatedCall::Play);
        self.handle.lock().paused = false;
    }

    fn pause(&mut self, _options: PauseOptions) {
        self.record(SimulatedCall::Pause);
        self.handle.lock().paused = true;
    }

    fn set_current_time(&mut self, seconds: f64) {
        self.record(SimulatedCall::Seek(seconds));
        self.handle.lock().current_time = Some(seconds);
    }

    fn reset(&mut self) {
        self.record(SimulatedCall::Reset);
        self.handle.lock().current_time = None;
    }

    fn current_time(&self) -> Option<f64> {
        self.handle.lock().current_time
    }

    fn duration(&self) -> f64 {
        self.handle.lock().duration
    }

    fn seekable_range(&self) -> SeekableRange {
        self.handle.lock().seekable_range
    }

    fn is_paused(&self) -> bool {
        self.handle.lock().paused
    }

    fn register_event_sink(&mut self, sink: AdapterEventSink) {
        self.handle.lock().sink = Some(sink);
    }

    fn tear_down(&mut self) {
        self.record(SimulatedCall::TearDown);
    }
}

/// Builds [`SimulatedPlayer`]s that all report to one handle
#[derive(Debug, Clone, Default)]
pub struct SimulatedFactory {
    handle: SimulatedHandle,
}

impl SimulatedFactory {
    pub fn new() -> (Self, SimulatedHandle) {
        let handle = SimulatedHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl AdapterFactory for SimulatedFactory {
    fn create(&self, context: &AdapterContext) -> Box<dyn PlaybackAdapter> {
        self.handle.lock().contexts.push(context.clone());
        Box::new(SimulatedPlayer::with_handle(self.handle.clone()))
    }
}

/// Serves manifests from memory. Unknown URLs fail to load.
#[derive(Debug, Default)]
pub struct StaticManifestLoader {
    manifests: Mutex<HashMap<String, String>>,
    now_ms: AtomicI64,
    loaded: Mutex<Vec<String>>,
}

impl StaticManifestLoader {
    /// `now_ms` is the wall clock the manifests are evaluated against
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
            ..Default::default()
        }
    }

    pub fn with_manifest(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.set_manifest(url, body);
        self
    }

    pub fn set_manifest(&self, url: impl Into<String>, body: impl Into<String>) {
        self.manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), body.into());
    }

    pub fn remove_manifest(&self, url: &str) {
        self.manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    pub fn set_now_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Every URL a load was attempted for, in order
    pub fn loaded_urls(&self) -> Vec<String> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fetch(&self, url: &Url) -> Result<String> {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        self.manifests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Error::ManifestFetch(format!("{url}: HTTP 404 Not Found")))
    }
}

#[async_trait]
impl ManifestLoader for StaticManifestLoader {
    async fn load(&self, url: &str, window_type: WindowType) -> Result<LoadedManifest> {
        let url = Url::parse(url)?;
        let now_ms = self.now_ms.load(Ordering::SeqCst);

        match parse_manifest(&url, &self.fetch(&url)?, now_ms, window_type)? {
            ParsedManifest::Window(loaded) => Ok(loaded),
            ParsedManifest::FollowVariant(variant) => {
                match parse_manifest(&variant, &self.fetch(&variant)?, now_ms, window_type)? {
                    ParsedManifest::Window(loaded) => Ok(loaded),
                    ParsedManifest::FollowVariant(_) => Err(Error::ManifestParse(
                        "variant playlist is itself a master playlist".into(),
                    )),
                }
            }
        }
    }
}

/// One scripted action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// The player reports it is playing
    Playing,
    /// The player reports it paused
    Paused,
    /// The player reports it is buffering
    Waiting,
    Ended,
    Error {
        code: i32,
        message: String,
        #[serde(default)]
        service_location: Option<String>,
    },
    /// The playhead moved to `current_time` native seconds
    TimeUpdate { current_time: f64 },
    /// The application calls `play`
    Play,
    /// The application calls `pause`
    Pause {
        #[serde(default)]
        options: PauseOptions,
    },
    /// The application seeks to logical seconds
    Seek { seconds: f64 },
    /// The subtitles request failed
    SubtitlesError {
        #[serde(default)]
        status_code: Option<u16>,
    },
}

/// An action at a point in time, relative to session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

/// A scripted session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub config: SessionConfig,
    pub window_type: WindowType,
    /// Manifest bodies by URL
    #[serde(default)]
    pub manifests: HashMap<String, String>,
    /// Wall clock the manifests are evaluated against, epoch milliseconds
    #[serde(default)]
    pub now_ms: i64,
    /// Content duration reported by the player
    #[serde(default)]
    pub duration: f64,
    pub steps: Vec<ScenarioStep>,
    /// Keep running this long after the last step
    #[serde(default)]
    pub run_for_ms: u64,
}

/// A notice and when it was published
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// What happened during a scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub events: Vec<TimedEvent>,
    pub final_state: PlaybackState,
    pub current_cdn: Option<String>,
    pub available_cdns: Vec<String>,
    pub players_created: usize,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.config.validate()?;
        Ok(scenario)
    }

    /// Run the script. With a paused tokio clock this completes instantly.
    pub async fn run(self) -> Result<ScenarioReport> {
        let started = Instant::now();
        let (factory, handle) = SimulatedFactory::new();
        handle.set_duration(self.duration);

        let loader = StaticManifestLoader::new(self.now_ms);
        for (url, body) in self.manifests {
            loader.set_manifest(url, body);
        }

        let mut session = PlayerSession::init_with_loader(
            self.config,
            self.window_type,
            Arc::new(factory),
            Arc::new(loader),
        )
        .await?;
        let mut recorder = Recorder::new(&session, started);

        let mut last_ms = 0;
        for step in self.steps {
            let due = started + Duration::from_millis(step.at_ms);
            drive_until(&mut session, &mut recorder, due).await;
            apply(&mut session, &handle, step.action).await;
            session.tick().await;
            recorder.collect();
            last_ms = step.at_ms;
        }
        drive_until(
            &mut session,
            &mut recorder,
            started + Duration::from_millis(last_ms + self.run_for_ms),
        )
        .await;

        let report = ScenarioReport {
            events: recorder.events,
            final_state: session.state(),
            current_cdn: session.current_cdn().map(str::to_string),
            available_cdns: session.available_cdns(),
            players_created: handle.players_created(),
        };
        session.tear_down();
        Ok(report)
    }
}

struct Recorder {
    subscription: Subscription<SessionEvent>,
    started: Instant,
    events: Vec<TimedEvent>,
}

impl Recorder {
    fn new(session: &PlayerSession, started: Instant) -> Self {
        Self {
            subscription: session.subscribe(),
            started,
            events: Vec::new(),
        }
    }

    fn collect(&mut self) {
        let at_ms = Instant::now().duration_since(self.started).as_millis() as u64;
        for event in self.subscription.drain() {
            self.events.push(TimedEvent { at_ms, event });
        }
    }
}

async fn drive_until(session: &mut PlayerSession, recorder: &mut Recorder, until: Instant) {
    loop {
        match session.next_deadline() {
            Some(deadline) if deadline <= until => {
                sleep_until(deadline).await;
                session.tick().await;
                recorder.collect();
            }
            _ => {
                sleep_until(until).await;
                session.tick().await;
                recorder.collect();
                return;
            }
        }
    }
}

async fn apply(session: &mut PlayerSession, handle: &SimulatedHandle, action: ScenarioAction) {
    match action {
        ScenarioAction::Playing => handle.emit(AdapterEvent::Playing),
        ScenarioAction::Paused => handle.emit(AdapterEvent::Paused),
        ScenarioAction::Waiting => handle.emit(AdapterEvent::Waiting),
        ScenarioAction::Ended => handle.emit(AdapterEvent::Ended),
        ScenarioAction::Error {
            code,
            message,
            service_location,
        } => {
            let mut error = MediaError::new(code, message);
            error.service_location = service_location;
            handle.emit_error(error);
        }
        ScenarioAction::TimeUpdate { current_time } => handle.time_update(current_time),
        ScenarioAction::Play => {
            if let Err(error) = session.play() {
                debug!(error = %error, "Scripted play rejected");
            }
        }
        ScenarioAction::Pause { options } => {
            if let Err(error) = session.pause(options) {
                debug!(error = %error, "Scripted pause rejected");
            }
        }
        ScenarioAction::Seek { seconds } => {
            if let Err(error) = session.set_current_time(seconds).await {
                debug!(error = %error, "Scripted seek rejected");
            }
        }
        ScenarioAction::SubtitlesError { status_code } => {
            if let Err(error) = session.failover_subtitles(status_code) {
                debug!(error = %error, "Subtitles exhausted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_records_calls() {
        let (mut player, handle) = SimulatedPlayer::new();
        player.load("video/mp4", Some(3.0));
        player.pause(PauseOptions::default());
        player.set_current_time(9.0);

        assert_eq!(
            handle.calls(),
            vec![
                SimulatedCall::Load {
                    mime_type: "video/mp4".into(),
                    start_time: Some(3.0),
                },
                SimulatedCall::Pause,
                SimulatedCall::Seek(9.0),
            ]
        );
        assert!(player.is_paused());
        assert_eq!(player.current_time(), Some(9.0));
        assert_eq!(handle.players_created(), 1);
    }

    #[tokio::test]
    async fn test_static_loader_follows_variant() {
        let loader = StaticManifestLoader::new(0)
            .with_manifest(
                "https://cdn1.example.com/live/master.m3u8",
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow.m3u8\n",
            )
            .with_manifest(
                "https://cdn1.example.com/live/low.m3u8",
                "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-PROGRAM-DATE-TIME:2023-11-14T22:13:20Z\n#EXTINF:4.0,\na.ts\n",
            );

        let loaded = loader
            .load("https://cdn1.example.com/live/master.m3u8", WindowType::Sliding)
            .await
            .unwrap();

        assert_eq!(loaded.transfer_format, TransferFormat::Hls);
        assert_eq!(loaded.window.window_start_time, Some(1_700_000_000_000));
        assert_eq!(loader.loaded_urls().len(), 2);
    }

    #[test]
    fn test_static_loader_unknown_url() {
        let loader = StaticManifestLoader::new(0);
        let result = tokio_test::block_on(
            loader.load("https://cdn1.example.com/missing.mpd", WindowType::Sliding),
        );
        assert!(matches!(result, Err(Error::ManifestFetch(_))));
        assert_eq!(loader.loaded_urls(), vec!["https://cdn1.example.com/missing.mpd"]);
    }

    #[test]
    fn test_scenario_parses() {
        let json = r#"{
            "config": { "media": [{ "url": "https://cdn1.example.com/a.mpd", "cdn": "cdn1" }] },
            "window_type": "fixed",
            "steps": [
                { "at_ms": 0, "action": "waiting" },
                { "at_ms": 100, "action": "time_update", "current_time": 4.5 },
                { "at_ms": 200, "action": "pause", "options": { "user_pause": false } }
            ]
        }"#;
        let scenario = Scenario::from_json(json).unwrap();
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(
            scenario.steps[1].action,
            ScenarioAction::TimeUpdate { current_time: 4.5 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_stall_fails_over() {
        let scenario = Scenario {
            config: SessionConfig::new(vec![
                Origin::new("https://cdn1.example.com/a.mpd", "cdn1"),
                Origin::new("https://cdn2.example.com/a.mpd", "cdn2"),
            ]),
            window_type: WindowType::Fixed,
            manifests: HashMap::new(),
            now_ms: 0,
            duration: 600.0,
            steps: vec![ScenarioStep {
                at_ms: 0,
                action: ScenarioAction::Waiting,
            }],
            run_for_ms: 31_000,
        };

        let report = scenario.run().await.unwrap();

        assert_eq!(report.current_cdn.as_deref(), Some("cdn2"));
        assert_eq!(report.players_created, 2);
        let failover = report
            .events
            .iter()
            .find(|timed| matches!(timed.event, SessionEvent::CdnFailover(_)))
            .unwrap();
        assert_eq!(failover.at_ms, 30_000);
    }
}
