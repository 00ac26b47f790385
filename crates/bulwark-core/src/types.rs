//! Core types for Bulwark

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One candidate content origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Manifest or media URL
    pub url: String,
    /// CDN label reported to observers
    pub cdn: String,
}

impl Origin {
    pub fn new(url: impl Into<String>, cdn: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cdn: cdn.into(),
        }
    }
}

/// One candidate subtitles origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleOrigin {
    pub url: String,
    pub cdn: String,
    /// Segment length in seconds for segmented subtitles
    #[serde(default)]
    pub segment_length: Option<f64>,
}

impl SubtitleOrigin {
    pub fn new(url: impl Into<String>, cdn: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cdn: cdn.into(),
            segment_length: None,
        }
    }

    pub fn with_segment_length(mut self, seconds: f64) -> Self {
        self.segment_length = Some(seconds);
        self
    }
}

/// Shape of the playable time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// On-demand, bounded duration
    Fixed,
    /// Live, bounded lookback that moves forward
    Sliding,
    /// Live, lookback start fixed, end extends
    Growing,
}

impl WindowType {
    pub fn is_live(&self) -> bool {
        !matches!(self, WindowType::Fixed)
    }
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowType::Fixed => write!(f, "fixed"),
            WindowType::Sliding => write!(f, "sliding"),
            WindowType::Growing => write!(f, "growing"),
        }
    }
}

/// Live playback capability tier of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveSupport {
    None,
    Playable,
    Restartable,
    #[default]
    Seekable,
}

impl LiveSupport {
    /// Whether live playback at this tier depends on knowing the window bounds
    pub fn requires_manifest_load(&self) -> bool {
        match self {
            LiveSupport::Seekable => true,
            LiveSupport::Restartable => true,
            LiveSupport::Playable => false,
            LiveSupport::None => false,
        }
    }
}

/// Streaming transfer format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFormat {
    Dash,
    Hls,
}

impl TransferFormat {
    /// DASH players learn the live window from the MPD themselves; HLS players
    /// need it handed over after every origin change.
    pub fn describes_live_window(&self) -> bool {
        matches!(self, TransferFormat::Dash)
    }
}

impl std::fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferFormat::Dash => write!(f, "dash"),
            TransferFormat::Hls => write!(f, "hls"),
        }
    }
}

/// Logical playback state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Waiting,
    Playing,
    Paused,
    Ended,
    FatalError,
}

impl PlaybackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::FatalError)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Waiting => write!(f, "waiting"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Ended => write!(f, "ended"),
            PlaybackState::FatalError => write!(f, "fatal_error"),
        }
    }
}

/// Who caused a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseTrigger {
    User,
    App,
    Device,
}

/// Options for pausing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseOptions {
    /// Ask the adapter not to auto-resume at the start of a live window
    #[serde(default)]
    pub disable_auto_resume: bool,
    /// `false` marks the pause as app-initiated
    #[serde(default = "default_true")]
    pub user_pause: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PauseOptions {
    fn default() -> Self {
        Self {
            disable_auto_resume: false,
            user_pause: true,
        }
    }
}

impl PauseOptions {
    pub fn app() -> Self {
        Self {
            user_pause: false,
            ..Default::default()
        }
    }
}

/// Seekable range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SeekableRange {
    pub start: f64,
    pub end: f64,
}

impl SeekableRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Live window bounds discovered from a manifest
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowDescriptor {
    /// Epoch milliseconds of the window start, `None` when unknown
    pub window_start_time: Option<i64>,
    /// Epoch milliseconds of the window end, `None` when unknown
    pub window_end_time: Option<i64>,
    /// Native player clock minus the logical timeline, in seconds
    pub time_correction_seconds: f64,
}

/// Error reported by a native adapter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaError {
    pub code: i32,
    pub message: String,
    /// Location of the failing request as reported by the player, if any
    #[serde(default)]
    pub service_location: Option<String>,
}

impl MediaError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            service_location: None,
        }
    }

    pub fn with_service_location(mut self, location: impl Into<String>) -> Self {
        self.service_location = Some(location.into());
        self
    }
}

/// Device quirks that switch on the exit-seek workaround
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceQuirks {
    /// Pausing right after a seek is ignored; defer it until the seek lands
    #[serde(default)]
    pub delay_pause_on_exit_seek: bool,
    /// Live streams raise a spurious error right after a seek; restart instead
    #[serde(default)]
    pub restart_on_exit_seek_error: bool,
}

/// Where playback starts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StartPosition {
    /// Start of content for fixed windows, live edge otherwise
    #[default]
    Default,
    /// Seconds on the logical player timeline
    PlayerSeconds(f64),
    /// Wall-clock time, converted through the current window
    EpochMillis(i64),
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Media origins in priority order
    pub media: Vec<Origin>,
    /// Subtitle origins in priority order
    pub subtitles: Vec<SubtitleOrigin>,
    /// Mime type handed to the adapter on load
    pub mime_type: String,
    /// Live playback capability of the device
    pub live_support: LiveSupport,
    /// Device quirks
    pub quirks: DeviceQuirks,
    /// Where playback starts
    pub start: StartPosition,
    /// Subtitles request timeout in milliseconds
    pub subtitles_request_timeout_ms: u64,
    /// Cooldown before a failed-over origin is re-admitted, in milliseconds
    pub failover_reset_time_ms: u64,
    /// Manifest request timeout in milliseconds
    pub manifest_request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            media: Vec::new(),
            subtitles: Vec::new(),
            mime_type: "application/dash+xml".to_string(),
            live_support: LiveSupport::default(),
            quirks: DeviceQuirks::default(),
            start: StartPosition::Default,
            subtitles_request_timeout_ms: 5_000,
            failover_reset_time_ms: 120_000,
            manifest_request_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given media origins
    pub fn new(media: Vec<Origin>) -> Self {
        Self {
            media,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants a session relies on
    pub fn validate(&self) -> Result<()> {
        if self.media.is_empty() {
            return Err(Error::InvalidConfig("media origin list is empty".into()));
        }
        if let Some(origin) = self.media.iter().find(|o| o.url.is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "media origin for cdn '{}' has an empty url",
                origin.cdn
            )));
        }
        Ok(())
    }

    pub fn subtitles_request_timeout(&self) -> Duration {
        Duration::from_millis(self.subtitles_request_timeout_ms)
    }

    pub fn failover_reset_time(&self) -> Duration {
        Duration::from_millis(self.failover_reset_time_ms)
    }

    pub fn manifest_request_timeout(&self) -> Duration {
        Duration::from_millis(self.manifest_request_timeout_ms)
    }
}
