//! Source-set failover manager
//!
//! Owns the ordered media and subtitle origins. The head of each list is the
//! origin in use. Failed-over media origins cool down and are re-admitted at
//! the tail.

use crate::{
    error::ExhaustionReason,
    events::{CdnFailover, EventBus, SessionEvent, Severity, SubtitlesFailover},
    manifest::ManifestLoader,
    types::*,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// A fixed-window stall this close to the end is treated as completion
pub const END_OF_CONTENT_GRACE_SECONDS: f64 = 5.0;

/// What went wrong, as handed to [`SourceSet::failover`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverRequest {
    pub is_buffering_timeout_error: Option<bool>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
    /// Logical current time, `None` before playback started
    #[serde(default)]
    pub current_time: Option<f64>,
    #[serde(default)]
    pub duration: f64,
    /// Location of the failing request as reported by the player
    #[serde(default)]
    pub service_location: Option<String>,
}

impl FailoverRequest {
    /// A stall that outlived the buffering timeout
    pub fn buffering_timeout(current_time: Option<f64>, duration: f64) -> Self {
        Self {
            is_buffering_timeout_error: Some(true),
            error_message: Some("buffering-time-out".into()),
            current_time,
            duration,
            ..Default::default()
        }
    }

    /// A native error that outlived the grace period
    pub fn playback_error(error: &MediaError, current_time: Option<f64>, duration: f64) -> Self {
        Self {
            is_buffering_timeout_error: Some(false),
            error_message: Some(error.message.clone()),
            error_code: Some(error.code),
            current_time,
            duration,
            service_location: error.service_location.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.error_message.is_none() {
            return Err(Error::InvalidFailoverDescriptor("missing error message".into()));
        }
        if self.is_buffering_timeout_error.is_none() {
            return Err(Error::InvalidFailoverDescriptor(
                "missing buffering timeout flag".into(),
            ));
        }
        Ok(())
    }

    fn is_near_end(&self) -> bool {
        self.duration > 0.0
            && self
                .current_time
                .is_some_and(|time| time > self.duration - END_OF_CONTENT_GRACE_SECONDS)
    }
}

#[derive(Debug, Clone)]
struct FailedOverOrigin {
    origin: Origin,
    readmit_at: Instant,
}

/// Ordered media and subtitle origins with failover policy
pub struct SourceSet {
    media: VecDeque<Origin>,
    subtitles: VecDeque<SubtitleOrigin>,
    failed_over: Vec<FailedOverOrigin>,
    window_type: WindowType,
    live_support: LiveSupport,
    transfer_format: Option<TransferFormat>,
    window: WindowDescriptor,
    loader: Arc<dyn ManifestLoader>,
    failover_reset_time: Duration,
    subtitles_request_timeout: Duration,
    bus: EventBus,
    torn_down: bool,
}

impl SourceSet {
    /// Build the source set, discovering the live window first when the
    /// topology and device need it
    #[instrument(skip_all, fields(window_type = %window_type))]
    pub async fn init(
        config: &SessionConfig,
        window_type: WindowType,
        loader: Arc<dyn ManifestLoader>,
        bus: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let mut sources = Self {
            media: config.media.iter().cloned().collect(),
            subtitles: config.subtitles.iter().cloned().collect(),
            failed_over: Vec::new(),
            window_type,
            live_support: config.live_support,
            transfer_format: None,
            window: WindowDescriptor::default(),
            loader,
            failover_reset_time: config.failover_reset_time(),
            subtitles_request_timeout: config.subtitles_request_timeout(),
            bus,
            torn_down: false,
        };

        if sources.requires_manifest_reload() {
            sources.load_initial_manifest().await?;
        }

        info!(
            origins = sources.media.len(),
            subtitles = sources.subtitles.len(),
            transfer_format = ?sources.transfer_format,
            "Source set ready"
        );

        Ok(sources)
    }

    /// Whether switching origin (or seeking) needs the manifest fetched again.
    /// DASH describes its own window, so only the initial discovery loads it.
    pub fn requires_manifest_reload(&self) -> bool {
        self.window_type.is_live()
            && self.live_support.requires_manifest_load()
            && !self
                .transfer_format
                .is_some_and(|format| format.describes_live_window())
    }

    async fn load_initial_manifest(&mut self) -> Result<()> {
        loop {
            match self.load_manifest().await {
                Ok(()) => return Ok(()),
                Err(error) if self.has_sources_to_failover_to() => {
                    warn!(
                        error = %error,
                        cdn = ?self.current_cdn(),
                        "Initial manifest failed, trying next origin"
                    );
                    self.shift_current(false, None);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn load_manifest(&mut self) -> Result<()> {
        let url = self
            .current_source()
            .map(|origin| origin.url.clone())
            .ok_or(Error::exhausted(ExhaustionReason::NoRemainingOrigins))?;

        let loaded = self.loader.load(&url, self.window_type).await?;
        self.transfer_format = Some(loaded.transfer_format);
        self.window = loaded.window;

        debug!(
            url = %url,
            transfer_format = %loaded.transfer_format,
            window_start = ?loaded.window.window_start_time,
            window_end = ?loaded.window.window_end_time,
            correction = loaded.window.time_correction_seconds,
            "Manifest loaded"
        );

        Ok(())
    }

    /// Switch to the next media origin if the request warrants it.
    ///
    /// `Ok` means playback should reload from the new head; any error means
    /// there is nothing to switch to for this request.
    #[instrument(skip(self), fields(cdn = ?self.current_cdn()))]
    pub async fn failover(&mut self, request: &FailoverRequest) -> Result<()> {
        if self.torn_down {
            return Err(Error::exhausted(ExhaustionReason::TornDown));
        }
        if request
            .service_location
            .as_deref()
            .is_some_and(|location| self.is_first_manifest(location))
        {
            debug!("Service location is the current origin, not failing over");
            return Err(Error::exhausted(ExhaustionReason::FirstManifest));
        }
        request.validate()?;
        if !self.has_sources_to_failover_to() {
            return Err(Error::exhausted(ExhaustionReason::NoRemainingOrigins));
        }
        if self.window_type == WindowType::Fixed && request.is_near_end() {
            debug!(
                current_time = ?request.current_time,
                duration = request.duration,
                "Near end of content, not failing over"
            );
            return Err(Error::exhausted(ExhaustionReason::NearEndOfContent));
        }

        let is_stall = request.is_buffering_timeout_error.unwrap_or(false);
        loop {
            self.shift_current(is_stall, request.error_code);

            if !self.requires_manifest_reload() {
                return Ok(());
            }
            match self.load_manifest().await {
                Ok(()) => return Ok(()),
                Err(error) if self.has_sources_to_failover_to() => {
                    warn!(
                        error = %error,
                        cdn = ?self.current_cdn(),
                        "Manifest failed after failover, trying next origin"
                    );
                }
                Err(error) => {
                    warn!(error = %error, "Manifest failed on the last origin");
                    return Err(Error::exhausted(ExhaustionReason::ManifestUnavailable));
                }
            }
        }
    }

    /// Move the head into cooldown and announce the new head
    fn shift_current(&mut self, is_buffering_timeout_error: bool, error_code: Option<i32>) {
        let Some(failed) = self.media.pop_front() else {
            return;
        };
        let new_cdn = self
            .current_cdn()
            .map(str::to_string)
            .unwrap_or_default();

        info!(
            old_cdn = %failed.cdn,
            new_cdn = %new_cdn,
            is_buffering_timeout_error,
            "CDN failover"
        );

        self.bus.publish(SessionEvent::CdnFailover(CdnFailover {
            old_cdn: failed.cdn.clone(),
            new_cdn,
            is_buffering_timeout_error,
            error_code,
        }));

        self.failed_over.push(FailedOverOrigin {
            origin: failed,
            readmit_at: Instant::now() + self.failover_reset_time,
        });
    }

    /// Append every origin whose cooldown has elapsed to the tail.
    /// Returns how many were re-admitted.
    pub fn readmit_due(&mut self, now: Instant) -> usize {
        if self.torn_down {
            return 0;
        }
        let (due, cooling): (Vec<_>, Vec<_>) = std::mem::take(&mut self.failed_over)
            .into_iter()
            .partition(|failed| failed.readmit_at <= now);
        self.failed_over = cooling;

        let count = due.len();
        for failed in due {
            info!(cdn = %failed.origin.cdn, "Origin re-admitted after cooldown");
            self.media.push_back(failed.origin);
        }
        count
    }

    /// When the next cooling origin is due back
    pub fn next_readmission(&self) -> Option<Instant> {
        self.failed_over.iter().map(|failed| failed.readmit_at).min()
    }

    /// Drop the failing subtitles origin if another one remains
    #[instrument(skip(self))]
    pub fn failover_subtitles(&mut self, status_code: Option<u16>) -> Result<()> {
        if self.subtitles.len() > 1 {
            if let Some(failed) = self.subtitles.pop_front() {
                let new_cdn = self.current_subtitles_cdn().map(str::to_string);
                info!(cdn = %failed.cdn, new_cdn = ?new_cdn, "Subtitles failover");
                self.bus.publish(SessionEvent::SubtitlesFailover(SubtitlesFailover {
                    status_code,
                    severity: Severity::Warning,
                    cdn: failed.cdn,
                    new_cdn,
                }));
            }
            Ok(())
        } else {
            warn!(cdn = ?self.current_subtitles_cdn(), "No subtitles origin left to fail over to");
            self.bus.publish(SessionEvent::SubtitlesFailover(SubtitlesFailover {
                status_code,
                severity: Severity::Error,
                cdn: self
                    .current_subtitles_cdn()
                    .map(str::to_string)
                    .unwrap_or_default(),
                new_cdn: None,
            }));
            Err(Error::SubtitlesExhausted { status_code })
        }
    }

    /// Fetch the current origin's manifest again for fresh window bounds
    pub async fn refresh(&mut self) -> Result<()> {
        if self.torn_down {
            return Err(Error::SessionTornDown);
        }
        self.load_manifest().await
    }

    /// The failing location is the origin already in use (typically the
    /// very first manifest request); switching would not help
    fn is_first_manifest(&self, service_location: &str) -> bool {
        self.current_source()
            .is_some_and(|origin| hosts_match(service_location, &origin.url))
    }

    fn has_sources_to_failover_to(&self) -> bool {
        self.media.len() > 1
    }

    pub fn time(&self) -> WindowDescriptor {
        self.window
    }

    pub fn transfer_format(&self) -> Option<TransferFormat> {
        self.transfer_format
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn live_support(&self) -> LiveSupport {
        self.live_support
    }

    pub fn current_source(&self) -> Option<&Origin> {
        self.media.front()
    }

    pub fn current_cdn(&self) -> Option<&str> {
        self.media.front().map(|origin| origin.cdn.as_str())
    }

    pub fn available_sources(&self) -> Vec<String> {
        self.media.iter().map(|origin| origin.url.clone()).collect()
    }

    pub fn available_cdns(&self) -> Vec<String> {
        self.media.iter().map(|origin| origin.cdn.clone()).collect()
    }

    /// CDNs currently cooling down, in failover order
    pub fn cooling_cdns(&self) -> Vec<String> {
        self.failed_over
            .iter()
            .map(|failed| failed.origin.cdn.clone())
            .collect()
    }

    pub fn current_subtitles_source(&self) -> Option<&str> {
        self.subtitles.front().map(|origin| origin.url.as_str())
    }

    pub fn current_subtitles_cdn(&self) -> Option<&str> {
        self.subtitles.front().map(|origin| origin.cdn.as_str())
    }

    pub fn current_subtitles_segment_length(&self) -> Option<f64> {
        self.subtitles.front().and_then(|origin| origin.segment_length)
    }

    pub fn subtitles_request_timeout(&self) -> Duration {
        self.subtitles_request_timeout
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Forget every origin and pending re-admission
    pub fn tear_down(&mut self) {
        self.media.clear();
        self.subtitles.clear();
        self.failed_over.clear();
        self.window = WindowDescriptor::default();
        self.torn_down = true;
    }
}

/// Compare the hosts of two URLs, ignoring path, query and fragment.
/// Strings that do not parse as URLs with a host are compared whole.
pub fn hosts_match(first: &str, second: &str) -> bool {
    let first = strip_query_and_fragment(first);
    let second = strip_query_and_fragment(second);

    match (host_of(first), host_of(second)) {
        (Some(a), Some(b)) => a == b,
        _ => first == second,
    }
}

fn strip_query_and_fragment(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
