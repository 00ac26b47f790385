//! Manifest loading for live window discovery
//!
//! Only the fields the session consumes are read: the transfer format and
//! the live window bounds (plus the DASH clock correction).

mod dash;
mod hls;

pub use dash::{parse_iso8601_duration, parse_mpd};
pub use hls::{parse_playlist, HlsPlaylist};

use crate::{Error, Result, TransferFormat, WindowDescriptor, WindowType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Result of loading a manifest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedManifest {
    pub transfer_format: TransferFormat,
    pub window: WindowDescriptor,
}

/// Trait for manifest loaders
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    /// Load the manifest at `url` and derive its live window
    async fn load(&self, url: &str, window_type: WindowType) -> Result<LoadedManifest>;
}

/// Detect the transfer format from URL or content
pub fn detect_transfer_format(url: &Url, content: Option<&str>) -> TransferFormat {
    // Check URL extension first
    let path = url.path().to_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return TransferFormat::Hls;
    }
    if path.ends_with(".mpd") {
        return TransferFormat::Dash;
    }

    // Check content if available
    if let Some(content) = content {
        if content.contains("#EXTM3U") {
            return TransferFormat::Hls;
        }
        if content.contains("<MPD") || content.contains("urn:mpeg:dash") {
            return TransferFormat::Dash;
        }
    }

    // Default to HLS
    TransferFormat::Hls
}

/// Outcome of parsing one manifest document
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedManifest {
    /// The document carried the window
    Window(LoadedManifest),
    /// HLS master playlist; the window lives in this variant playlist
    FollowVariant(Url),
}

/// Parse a fetched manifest document
pub fn parse_manifest(
    url: &Url,
    content: &str,
    now_ms: i64,
    window_type: WindowType,
) -> Result<ParsedManifest> {
    match detect_transfer_format(url, Some(content)) {
        TransferFormat::Dash => Ok(ParsedManifest::Window(LoadedManifest {
            transfer_format: TransferFormat::Dash,
            window: parse_mpd(content, now_ms, window_type)?,
        })),
        TransferFormat::Hls => match parse_playlist(content, url)? {
            HlsPlaylist::Media(window) => Ok(ParsedManifest::Window(LoadedManifest {
                transfer_format: TransferFormat::Hls,
                window,
            })),
            HlsPlaylist::Master { variant } => Ok(ParsedManifest::FollowVariant(variant)),
        },
    }
}

/// Manifest loader over HTTP
pub struct HttpManifestLoader {
    client: Client,
}

impl HttpManifestLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Fetch a manifest body along with the server's notion of "now"
    async fn fetch(&self, url: &Url) -> Result<(String, i64)> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::ManifestFetch(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::ManifestFetch(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        // Device clocks drift; prefer the server's Date header
        let now_ms = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let body = response
            .text()
            .await
            .map_err(|e| Error::ManifestFetch(format!("{url}: {e}")))?;

        debug!(url = %url, bytes = body.len(), "Manifest fetched");

        Ok((body, now_ms))
    }
}

#[async_trait]
impl ManifestLoader for HttpManifestLoader {
    #[instrument(skip(self))]
    async fn load(&self, url: &str, window_type: WindowType) -> Result<LoadedManifest> {
        let url = Url::parse(url)?;
        let (body, now_ms) = self.fetch(&url).await?;

        match parse_manifest(&url, &body, now_ms, window_type)? {
            ParsedManifest::Window(loaded) => Ok(loaded),
            ParsedManifest::FollowVariant(variant) => {
                debug!(variant = %variant, "Following first variant playlist");
                let (body, now_ms) = self.fetch(&variant).await?;
                match parse_manifest(&variant, &body, now_ms, window_type)? {
                    ParsedManifest::Window(loaded) => Ok(loaded),
                    ParsedManifest::FollowVariant(_) => Err(Error::ManifestParse(
                        "variant playlist is itself a master playlist".into(),
                    )),
                }
            }
        }
    }
}
