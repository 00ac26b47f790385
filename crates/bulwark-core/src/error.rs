//! Error types for Bulwark Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a failover request was routed to the exhaustion path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Fewer than two origins remain
    NoRemainingOrigins,
    /// The failing service location is the origin already in use
    FirstManifest,
    /// Fixed window, playback within the end-of-content grace period
    NearEndOfContent,
    /// Every remaining origin failed to deliver a manifest
    ManifestUnavailable,
    /// The source set has been torn down
    TornDown,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionReason::NoRemainingOrigins => write!(f, "no remaining origins"),
            ExhaustionReason::FirstManifest => write!(f, "service location is the current origin"),
            ExhaustionReason::NearEndOfContent => write!(f, "playback is near the end of content"),
            ExhaustionReason::ManifestUnavailable => write!(f, "no origin delivered a manifest"),
            ExhaustionReason::TornDown => write!(f, "source set torn down"),
        }
    }
}

/// Session error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    // Playback errors
    #[error("Playback stalled")]
    PlaybackStalled,

    #[error("Playback error {code}: {message}")]
    Playback { code: i32, message: String },

    // Failover errors
    #[error("Invalid failover descriptor: {0}")]
    InvalidFailoverDescriptor(String),

    #[error("Failover exhausted: {reason}")]
    FailoverExhausted { reason: ExhaustionReason },

    #[error("Subtitles failover exhausted (status {status_code:?})")]
    SubtitlesExhausted { status_code: Option<u16> },

    // Lifecycle errors
    #[error("Session torn down")]
    SessionTornDown,

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a failover exhaustion error
    pub fn exhausted(reason: ExhaustionReason) -> Self {
        Error::FailoverExhausted { reason }
    }

    /// Returns true if this error is recovered from internally (via failover)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PlaybackStalled
                | Error::Playback { .. }
                | Error::ManifestFetch(_)
                | Error::Network(_)
        )
    }

    /// Returns the error code for observers
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::PlaybackStalled => "PLAYBACK_STALLED",
            Error::Playback { .. } => "PLAYBACK",
            Error::InvalidFailoverDescriptor(_) => "INVALID_FAILOVER_DESCRIPTOR",
            Error::FailoverExhausted { .. } => "FAILOVER_EXHAUSTED",
            Error::SubtitlesExhausted { .. } => "SUBTITLES_EXHAUSTED",
            Error::SessionTornDown => "TORN_DOWN",
            Error::Network(_) => "NETWORK",
            Error::Url(_) => "URL",
            Error::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_handles_playback_errors_only() {
        let decode = Error::Playback {
            code: 4,
            message: "decode".into(),
        };
        assert!(decode.is_recoverable());
        assert!(Error::PlaybackStalled.is_recoverable());
        assert!(Error::ManifestFetch("HTTP 503".into()).is_recoverable());

        assert!(!Error::InvalidConfig("no media".into()).is_recoverable());
        assert!(!Error::exhausted(ExhaustionReason::NoRemainingOrigins).is_recoverable());
        assert!(!Error::SessionTornDown.is_recoverable());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            Error::exhausted(ExhaustionReason::FirstManifest).error_code(),
            "FAILOVER_EXHAUSTED"
        );
        let subtitles = Error::SubtitlesExhausted {
            status_code: Some(404),
        };
        assert_eq!(subtitles.error_code(), "SUBTITLES_EXHAUSTED");
    }
}
