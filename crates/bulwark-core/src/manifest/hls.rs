//! HLS playlist window discovery
//!
//! The window start is the `EXT-X-PROGRAM-DATE-TIME` of the first segment,
//! the end is the start plus the summed segment durations.

use crate::{Error, Result, WindowDescriptor};
use m3u8_rs::{MediaPlaylist, Playlist};
use url::Url;

/// A parsed HLS playlist
#[derive(Debug, Clone, PartialEq)]
pub enum HlsPlaylist {
    /// Master playlist; the window is read from its first variant
    Master { variant: Url },
    /// Media playlist with its window
    Media(WindowDescriptor),
}

/// Parse playlist text fetched from `base_url`
pub fn parse_playlist(content: &str, base_url: &Url) -> Result<HlsPlaylist> {
    let parsed = m3u8_rs::parse_playlist_res(content.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS playlist: {:?}", e)))?;

    match parsed {
        Playlist::MasterPlaylist(master) => {
            let first = master
                .variants
                .iter()
                .find(|variant| !variant.is_i_frame)
                .ok_or_else(|| Error::ManifestParse("master playlist has no variants".into()))?;
            Ok(HlsPlaylist::Master {
                variant: base_url.join(&first.uri)?,
            })
        }
        Playlist::MediaPlaylist(media) => Ok(HlsPlaylist::Media(window_of(&media)?)),
    }
}

fn window_of(media: &MediaPlaylist) -> Result<WindowDescriptor> {
    let first = media
        .segments
        .first()
        .ok_or_else(|| Error::ManifestParse("media playlist has no segments".into()))?;

    let start = first
        .program_date_time
        .as_ref()
        .map(|date| date.timestamp_millis())
        .ok_or_else(|| {
            Error::ManifestParse("first segment has no EXT-X-PROGRAM-DATE-TIME".into())
        })?;

    let duration: f64 = media.segments.iter().map(|s| f64::from(s.duration)).sum();

    Ok(WindowDescriptor {
        window_start_time: Some(start),
        window_end_time: Some(start + (duration * 1000.0).round() as i64),
        time_correction_seconds: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn-a.example.com/live/channel/index.m3u8").unwrap()
    }

    #[test]
    fn test_media_playlist_window() {
        let content = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:100
#EXT-X-PROGRAM-DATE-TIME:2023-11-14T22:13:20.000Z
#EXTINF:4.0,
seg100.ts
#EXTINF:4.0,
seg101.ts
#EXTINF:3.5,
seg102.ts
";
        let window = match parse_playlist(content, &base()).unwrap() {
            HlsPlaylist::Media(window) => window,
            other => panic!("expected media playlist, got {:?}", other),
        };

        assert_eq!(window.window_start_time, Some(1_700_000_000_000));
        assert_eq!(window.window_end_time, Some(1_700_000_011_500));
        assert_eq!(window.time_correction_seconds, 0.0);
    }

    #[test]
    fn test_master_playlist_resolves_first_variant() {
        let content = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720
high/index.m3u8
";
        match parse_playlist(content, &base()).unwrap() {
            HlsPlaylist::Master { variant } => assert_eq!(
                variant.as_str(),
                "https://cdn-a.example.com/live/channel/low/index.m3u8"
            ),
            other => panic!("expected master playlist, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_program_date_time() {
        let content = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4.0,
seg1.ts
";
        assert!(matches!(
            parse_playlist(content, &base()),
            Err(Error::ManifestParse(_))
        ));
    }
}
