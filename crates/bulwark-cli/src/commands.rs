//! CLI command implementations

use crate::output::{self, EventRow, OutputFormat};
use anyhow::{bail, Context};
use bulwark_core::simulation::Scenario;
use bulwark_core::{
    time, HttpManifestLoader, LiveSupport, ManifestLoader, PlaybackState, WindowType,
};
use chrono::{DateTime, SecondsFormat, Utc};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

#[derive(Serialize)]
struct ProbeReport {
    url: String,
    window_type: WindowType,
    transfer_format: String,
    window_start_ms: Option<i64>,
    window_end_ms: Option<i64>,
    window_start: Option<String>,
    window_end: Option<String>,
    window_seconds: Option<f64>,
    time_correction_seconds: f64,
    /// Capability tiers that must refetch this manifest to seek or fail over
    reload_required_for: Vec<LiveSupport>,
}

/// Fetch a manifest and report its live window
pub async fn probe(
    manifest_url: &str,
    window_type: WindowType,
    timeout_ms: u64,
    format: &str,
) -> anyhow::Result<()> {
    tracing::info!(url = manifest_url, window_type = %window_type, "Probing manifest");

    let loader = HttpManifestLoader::new(Duration::from_millis(timeout_ms))?;
    let loaded = loader
        .load(manifest_url, window_type)
        .await
        .with_context(|| format!("failed to load {}", manifest_url))?;

    let window = loaded.window;
    let reload_required_for = [
        LiveSupport::None,
        LiveSupport::Playable,
        LiveSupport::Restartable,
        LiveSupport::Seekable,
    ]
    .into_iter()
    .filter(|tier| {
        window_type.is_live()
            && tier.requires_manifest_load()
            && !loaded.transfer_format.describes_live_window()
    })
    .collect();

    let report = ProbeReport {
        url: manifest_url.to_string(),
        window_type,
        transfer_format: loaded.transfer_format.to_string(),
        window_start_ms: window.window_start_time,
        window_end_ms: window.window_end_time,
        window_start: window.window_start_time.map(rfc3339),
        window_end: window.window_end_time.map(rfc3339),
        window_seconds: window
            .window_start_time
            .zip(window.window_end_time)
            .map(|(start, end)| (end - start) as f64 / 1000.0),
        time_correction_seconds: window.time_correction_seconds,
        reload_required_for,
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_output(&report, format)),
        OutputFormat::Text | OutputFormat::Table => {
            println!("\nManifest Window:");
            println!("  Format: {}", report.transfer_format);
            println!("  Topology: {}", report.window_type);
            println!("  Start: {}", report.window_start.as_deref().unwrap_or("-"));
            println!("  End: {}", report.window_end.as_deref().unwrap_or("-"));
            if let Some(seconds) = report.window_seconds {
                println!("  Length: {:.1}s", seconds);
            }
            println!("  Time correction: {:.3}s", report.time_correction_seconds);
            if report.reload_required_for.is_empty() {
                println!("  Manifest reload on seek/failover: {}", style("never").green());
            } else {
                println!(
                    "  Manifest reload on seek/failover: {} ({:?})",
                    style("required").yellow(),
                    report.reload_required_for
                );
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct Conversion {
    window_start_ms: i64,
    epoch_ms: Option<i64>,
    player_seconds: Option<f64>,
    seekable_player_seconds: Option<f64>,
}

/// Convert between wall-clock and player time for a window
pub fn convert(
    window_start: &str,
    epoch: Option<&str>,
    seconds: Option<f64>,
    format: &str,
) -> anyhow::Result<()> {
    let window_start_ms = parse_instant(window_start)?;

    let conversion = match (epoch, seconds) {
        (Some(epoch), _) => {
            let epoch_ms = parse_instant(epoch)?;
            Conversion {
                window_start_ms,
                epoch_ms: Some(epoch_ms),
                player_seconds: Some(time::epoch_ms_to_player_seconds(epoch_ms, window_start_ms)),
                seekable_player_seconds: Some(time::epoch_ms_to_seekable_player_seconds(
                    epoch_ms,
                    window_start_ms,
                )),
            }
        }
        (None, Some(seconds)) => Conversion {
            window_start_ms,
            epoch_ms: time::player_seconds_to_epoch_ms(seconds, Some(window_start_ms)),
            player_seconds: Some(seconds),
            seekable_player_seconds: None,
        },
        (None, None) => bail!("pass either --epoch or --seconds"),
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_output(&conversion, format)),
        OutputFormat::Text | OutputFormat::Table => {
            println!("Window start: {}", rfc3339(conversion.window_start_ms));
            if let Some(epoch_ms) = conversion.epoch_ms {
                println!("Wall clock:   {} ({} ms)", rfc3339(epoch_ms), epoch_ms);
            }
            if let Some(player_seconds) = conversion.player_seconds {
                println!("Player time:  {}s", player_seconds);
            }
            if let Some(seekable) = conversion.seekable_player_seconds {
                println!("Seek target:  {}s", seekable);
            }
        }
    }

    Ok(())
}

/// Replay a scenario file on a paused clock
pub async fn simulate(path: &Path, format: &str) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let scenario = Scenario::from_json(&json)?;

    // Timers run on tokio's clock; with it paused the replay finishes at once
    tokio::time::pause();
    let report = scenario.run().await?;

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::format_output(&report, format)),
        OutputFormat::Text | OutputFormat::Table => {
            let rows: Vec<EventRow> = report.events.iter().map(EventRow::from).collect();
            println!("{}", output::table(rows));

            let state = match report.final_state {
                PlaybackState::FatalError => style(report.final_state.to_string()).red().bold(),
                PlaybackState::Playing | PlaybackState::Ended => {
                    style(report.final_state.to_string()).green().bold()
                }
                _ => style(report.final_state.to_string()).yellow(),
            };
            println!("\nFinal state: {}", state);
            println!("Current CDN: {}", report.current_cdn.as_deref().unwrap_or("-"));
            println!("Available CDNs: {}", report.available_cdns.join(", "));
            println!("Players created: {}", report.players_created);
        }
    }

    Ok(())
}

/// Epoch milliseconds, or an RFC 3339 timestamp
fn parse_instant(value: &str) -> anyhow::Result<i64> {
    if let Ok(epoch_ms) = value.parse::<i64>() {
        return Ok(epoch_ms);
    }
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("'{}' is neither epoch milliseconds nor RFC 3339", value))?;
    Ok(parsed.timestamp_millis())
}

fn rfc3339(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}
