//! Bulwark CLI - Live window and failover toolkit
//!
//! Features:
//! - Live window discovery from HLS/DASH manifests
//! - Epoch/player time conversion
//! - Offline replay of scripted failover scenarios

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod output;

/// Bulwark CLI - Playback resilience toolkit
#[derive(Parser)]
#[command(name = "bulwark-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Live window probing and CDN failover simulation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Window topology as typed on the command line
#[derive(Clone, Copy, ValueEnum)]
pub enum WindowArg {
    Fixed,
    Sliding,
    Growing,
}

impl From<WindowArg> for bulwark_core::WindowType {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Fixed => bulwark_core::WindowType::Fixed,
            WindowArg::Sliding => bulwark_core::WindowType::Sliding,
            WindowArg::Growing => bulwark_core::WindowType::Growing,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a manifest and show its live window
    Probe {
        /// URL to manifest
        manifest: String,

        /// Window topology of the stream
        #[arg(short, long, value_enum, default_value = "sliding")]
        window: WindowArg,

        /// Request timeout in milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Convert between wall-clock and player time
    Convert {
        /// Window start (epoch milliseconds or RFC 3339)
        #[arg(long)]
        window_start: String,

        /// Wall-clock time to convert to player seconds
        #[arg(long, conflicts_with = "seconds")]
        epoch: Option<String>,

        /// Player seconds to convert to wall-clock time
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Replay a scripted session against simulated players
    Simulate {
        /// Scenario file (JSON)
        scenario: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    bulwark_core::init();

    match cli.command {
        Commands::Probe { manifest, window, timeout_ms } => {
            commands::probe(&manifest, window.into(), timeout_ms, &cli.format).await?;
        }
        Commands::Convert { window_start, epoch, seconds } => {
            commands::convert(&window_start, epoch.as_deref(), seconds, &cli.format)?;
        }
        Commands::Simulate { scenario } => {
            commands::simulate(&scenario, &cli.format).await?;
        }
    }

    Ok(())
}
