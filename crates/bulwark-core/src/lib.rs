//! Bulwark Core - Playback resilience for unreliable native players
//!
//! This crate keeps one logical playback session alive across:
//! - Native player errors and buffering stalls
//! - CDN outages, by failing over between origins
//! - Live window topologies (fixed, sliding, growing)
//! - Device quirks around seeking and pausing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Bulwark Core                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │                    ┌─────────────┐                              │
//! │                    │   Player    │──────► Event Bus ──► observers
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │              ┌────────────┼─────────────┐                       │
//! │              │            │             │                       │
//! │  ┌───────────┴──┐  ┌──────┴──────┐  ┌───┴──────────┐            │
//! │  │  Source Set  │  │    Time     │  │   Adapter    │            │
//! │  │  (failover)  │  │    Model    │  │ (+exit seek) │            │
//! │  └──────┬───────┘  └─────────────┘  └──────────────┘            │
//! │         │                                                       │
//! │  ┌──────┴───────┐                                               │
//! │  │   Manifest   │                                               │
//! │  │    Loader    │                                               │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod time;
pub mod manifest;
pub mod adapter;
pub mod events;
pub mod sources;
pub mod exit_seek;
pub mod session;
pub mod simulation;
mod timers;

pub use error::{Error, ExhaustionReason, Result};
pub use types::*;
pub use manifest::{HttpManifestLoader, LoadedManifest, ManifestLoader};
pub use adapter::{AdapterContext, AdapterEvent, AdapterEventSink, AdapterFactory, PlaybackAdapter};
pub use events::{EventBus, SessionEvent, StateChange, Subscription, TimeUpdate};
pub use sources::{FailoverRequest, SourceSet};
pub use exit_seek::{ExitSeekContext, ExitSeekWorkaround};
pub use session::PlayerSession;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Bulwark Core initialized");
}
