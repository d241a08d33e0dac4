//! Cue channel state machine and its collaborators
//!
//! The registry holds the authoritative per-channel state, the controller
//! drives every mutation, events fan changes out to WebSocket subscribers,
//! and persistence keeps cue texts across restarts.

mod controller;
mod events;
mod persistence;
mod registry;

pub use controller::{
    ControlSettings, CueController, DEFAULT_ACTIVE_DURATION_MS, DEFAULT_CLEANUP_INTERVAL_MS,
    DEFAULT_DEBOUNCE_MS,
};
pub use events::{BroadcastClient, CueBroadcaster};
pub use persistence::{cue_key, open_database, KvStore, SledStore, CUE_NAMESPACE, WIFI_NAMESPACE};
pub use registry::{CueRegistry, CueState};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current timestamp in milliseconds, as injected into the controller by the
/// control loop and the request dispatcher.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
