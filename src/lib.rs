//! StageCue Gateway - networked stage cue controller
//!
//! Drives N cue channels (button + LED + small OLED text display each) from
//! a single control loop and exposes them over REST and WebSocket, with a
//! Wi-Fi captive-portal fallback for first-time network setup.

pub mod config;
pub mod cues;
pub mod debounce;
pub mod hw;
pub mod net;
pub mod paths;
pub mod server;
pub mod wrap;
