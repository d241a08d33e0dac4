//! Configuration management for the StageCue gateway
//!
//! Handles loading and validating the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::cues::{
    ControlSettings, DEFAULT_ACTIVE_DURATION_MS, DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_DEBOUNCE_MS,
};
use crate::debounce::Level;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Network name the device announces
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Shared secret for the REST API and WebSocket. Empty disables auth.
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Maximum cue text length in characters
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
    /// One entry per cue channel
    #[serde(default = "default_cues")]
    pub cues: Vec<CueChannelConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub buttons: ButtonConfig,
    #[serde(default)]
    pub wifi: WifiConfig,
}

/// Per-channel wiring and default label
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CueChannelConfig {
    pub default_text: String,
    /// GPIO pin of the button; omit for a channel with no physical button
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_pin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_pin: Option<u32>,
    /// I²C address of the channel's display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_address: Option<u8>,
}

/// Control-loop timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// How long a triggered cue stays lit (ms)
    #[serde(default = "default_active_duration_ms")]
    pub active_duration_ms: u64,
    /// Button debounce window (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Broadcast housekeeping interval (ms)
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Control-loop tick period (ms)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            active_duration_ms: default_active_duration_ms(),
            debounce_ms: default_debounce_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Display geometry shared by all channels
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreenConfig {
    #[serde(default = "default_screen_width")]
    pub width_px: u32,
    #[serde(default = "default_screen_height")]
    pub height_px: u32,
    #[serde(default = "default_line_height")]
    pub line_height_px: u32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width_px: default_screen_width(),
            height_px: default_screen_height(),
            line_height_px: default_line_height(),
        }
    }
}

/// Button electrical configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ButtonConfig {
    /// Logic level that counts as "pressed"
    #[serde(default = "default_active_level")]
    pub active_level: ActiveLevel,
    /// Enable the internal pull-up where the hardware supports it
    #[serde(default = "default_true")]
    pub pullup: bool,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            active_level: default_active_level(),
            pullup: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActiveLevel {
    Low,
    High,
}

impl From<ActiveLevel> for Level {
    fn from(level: ActiveLevel) -> Self {
        match level {
            ActiveLevel::Low => Level::Low,
            ActiveLevel::High => Level::High,
        }
    }
}

/// Wi-Fi station and fallback portal configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WifiConfig {
    /// Wireless interface to manage
    #[serde(default = "default_wifi_interface")]
    pub interface: String,
    /// Compiled-in credentials, used when the store has none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Fallback access point
    #[serde(default = "default_ap_ssid")]
    pub ap_ssid: String,
    #[serde(default = "default_ap_password")]
    pub ap_password: String,
    /// Per-attempt association timeout (ms)
    #[serde(default = "default_wifi_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Full attempts before falling back to portal mode
    #[serde(default = "default_wifi_max_retries")]
    pub max_retries: u32,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            interface: default_wifi_interface(),
            ssid: None,
            password: None,
            ap_ssid: default_ap_ssid(),
            ap_password: default_ap_password(),
            connect_timeout_ms: default_wifi_connect_timeout_ms(),
            max_retries: default_wifi_max_retries(),
        }
    }
}

/// Configuration validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config must define at least one cue channel")]
    NoCues,
    #[error("max_text_length must be greater than zero")]
    ZeroTextLength,
    #[error("screen line_height_px must be greater than zero")]
    ZeroLineHeight,
    #[error("tick_interval_ms must be greater than zero")]
    ZeroTickInterval,
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cues.is_empty() {
            return Err(ConfigError::NoCues);
        }
        if self.max_text_length == 0 {
            return Err(ConfigError::ZeroTextLength);
        }
        if self.screen.line_height_px == 0 {
            return Err(ConfigError::ZeroLineHeight);
        }
        if self.timing.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }

    /// Default labels, one per configured channel.
    pub fn default_texts(&self) -> Vec<String> {
        self.cues.iter().map(|c| c.default_text.clone()).collect()
    }

    /// Knobs for the control loop, derived from this config.
    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            active_duration_ms: self.timing.active_duration_ms,
            debounce_ms: self.timing.debounce_ms,
            cleanup_interval_ms: self.timing.cleanup_interval_ms,
            active_level: self.buttons.active_level.into(),
            screen_width_px: self.screen.width_px,
            screen_height_px: self.screen.height_px,
            line_height_px: self.screen.line_height_px,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            auth_token: String::new(),
            http_port: default_http_port(),
            max_text_length: default_max_text_length(),
            cues: default_cues(),
            timing: TimingConfig::default(),
            screen: ScreenConfig::default(),
            buttons: ButtonConfig::default(),
            wifi: WifiConfig::default(),
        }
    }
}

// Default value functions
fn default_device_name() -> String {
    "StageCue".to_string()
}
fn default_http_port() -> u16 {
    8130
}
fn default_max_text_length() -> usize {
    64
}
fn default_cues() -> Vec<CueChannelConfig> {
    (1..=3)
        .map(|i| CueChannelConfig {
            default_text: format!("Cue {i}"),
            button_pin: None,
            led_pin: None,
            display_address: None,
        })
        .collect()
}
fn default_active_duration_ms() -> u64 {
    DEFAULT_ACTIVE_DURATION_MS
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_cleanup_interval_ms() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_MS
}
fn default_tick_interval_ms() -> u64 {
    10
}
fn default_screen_width() -> u32 {
    128
}
fn default_screen_height() -> u32 {
    64
}
fn default_line_height() -> u32 {
    8
}
fn default_active_level() -> ActiveLevel {
    ActiveLevel::Low
}
fn default_true() -> bool {
    true
}
fn default_wifi_interface() -> String {
    "wlan0".to_string()
}
fn default_ap_ssid() -> String {
    "StageCue_AP".to_string()
}
fn default_ap_password() -> String {
    "12345678".to_string()
}
fn default_wifi_connect_timeout_ms() -> u64 {
    15_000
}
fn default_wifi_max_retries() -> u32 {
    3
}
