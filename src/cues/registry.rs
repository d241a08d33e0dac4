//! Cue registry - authoritative text and activation state per channel
//!
//! The channel count is fixed when the registry is built; every mutation goes
//! through the controller, which serializes access.

use serde::{Deserialize, Serialize};

/// Visible state of one cue channel, as exposed over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueState {
    pub index: usize,
    pub text: String,
    pub active: bool,
    pub display_ready: bool,
}

#[derive(Debug, Clone)]
struct CueRecord {
    text: String,
    active: bool,
    triggered_at_ms: u64,
}

/// Fixed-size collection of cue records plus the sanitation rules for their
/// text labels.
#[derive(Debug, Clone)]
pub struct CueRegistry {
    cues: Vec<CueRecord>,
    defaults: Vec<String>,
    max_text_len: usize,
}

impl CueRegistry {
    /// Build a registry with one record per default text, all inactive.
    pub fn new(defaults: Vec<String>, max_text_len: usize) -> Self {
        let cues = defaults
            .iter()
            .map(|text| CueRecord {
                text: text.clone(),
                active: false,
                triggered_at_ms: 0,
            })
            .collect();
        Self {
            cues,
            defaults,
            max_text_len,
        }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Trim, cap to the configured character budget, and substitute the
    /// per-index default when nothing printable is left.
    pub fn sanitize(&self, index: usize, raw: &str) -> String {
        let trimmed = raw.trim();
        let capped: String = trimmed.chars().take(self.max_text_len).collect();
        if capped.is_empty() {
            self.defaults.get(index).cloned().unwrap_or_default()
        } else {
            capped
        }
    }

    pub fn default_text(&self, index: usize) -> Option<&str> {
        self.defaults.get(index).map(String::as_str)
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.cues.get(index).map(|c| c.text.as_str())
    }

    /// Replace the stored text. The active window is deliberately left
    /// untouched: a label change must not re-flash the cue.
    pub fn set_text(&mut self, index: usize, text: String) {
        if let Some(cue) = self.cues.get_mut(index) {
            cue.text = text;
        }
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.cues.get(index).map(|c| c.active).unwrap_or(false)
    }

    pub fn activate(&mut self, index: usize, now_ms: u64) {
        if let Some(cue) = self.cues.get_mut(index) {
            cue.active = true;
            cue.triggered_at_ms = now_ms;
        }
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(cue) = self.cues.get_mut(index) {
            cue.active = false;
        }
    }

    /// True when the cue is active and its window has elapsed.
    pub fn expired(&self, index: usize, now_ms: u64, duration_ms: u64) -> bool {
        self.cues
            .get(index)
            .map(|c| c.active && now_ms.saturating_sub(c.triggered_at_ms) >= duration_ms)
            .unwrap_or(false)
    }

    pub fn triggered_at(&self, index: usize) -> Option<u64> {
        self.cues.get(index).filter(|c| c.active).map(|c| c.triggered_at_ms)
    }
}
