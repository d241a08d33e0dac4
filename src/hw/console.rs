//! Console backend - logs all hardware actions for development and testing
//!
//! Useful for running the gateway on a machine with no GPIO or displays:
//! LED changes and renders show up in the logs, buttons read as unwired.

use anyhow::Result;
use tracing::{debug, info};

use crate::debounce::Level;
use crate::hw::{ButtonBank, DisplayBank, LedBank};

/// Glyph advance of the classic 5x7 font the real panels use.
pub const FONT_WIDTH_PX: u32 = 6;

/// Logs LED transitions instead of driving pins.
pub struct ConsoleLedBank {
    count: usize,
}

impl ConsoleLedBank {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl LedBank for ConsoleLedBank {
    fn set(&mut self, index: usize, on: bool) {
        if index >= self.count {
            return;
        }
        info!("💡 LED {} -> {}", index, if on { "on" } else { "off" });
    }
}

/// Reports every channel as unwired - no buttons on a dev host.
pub struct ConsoleButtonBank;

impl ButtonBank for ConsoleButtonBank {
    fn read(&mut self, _index: usize) -> Option<Level> {
        None
    }
}

/// Logs rendered lines instead of pushing pixels over I²C.
pub struct ConsoleDisplayBank {
    ready: Vec<bool>,
}

impl ConsoleDisplayBank {
    /// All channels report ready.
    pub fn new(count: usize) -> Self {
        Self {
            ready: vec![true; count],
        }
    }

    /// Explicit per-channel readiness, for exercising the skip path.
    pub fn with_ready(ready: Vec<bool>) -> Self {
        Self { ready }
    }
}

impl DisplayBank for ConsoleDisplayBank {
    fn is_ready(&self, index: usize) -> bool {
        self.ready.get(index).copied().unwrap_or(false)
    }

    fn measure(&self, _index: usize, text: &str) -> u32 {
        text.chars().count() as u32 * FONT_WIDTH_PX
    }

    fn draw(&mut self, index: usize, lines: &[String]) -> Result<()> {
        info!(
            "🖥️  [{}] Display {} <- {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            index,
            lines.join(" / ")
        );
        debug!(display = index, ?lines, "console render");
        Ok(())
    }
}
