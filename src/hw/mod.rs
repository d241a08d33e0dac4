//! Hardware capability seams
//!
//! The controller talks to LEDs, buttons, and displays through these traits
//! only. Real deployments wire in a GPIO/I²C backend; development hosts and
//! tests use the console backend or in-memory fakes.
//!
//! Note: all banks are indexed by channel and sized at construction time.
//! Implementations use interior state, not locks - the controller serializes
//! every call.

use anyhow::Result;

use crate::debounce::Level;

/// One output pin per cue channel.
pub trait LedBank: Send {
    /// Drive the LED for `index`. Out-of-range indices are ignored.
    fn set(&mut self, index: usize, on: bool);
}

/// One optional input pin per cue channel.
pub trait ButtonBank: Send {
    /// Raw level of the button pin, or `None` when the channel has no
    /// button wired. Unwired channels are never sampled again.
    fn read(&mut self, index: usize) -> Option<Level>;
}

/// One small text display per cue channel.
pub trait DisplayBank: Send {
    /// Whether the display probed OK at startup. Renders to a channel that
    /// is not ready are skipped, never retried.
    fn is_ready(&self, index: usize) -> bool;

    /// Pixel width of `text` in the display's font.
    fn measure(&self, index: usize, text: &str) -> u32;

    /// Push wrapped lines to the display.
    fn draw(&mut self, index: usize, lines: &[String]) -> Result<()>;
}

pub mod console;

pub use console::{ConsoleButtonBank, ConsoleDisplayBank, ConsoleLedBank};
