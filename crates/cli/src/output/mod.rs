//! Output formatting
//!
//! Human-readable lines and a final summary, or strict JSON when `--json`
//! is set.

mod formatter;
mod progress;

pub use formatter::{Formatter, summary_line};
pub use progress::TransferProgress;

/// Output settings shared by every command
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Emit JSON instead of human-readable text
    pub json: bool,
    /// Disable ANSI colors
    pub no_color: bool,
    /// Suppress everything except errors
    pub quiet: bool,
}
