//! Output formatter for human-readable and JSON output
//!
//! Ensures consistent output formatting across commands.

use console::Style;
use objsync_core::{OutcomeStatus, Operation, Report, SkipReason, TransferInstruction, TransferOutcome};
use serde::Serialize;

use super::OutputConfig;

/// Color theme for styled output
#[derive(Debug, Clone)]
pub struct Theme {
    /// Transfer sizes - green
    pub size: Style,
    /// Error messages - red
    pub error: Style,
    /// Warning messages - yellow
    pub warning: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            size: Style::new().green(),
            error: Style::new().red(),
            warning: Style::new().yellow(),
        }
    }
}

impl Theme {
    /// Returns a theme with no styling (for no-color mode)
    pub fn plain() -> Self {
        Self {
            size: Style::new(),
            error: Style::new(),
            warning: Style::new(),
        }
    }
}

/// Formatter for CLI output
///
/// When JSON mode is enabled, all output is strict JSON without colors or
/// per-transfer lines.
#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
    theme: Theme,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        let theme = if config.no_color || config.json {
            Theme::plain()
        } else {
            Theme::default()
        };
        Self { config, theme }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn colors_enabled(&self) -> bool {
        !self.config.no_color && !self.config.json
    }

    /// Whether per-transfer lines and progress are shown
    pub fn shows_progress(&self) -> bool {
        !self.config.quiet && !self.config.json
    }

    pub fn style_size(&self, text: &str) -> String {
        self.theme.size.apply_to(text).to_string()
    }

    /// Render one outcome as a human-readable line.
    ///
    /// Up-to-date skips and items that never ran produce no line.
    pub fn outcome_line(&self, outcome: &TransferOutcome, dry_run: bool) -> Option<String> {
        match outcome.status {
            OutcomeStatus::Succeeded => {
                let instruction = outcome.instruction.as_ref()?;
                let prefix = if dry_run { "(dryrun) " } else { "" };
                Some(format!("{prefix}{}", describe(instruction)))
            }
            OutcomeStatus::Failed => {
                let message = outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error");
                let line = match &outcome.instruction {
                    Some(instruction) => format!("{} failed: {message}", describe(instruction)),
                    None => format!("failed: {}: {message}", outcome.path),
                };
                Some(self.theme.error.apply_to(line).to_string())
            }
            OutcomeStatus::Skipped => match outcome.skip_reason {
                Some(SkipReason::UpToDate) | None => None,
                Some(reason) => Some(
                    self.theme
                        .warning
                        .apply_to(format!("warning: Skipping file {}. {reason}", outcome.path))
                        .to_string(),
                ),
            },
            OutcomeStatus::NotAttempted => None,
        }
    }

    /// Output an error message
    ///
    /// Errors are always printed, even in quiet mode.
    pub fn error(&self, message: &str) {
        if self.config.json {
            let error = serde_json::json!({
                "error": message
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&error).unwrap_or_else(|_| message.to_string())
            );
        } else {
            let cross = self.theme.error.apply_to("✗");
            eprintln!("{cross} {message}");
        }
    }

    /// Output a warning message
    pub fn warning(&self, message: &str) {
        if !self.shows_progress() {
            return;
        }
        let warn_icon = self.theme.warning.apply_to("⚠");
        eprintln!("{warn_icon} {message}");
    }

    /// Output JSON directly
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    /// Print a line of text (respects quiet mode)
    pub fn println(&self, message: &str) {
        if self.config.quiet {
            return;
        }
        println!("{message}");
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

fn describe(instruction: &TransferInstruction) -> String {
    match instruction.operation {
        Operation::Remove => format!("delete: {}", instruction.destination),
        op => format!(
            "{}: {} to {}",
            op.as_str(),
            instruction.source,
            instruction.destination
        ),
    }
}

/// One-line run summary, e.g. `Sync complete: 3 succeeded, ...`
pub fn summary_line(command: &str, report: &Report) -> String {
    let prefix = if report.dry_run { "(dryrun) " } else { "" };
    let state = if report.cancelled {
        "interrupted"
    } else {
        "complete"
    };
    let mut line = format!(
        "{prefix}{command} {state}: {} succeeded, {} skipped, {} failed, {} not attempted, {} transferred",
        report.succeeded,
        report.skipped,
        report.failed,
        report.not_attempted,
        humansize::format_size(report.total_bytes, humansize::BINARY),
    );
    if let Some(fatal) = &report.fatal {
        line.push_str(&format!(" (halted: {})", fatal.message));
    }
    if report.truncated {
        line.push_str(" (listing stopped early)");
    }
    line
}
