//! Live progress for a running transfer
//!
//! The plan is lazy, so the total is unknown up front: a spinner counts
//! finished items and bytes while outcome lines print above it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use objsync_core::{OutcomeHook, TransferOutcome};

use super::Formatter;

pub struct TransferProgress {
    bar: Option<ProgressBar>,
    formatter: Formatter,
    dry_run: bool,
    bytes: AtomicU64,
}

impl TransferProgress {
    pub fn new(formatter: Formatter, dry_run: bool) -> Arc<Self> {
        let bar = formatter.shows_progress().then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {pos} done, {msg} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(std::time::Duration::from_millis(120));
            pb
        });
        Arc::new(Self {
            bar,
            formatter,
            dry_run,
            bytes: AtomicU64::new(0),
        })
    }

    /// Hook to hand to the engine
    pub fn hook(self: &Arc<Self>) -> OutcomeHook {
        let progress = self.clone();
        Arc::new(move |outcome: &TransferOutcome| progress.record(outcome))
    }

    fn record(&self, outcome: &TransferOutcome) {
        let total = self.bytes.fetch_add(outcome.bytes, Ordering::Relaxed) + outcome.bytes;
        let Some(bar) = &self.bar else {
            return;
        };
        if let Some(line) = self.formatter.outcome_line(outcome, self.dry_run) {
            bar.suspend(|| println!("{line}"));
        }
        bar.inc(1);
        bar.set_message(
            self.formatter
                .style_size(&humansize::format_size(total, humansize::BINARY)),
        );
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}
