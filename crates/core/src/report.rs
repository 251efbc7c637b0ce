//! Result aggregation
//!
//! Workers record one [`TransferOutcome`] per plan item, in completion order.
//! [`ResultAggregator::finalize`] re-sorts them into plan order and produces
//! the run [`Report`].

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{Error, ErrorClass};
use crate::planner::{SkipReason, TransferInstruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Never dispatched because the run halted first
    NotAttempted,
}

/// Error detail captured into an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub class: String,
    pub message: String,
}

impl From<&Error> for ErrorDetail {
    fn from(error: &Error) -> Self {
        let class = match error.class() {
            ErrorClass::Access => "access",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::ResourceExhaustion => "resource-exhaustion",
            ErrorClass::Integrity => "integrity",
            ErrorClass::Cancelled => "cancelled",
        };
        Self {
            class: class.to_string(),
            message: error.to_string(),
        }
    }
}

/// Final state of one plan item
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    /// Position in the plan
    pub seq: u64,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<TransferInstruction>,
    pub status: OutcomeStatus,
    pub bytes: u64,
    /// Failed attempts preceding the final result
    pub failed_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl TransferOutcome {
    pub fn succeeded(seq: u64, instruction: TransferInstruction, bytes: u64) -> Self {
        Self {
            seq,
            path: instruction.path.clone(),
            instruction: Some(instruction),
            status: OutcomeStatus::Succeeded,
            bytes,
            failed_attempts: 0,
            skip_reason: None,
            error: None,
        }
    }

    pub fn failed(seq: u64, path: impl Into<String>, error: &Error) -> Self {
        Self {
            seq,
            path: path.into(),
            instruction: None,
            status: OutcomeStatus::Failed,
            bytes: 0,
            failed_attempts: 0,
            skip_reason: None,
            error: Some(ErrorDetail::from(error)),
        }
    }

    pub fn skipped(seq: u64, path: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            seq,
            path: path.into(),
            instruction: None,
            status: OutcomeStatus::Skipped,
            bytes: 0,
            failed_attempts: 0,
            skip_reason: Some(reason),
            error: None,
        }
    }

    pub fn not_attempted(seq: u64, instruction: TransferInstruction) -> Self {
        Self {
            seq,
            path: instruction.path.clone(),
            instruction: Some(instruction),
            status: OutcomeStatus::NotAttempted,
            bytes: 0,
            failed_attempts: 0,
            skip_reason: None,
            error: None,
        }
    }

    pub fn with_instruction(mut self, instruction: TransferInstruction) -> Self {
        self.instruction = Some(instruction);
        self
    }

    pub fn with_failed_attempts(mut self, failed_attempts: u32) -> Self {
        self.failed_attempts = failed_attempts;
        self
    }
}

/// A failed item in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub path: String,
    pub error: ErrorDetail,
}

/// Summary of a completed run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    pub total_bytes: u64,
    pub failures: Vec<Failure>,
    /// Every outcome, in plan order
    pub outcomes: Vec<TransferOutcome>,
    /// The error that halted dispatch, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<ErrorDetail>,
    pub cancelled: bool,
    /// Listing stopped early; entries past the last listed one were never seen
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    pub dry_run: bool,
}

impl Report {
    /// Whether the run should end with a non-zero status
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.cancelled || self.fatal.is_some()
    }

    pub fn outcome(&self, path: &str) -> Option<&TransferOutcome> {
        self.outcomes.iter().find(|o| o.path == path)
    }
}

#[derive(Debug, Default)]
struct State {
    outcomes: Vec<TransferOutcome>,
    fatal: Option<ErrorDetail>,
    cancelled: bool,
    truncated: bool,
    finalized: Option<Report>,
}

/// Callback invoked for every recorded outcome (progress display)
pub type OutcomeHook = Arc<dyn Fn(&TransferOutcome) + Send + Sync>;

/// Thread-safe collector of outcomes
#[derive(Clone, Default)]
pub struct ResultAggregator {
    state: Arc<Mutex<State>>,
    dry_run: bool,
    hook: Option<OutcomeHook>,
}

impl ResultAggregator {
    pub fn new(dry_run: bool) -> Self {
        Self {
            state: Arc::default(),
            dry_run,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Option<OutcomeHook>) -> Self {
        self.hook = hook;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A worker that panicked while holding the lock left valid data behind
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, outcome: TransferOutcome) {
        if let Some(hook) = &self.hook {
            hook(&outcome);
        }
        let mut state = self.lock();
        if state.finalized.is_some() {
            tracing::warn!(key = %outcome.path, "Outcome recorded after finalize; ignored");
            return;
        }
        state.outcomes.push(outcome);
    }

    /// Note the error that halted dispatch (first one wins)
    pub fn record_fatal(&self, error: &Error) {
        let mut state = self.lock();
        if state.fatal.is_none() {
            state.fatal = Some(ErrorDetail::from(error));
        }
    }

    pub fn mark_cancelled(&self) {
        self.lock().cancelled = true;
    }

    pub fn mark_truncated(&self) {
        self.lock().truncated = true;
    }

    /// Produce the report; later calls return the same report
    pub fn finalize(&self) -> Report {
        let mut state = self.lock();
        if let Some(report) = &state.finalized {
            return report.clone();
        }

        let mut outcomes = std::mem::take(&mut state.outcomes);
        outcomes.sort_by_key(|o| o.seq);

        let mut report = Report {
            fatal: state.fatal.clone(),
            cancelled: state.cancelled,
            truncated: state.truncated,
            dry_run: self.dry_run,
            ..Report::default()
        };
        for outcome in &outcomes {
            match outcome.status {
                OutcomeStatus::Succeeded => {
                    report.succeeded += 1;
                    report.total_bytes += outcome.bytes;
                }
                OutcomeStatus::Failed => {
                    report.failed += 1;
                    if let Some(error) = &outcome.error {
                        report.failures.push(Failure {
                            path: outcome.path.clone(),
                            error: error.clone(),
                        });
                    }
                }
                OutcomeStatus::Skipped => report.skipped += 1,
                OutcomeStatus::NotAttempted => report.not_attempted += 1,
            }
        }
        report.outcomes = outcomes;

        state.finalized = Some(report.clone());
        report
    }
}
