//! Sync comparison
//!
//! Decides, per matched source/destination pair, whether a transfer is
//! needed. Destination-only entries become deletions when extraneous files
//! are being removed.

use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::resolver::TransferCandidate;

/// Policy for deciding whether a pair is already in sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonMode {
    /// A size difference, or a source newer than the destination by more than
    /// the clock-skew tolerance, transfers
    #[default]
    Default,
    /// Equal sizes are in sync; timestamps are ignored
    SizeOnly,
    /// Equal sizes with a destination at least as new are in sync; no tolerance
    ExactTimestamps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Transfer,
    Skip,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    /// No destination entry exists
    NewObject,
    SizeDiffers,
    TimestampDiffers,
    /// Comparison disabled; every source is transferred
    Unconditional,
    InSync,
    /// Destination entry has no source counterpart
    Extraneous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncDecision {
    pub action: SyncAction,
    pub reason: DecisionReason,
}

impl SyncDecision {
    fn new(action: SyncAction, reason: DecisionReason) -> Self {
        Self { action, reason }
    }
}

/// Applies a [`ComparisonMode`] to candidate pairs
#[derive(Debug, Clone)]
pub struct Comparator {
    mode: ComparisonMode,
    tolerance_secs: i64,
    compare: bool,
    delete_extraneous: bool,
}

impl Comparator {
    pub fn new(mode: ComparisonMode, tolerance_secs: i64) -> Self {
        Self {
            mode,
            tolerance_secs: tolerance_secs.max(0),
            compare: true,
            delete_extraneous: false,
        }
    }

    /// Remove destination entries that have no source counterpart
    pub fn with_delete(mut self, delete_extraneous: bool) -> Self {
        self.delete_extraneous = delete_extraneous;
        self
    }

    /// Transfer every source regardless of the destination (plain copy)
    pub fn unconditional(mut self) -> Self {
        self.compare = false;
        self
    }

    pub fn mode(&self) -> ComparisonMode {
        self.mode
    }

    /// Decide what to do with a source candidate and its destination match
    pub fn decide(
        &self,
        source: &TransferCandidate,
        dest: Option<&TransferCandidate>,
    ) -> SyncDecision {
        let Some(dest) = dest else {
            return SyncDecision::new(SyncAction::Transfer, DecisionReason::NewObject);
        };

        if !self.compare {
            return SyncDecision::new(SyncAction::Transfer, DecisionReason::Unconditional);
        }

        if source.size != dest.size {
            return SyncDecision::new(SyncAction::Transfer, DecisionReason::SizeDiffers);
        }

        let (Some(src_time), Some(dst_time)) = (source.last_modified, dest.last_modified) else {
            // Without both timestamps only the size can be compared
            return SyncDecision::new(SyncAction::Skip, DecisionReason::InSync);
        };

        let in_sync = match self.mode {
            ComparisonMode::SizeOnly => true,
            ComparisonMode::ExactTimestamps => dst_time >= src_time,
            ComparisonMode::Default => {
                // Full precision; a destination newer than the source is in sync
                let newer_by = src_time.duration_since(dst_time);
                newer_by <= SignedDuration::from_secs(self.tolerance_secs)
            }
        };

        if in_sync {
            SyncDecision::new(SyncAction::Skip, DecisionReason::InSync)
        } else {
            SyncDecision::new(SyncAction::Transfer, DecisionReason::TimestampDiffers)
        }
    }

    /// Decide what to do with a destination entry that has no source
    pub fn decide_orphan(&self, _dest: &TransferCandidate) -> Option<SyncDecision> {
        (self.delete_extraneous && self.compare)
            .then(|| SyncDecision::new(SyncAction::Delete, DecisionReason::Extraneous))
    }
}
