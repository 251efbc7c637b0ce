//! objsync-core: Sync and transfer engine for the objsync CLI
//!
//! This crate provides the engine behind `objsync sync` and `objsync cp`:
//! - Path resolution of local trees and remote prefixes into candidates
//! - Include/exclude filtering and sync comparison
//! - Planning of put/get/copy/remove instructions
//! - Bounded-concurrency execution with retry and multipart transfers
//! - Result aggregation into a final report
//!
//! The engine is independent of any specific S3 SDK. Storage access goes
//! through the [`StorageClient`] trait, which keeps the engine testable
//! against in-memory fakes.

pub mod attributes;
pub mod body;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod multipart;
pub mod path;
pub mod planner;
pub mod report;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod traits;

pub use attributes::{Grants, ObjectAttributes};
pub use body::{BodySource, FileSource};
pub use compare::{ComparisonMode, Comparator, DecisionReason, SyncAction, SyncDecision};
pub use config::{RetryConfig, TransferConfig};
pub use engine::{SyncEngine, SyncOptions};
pub use error::{Error, ErrorClass, Result};
pub use filter::{FilterAction, FilterRule, FilterSet};
pub use multipart::{
    MultipartCoordinator, MultipartSession, PartDescriptor, PartState, SessionState, partition,
};
pub use path::{Location, RemotePath, parse_location};
pub use planner::{Operation, PlanItem, PlanStream, SkipReason, TransferInstruction};
pub use report::{OutcomeHook, OutcomeStatus, Report, ResultAggregator, TransferOutcome};
pub use resolver::{CandidateKind, ListingControl, ResolveOptions, TransferCandidate};
pub use retry::{Attempted, is_retryable_error, retry_tracked};
pub use traits::{
    ByteRange, ByteStream, CompletedPart, ListOptions, ListResult, ObjectInfo, StorageClient,
};
