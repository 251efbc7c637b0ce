//! Transfer planning
//!
//! Resolves both endpoints into sorted candidate streams, filters them and
//! merge-joins them on the relative path. Each step of the join yields a
//! [`PlanItem`]; the resulting stream is lazy, so a plan over millions of
//! keys never materialises in memory.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::compare::{Comparator, SyncAction};
use crate::config::TransferConfig;
use crate::engine::SyncOptions;
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::path::Location;
use crate::resolver::{
    self, CandidateKind, CandidateStream, ListingControl, ResolveOptions, TransferCandidate,
};
use crate::traits::StorageClient;

/// Lazy sequence of plan items in ascending path order
pub type PlanStream = BoxStream<'static, PlanItem>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Local file to remote object
    Put,
    /// Remote object to local file
    Get,
    /// Remote object to remote object
    Copy,
    /// Delete the destination entry
    Remove,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Put => "upload",
            Operation::Get => "download",
            Operation::Copy => "copy",
            Operation::Remove => "delete",
        }
    }
}

/// A unit of work for the scheduler.
///
/// For [`Operation::Remove`] both locators name the entry being deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferInstruction {
    pub operation: Operation,
    /// Path relative to the transfer roots
    pub path: String,
    pub source: Location,
    pub destination: Location,
    pub size: u64,
    pub multipart_required: bool,
    /// Source mtime, applied to downloaded files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The comparator found the destination in sync
    UpToDate,
    SymlinkNotFollowed,
    /// Socket, FIFO or device node
    SpecialFile,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::UpToDate => write!(f, "up to date"),
            SkipReason::SymlinkNotFollowed => write!(f, "symlink not followed"),
            SkipReason::SpecialFile => write!(f, "not a regular file"),
        }
    }
}

/// One element of a plan
#[derive(Debug)]
pub enum PlanItem {
    Instruction(TransferInstruction),
    Skipped { path: String, reason: SkipReason },
    /// A candidate that could not be resolved
    Unreadable { path: String, error: Error },
    /// Listing was stopped; entries past this point were never enumerated
    Truncated,
}

impl PlanItem {
    pub fn path(&self) -> &str {
        match self {
            PlanItem::Instruction(instruction) => &instruction.path,
            PlanItem::Skipped { path, .. } | PlanItem::Unreadable { path, .. } => path,
            PlanItem::Truncated => "",
        }
    }

    pub fn instruction(&self) -> Option<&TransferInstruction> {
        match self {
            PlanItem::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }
}

/// Where destination entries land
#[derive(Debug, Clone)]
enum Target {
    /// `root` joined with each relative path
    Tree(Location),
    /// A single explicit destination for a single-entry source
    Single(Location),
}

impl Target {
    fn locate(&self, relative: &str) -> Location {
        match self {
            Target::Tree(root) => root.join(relative),
            Target::Single(location) => location.clone(),
        }
    }
}

struct Merge {
    source: CandidateStream,
    dest: Option<CandidateStream>,
    source_head: Option<TransferCandidate>,
    dest_head: Option<TransferCandidate>,
    source_done: bool,
    dest_done: bool,
    /// Set once either side failed; deletions stop from then on
    source_failed: bool,
    dest_failed: bool,
    filters: FilterSet,
    comparator: Comparator,
    config: Arc<TransferConfig>,
    operation: Operation,
    target: Target,
    ready: VecDeque<PlanItem>,
}

impl Merge {
    /// Stop merging after a listing was stopped
    fn truncate(&mut self) -> PlanItem {
        self.source_done = true;
        self.dest_done = true;
        self.source_failed = true;
        self.dest_failed = true;
        self.source_head = None;
        self.dest_head = None;
        tracing::debug!("Listing stopped; plan truncated");
        PlanItem::Truncated
    }

    /// Pull the next included source candidate, surfacing errors as items
    async fn fill_source(&mut self) -> Option<PlanItem> {
        while self.source_head.is_none() && !self.source_done {
            match self.source.next().await {
                None => self.source_done = true,
                Some(Err(Error::Cancelled)) => return Some(self.truncate()),
                Some(Err(error)) => {
                    if !self.source_failed {
                        tracing::warn!(error = %error, "Source entry unreadable; extraneous entries will be kept");
                    }
                    self.source_failed = true;
                    return Some(PlanItem::Unreadable {
                        path: error_path(&error),
                        error,
                    });
                }
                Some(Ok(candidate)) => {
                    if self.filters.included(&candidate.path) {
                        self.source_head = Some(candidate);
                    } else {
                        tracing::debug!(key = %candidate.path, "Excluded by filter");
                    }
                }
            }
        }
        None
    }

    async fn fill_dest(&mut self) -> Option<PlanItem> {
        let Some(dest) = self.dest.as_mut() else {
            self.dest_done = true;
            return None;
        };
        while self.dest_head.is_none() && !self.dest_done {
            match dest.next().await {
                None => self.dest_done = true,
                Some(Err(Error::Cancelled)) => return Some(self.truncate()),
                Some(Err(error)) => {
                    tracing::warn!(error = %error, "Destination listing failed; extraneous entries will be kept");
                    self.dest_failed = true;
                    return Some(PlanItem::Unreadable {
                        path: error_path(&error),
                        error,
                    });
                }
                Some(Ok(candidate)) => {
                    // Excluded destination entries are invisible, so never deleted
                    if self.filters.included(&candidate.path) {
                        self.dest_head = Some(candidate);
                    }
                }
            }
        }
        None
    }

    async fn step(&mut self) -> Option<PlanItem> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if let Some(item) = self.fill_source().await {
                return Some(item);
            }
            if let Some(item) = self.fill_dest().await {
                return Some(item);
            }

            let order = match (&self.source_head, &self.dest_head) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(source), Some(dest)) => source.path.as_str().cmp(dest.path.as_str()),
            };

            match order {
                Ordering::Less => {
                    if let Some(source) = self.source_head.take() {
                        self.ready.push_back(self.plan_source(source, None));
                    }
                }
                Ordering::Equal => {
                    if let (Some(source), Some(dest)) =
                        (self.source_head.take(), self.dest_head.take())
                    {
                        self.ready.push_back(self.plan_source(source, Some(dest)));
                    }
                }
                Ordering::Greater => {
                    if let Some(dest) = self.dest_head.take()
                        && let Some(item) = self.plan_orphan(dest)
                    {
                        self.ready.push_back(item);
                    }
                }
            }
        }
    }

    fn plan_source(&self, source: TransferCandidate, dest: Option<TransferCandidate>) -> PlanItem {
        match source.kind {
            CandidateKind::LocalSymlink => {
                tracing::warn!(key = %source.path, "Skipping symlink (not following symlinks)");
                return PlanItem::Skipped {
                    path: source.path,
                    reason: SkipReason::SymlinkNotFollowed,
                };
            }
            CandidateKind::LocalSpecial => {
                tracing::warn!(key = %source.path, "Skipping file that is not a regular file");
                return PlanItem::Skipped {
                    path: source.path,
                    reason: SkipReason::SpecialFile,
                };
            }
            CandidateKind::LocalFile | CandidateKind::RemoteObject => {}
        }

        let decision = self.comparator.decide(&source, dest.as_ref());
        tracing::trace!(key = %source.path, ?decision, "Compared");
        match decision.action {
            SyncAction::Transfer => {
                let destination = self.target.locate(&source.path);
                PlanItem::Instruction(TransferInstruction {
                    operation: self.operation,
                    multipart_required: self.config.requires_multipart(source.size),
                    size: source.size,
                    last_modified: source.last_modified,
                    destination,
                    source: source.location,
                    path: source.path,
                })
            }
            SyncAction::Skip | SyncAction::Delete => PlanItem::Skipped {
                path: source.path,
                reason: SkipReason::UpToDate,
            },
        }
    }

    fn plan_orphan(&self, dest: TransferCandidate) -> Option<PlanItem> {
        // A partial listing on either side cannot prove an entry extraneous
        if self.source_failed || self.dest_failed {
            return None;
        }
        let decision = self.comparator.decide_orphan(&dest)?;
        (decision.action == SyncAction::Delete).then(|| {
            PlanItem::Instruction(removal(
                dest.path,
                dest.location,
                dest.size,
                dest.last_modified,
            ))
        })
    }
}

fn error_path(error: &Error) -> String {
    match error {
        Error::Access { path, .. } => path.clone(),
        other => other.to_string(),
    }
}

fn operation_for(source: &Location, dest: &Location) -> Result<Operation> {
    match (source.is_remote(), dest.is_remote()) {
        (false, true) => Ok(Operation::Put),
        (true, false) => Ok(Operation::Get),
        (true, true) => Ok(Operation::Copy),
        (false, false) => Err(Error::InvalidPath(
            "At least one of source and destination must be a remote location".to_string(),
        )),
    }
}

/// Check the endpoints before any listing starts
fn validate(source: &Location, dest: &Location, options: &SyncOptions) -> Result<()> {
    operation_for(source, dest)?;

    if options.remove_source && source == dest {
        return Err(Error::InvalidPath(format!("Cannot move {source} onto itself")));
    }

    if let Location::Local(path) = source {
        let meta = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::InvalidPath(format!("The source does not exist: {}", path.display()))
            } else {
                Error::from_io(path.display().to_string(), e)
            }
        })?;
        if meta.is_dir() && !options.recursive {
            return Err(Error::InvalidPath(format!(
                "{} is a directory (use --recursive)",
                path.display()
            )));
        }
    }

    if let Location::Local(path) = dest
        && options.recursive
        && path.is_file()
    {
        return Err(Error::InvalidPath(format!(
            "Destination {} is a file, not a directory",
            path.display()
        )));
    }

    Ok(())
}

/// Build the lazy plan for transferring `source` into `dest`.
///
/// Once `stop` fires, listings end before their next page or directory and
/// the plan finishes with [`PlanItem::Truncated`].
pub fn plan(
    client: Arc<dyn StorageClient>,
    config: Arc<TransferConfig>,
    source: &Location,
    dest: &Location,
    options: &SyncOptions,
    stop: CancellationToken,
) -> Result<PlanStream> {
    validate(source, dest, options)?;
    let operation = operation_for(source, dest)?;
    let filters = FilterSet::new(&options.rules)?;

    let mut comparator = Comparator::new(options.comparison_mode, config.clock_skew_tolerance_secs)
        .with_delete(options.delete_extraneous);
    if !options.compare {
        comparator = comparator.unconditional();
    }

    let source_options = ResolveOptions {
        recursive: options.recursive,
        follow_symlinks: options.follow_symlinks,
    };
    let control = ListingControl {
        retry: config.retry.clone(),
        stop,
    };
    let source_stream = resolver::resolve(client.clone(), source, source_options, &control);

    let (target, dest_stream) = if options.recursive {
        let dest_stream = options
            .compare
            .then(|| resolver::resolve(client.clone(), dest, source_options, &control));
        (Target::Tree(dest.clone()), dest_stream)
    } else {
        let name = source.file_name().ok_or_else(|| {
            Error::InvalidPath(format!("Source has no file name: {source}"))
        })?;
        let location = if dest.is_directory_like() {
            dest.join(&name)
        } else {
            dest.clone()
        };
        let dest_stream = options.compare.then(|| {
            single_entry(client.clone(), &location, name.clone(), source_options, &control)
        });
        (Target::Single(location), dest_stream)
    };

    tracing::debug!(
        source = %source,
        destination = %dest,
        operation = operation.as_str(),
        recursive = options.recursive,
        "Planning transfer"
    );

    let merge = Merge {
        source: source_stream,
        dest: dest_stream,
        source_head: None,
        dest_head: None,
        source_done: false,
        dest_done: false,
        source_failed: false,
        dest_failed: false,
        filters,
        comparator,
        config,
        operation,
        target,
        ready: VecDeque::new(),
    };

    Ok(futures::stream::unfold(merge, |mut merge| async move {
        let item = merge.step().await?;
        Some((item, merge))
    })
    .boxed())
}

/// Build the lazy plan for deleting `target`: one object, or with
/// `options.recursive` every included object under the prefix.
///
/// A single key is deleted without checking that it exists.
pub fn plan_removal(
    client: Arc<dyn StorageClient>,
    config: Arc<TransferConfig>,
    target: &Location,
    options: &SyncOptions,
    stop: CancellationToken,
) -> Result<PlanStream> {
    let Location::Remote(root) = target else {
        return Err(Error::InvalidPath(format!(
            "Only remote objects can be removed: {target}"
        )));
    };
    let filters = FilterSet::new(&options.rules)?;

    if !options.recursive {
        let names_prefix = root.key.is_empty() || root.key.ends_with('/');
        let Some(name) = root.file_name().filter(|_| !names_prefix) else {
            return Err(Error::InvalidPath(format!(
                "{target} names a prefix (use --recursive)"
            )));
        };
        let item = filters.included(name).then(|| {
            PlanItem::Instruction(removal(name.to_string(), target.clone(), 0, None))
        });
        return Ok(futures::stream::iter(item).boxed());
    }

    let control = ListingControl {
        retry: config.retry.clone(),
        stop,
    };
    let listing = resolver::resolve(client, target, ResolveOptions::default(), &control);
    tracing::debug!(target = %target, "Planning removal");

    Ok(futures::stream::unfold(
        (listing, filters, false),
        |(mut listing, filters, done)| async move {
            if done {
                return None;
            }
            loop {
                let item = match listing.next().await? {
                    Ok(candidate) if filters.included(&candidate.path) => {
                        PlanItem::Instruction(removal(
                            candidate.path,
                            candidate.location,
                            candidate.size,
                            candidate.last_modified,
                        ))
                    }
                    Ok(candidate) => {
                        tracing::debug!(key = %candidate.path, "Excluded by filter");
                        continue;
                    }
                    Err(Error::Cancelled) => {
                        return Some((PlanItem::Truncated, (listing, filters, true)));
                    }
                    Err(error) => PlanItem::Unreadable {
                        path: error_path(&error),
                        error,
                    },
                };
                return Some((item, (listing, filters, false)));
            }
        },
    )
    .boxed())
}

fn removal(
    path: String,
    location: Location,
    size: u64,
    last_modified: Option<Timestamp>,
) -> TransferInstruction {
    TransferInstruction {
        operation: Operation::Remove,
        path,
        source: location.clone(),
        destination: location,
        size,
        multipart_required: false,
        last_modified,
    }
}

/// Resolve an explicit single destination, renamed to the source's path so
/// the merge pairs them. A missing destination is simply absent.
fn single_entry(
    client: Arc<dyn StorageClient>,
    location: &Location,
    name: String,
    options: ResolveOptions,
    control: &ListingControl,
) -> CandidateStream {
    let options = ResolveOptions {
        recursive: false,
        ..options
    };
    resolver::resolve(client, location, options, control)
        .filter_map(move |item| {
            let name = name.clone();
            async move {
                match item {
                    Ok(mut candidate) => {
                        candidate.path = name;
                        Some(Ok(candidate))
                    }
                    Err(Error::NotFound(_)) => None,
                    Err(e) => Some(Err(e)),
                }
            }
        })
        .boxed()
}
