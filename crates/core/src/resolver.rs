//! Path resolution
//!
//! Turns a local directory tree or a remote key prefix into a sequence of
//! [`TransferCandidate`]s in ascending lexicographic order of their relative
//! paths. Both sides of a sync are resolved this way so the planner can
//! merge them in a single pass.
//!
//! Local trees are walked with `walkdir` on a blocking thread. Remote
//! prefixes are paged lazily, each page under the shared retry policy.

use std::collections::VecDeque;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::path::{Location, RemotePath};
use crate::retry::{is_retryable_error, retry_tracked};
use crate::traits::{ListOptions, StorageClient};

/// Candidates buffered between the walking thread and the planner
const LOCAL_WALK_BUFFER: usize = 256;

/// Keys requested per listing page
const LIST_PAGE_SIZE: i32 = 1000;

/// Stream of resolved candidates (or per-entry access errors)
pub type CandidateStream = BoxStream<'static, Result<TransferCandidate>>;

/// What kind of entry a candidate is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    LocalFile,
    RemoteObject,
    /// A symlink reported without being followed
    LocalSymlink,
    /// Socket, FIFO or device node
    LocalSpecial,
}

/// An entry considered for transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferCandidate {
    /// `/`-separated path relative to the resolved root
    pub path: String,
    /// Full locator of the entry
    pub location: Location,
    pub kind: CandidateKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// How a root is walked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub recursive: bool,
    pub follow_symlinks: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: true,
        }
    }
}

/// Retry and stop controls shared by the listings of one plan
#[derive(Debug, Clone, Default)]
pub struct ListingControl {
    /// Policy applied to every listing page and head request
    pub retry: RetryConfig,
    /// Once fired, a listing ends with [`Error::Cancelled`] before its next
    /// page or directory
    pub stop: CancellationToken,
}

/// Depth-first walk of a local tree.
///
/// Siblings are visited in name order with directories sorted as `name/`,
/// which makes the emitted relative paths globally sorted. Followed
/// symlinks that lead back to an ancestor are skipped. The walk can be
/// restarted from the root with [`LocalWalker::restart`].
pub struct LocalWalker {
    root: PathBuf,
    options: ResolveOptions,
    entries: Option<walkdir::IntoIter>,
    stop: Option<CancellationToken>,
    stopped: bool,
}

impl LocalWalker {
    pub fn new(root: impl Into<PathBuf>, options: ResolveOptions) -> Self {
        Self {
            root: root.into(),
            options,
            entries: None,
            stop: None,
            stopped: false,
        }
    }

    /// End the walk with [`Error::Cancelled`] at the next directory once
    /// `stop` fires
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Reset to the beginning of the walk
    pub fn restart(&mut self) {
        self.entries = None;
        self.stopped = false;
    }

    fn walk(&self) -> walkdir::IntoIter {
        let follow = self.options.follow_symlinks;
        let max_depth = if self.options.recursive { usize::MAX } else { 0 };
        WalkDir::new(&self.root)
            .follow_links(follow)
            .max_depth(max_depth)
            .sort_by(move |a, b| sort_key(a, follow).cmp(&sort_key(b, follow)))
            .into_iter()
    }

    fn should_stop(&self) -> bool {
        self.stop.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Map a walk error; `None` means the entry is skipped
    fn walk_error(&self, err: walkdir::Error) -> Option<Error> {
        if let Some(ancestor) = err.loop_ancestor() {
            tracing::warn!(
                path = %err.path().map(|p| p.display().to_string()).unwrap_or_default(),
                ancestor = %ancestor.display(),
                "Skipping symlink that loops back to an ancestor"
            );
            return None;
        }

        let path = err.path().unwrap_or(self.root.as_path()).to_path_buf();
        let display = path.display().to_string();
        let is_link = std::fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink());
        let depth = err.depth();
        match err.into_io_error() {
            // A missing root is an empty tree; callers validate sources up front
            Some(io) if depth == 0 && io.kind() == std::io::ErrorKind::NotFound => None,
            Some(io) if is_link => Some(Error::access(display, format!("broken symlink: {io}"))),
            Some(io) => Some(Error::from_io(display, io)),
            None => Some(Error::access(display, "walk failed")),
        }
    }

    fn candidate(&self, entry: DirEntry) -> Result<TransferCandidate> {
        let display = entry.path().display().to_string();
        let relative = if entry.depth() == 0 {
            entry.file_name().to_str().map(str::to_string)
        } else {
            relative_path(&self.root, entry.path())
        };
        let relative =
            relative.ok_or_else(|| Error::access(&display, "file name is not valid UTF-8"))?;

        let meta = entry.metadata().map_err(|e| match e.into_io_error() {
            Some(io) => Error::from_io(&display, io),
            None => Error::access(&display, "cannot read metadata"),
        })?;

        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            CandidateKind::LocalSymlink
        } else if file_type.is_file() {
            CandidateKind::LocalFile
        } else {
            CandidateKind::LocalSpecial
        };
        Ok(local_candidate(relative, entry.into_path(), kind, &meta))
    }
}

impl Iterator for LocalWalker {
    type Item = Result<TransferCandidate>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        if self.entries.is_none() {
            self.entries = Some(self.walk());
        }

        loop {
            let next = self.entries.as_mut()?.next()?;
            let entry = match next {
                Ok(entry) => entry,
                Err(err) => match self.walk_error(err) {
                    Some(e) => return Some(Err(e)),
                    None => continue,
                },
            };

            if entry.file_type().is_dir() {
                if entry.depth() > 0 && self.should_stop() {
                    self.stopped = true;
                    return Some(Err(Error::Cancelled));
                }
                continue;
            }
            return Some(self.candidate(entry));
        }
    }
}

/// Directories sort as `name/` so their contents land where their paths do
fn sort_key(entry: &DirEntry, follow: bool) -> String {
    let mut key = entry.file_name().to_string_lossy().into_owned();
    let is_dir = entry.file_type().is_dir()
        || (follow && entry.path_is_symlink() && entry.path().is_dir());
    if is_dir {
        key.push('/');
    }
    key
}

/// `/`-joined path of `path` below `root`
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in path.strip_prefix(root).ok()?.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?),
            _ => return None,
        }
    }
    Some(segments.join("/"))
}

fn local_candidate(
    relative: String,
    path: PathBuf,
    kind: CandidateKind,
    meta: &Metadata,
) -> TransferCandidate {
    TransferCandidate {
        path: relative,
        location: Location::Local(path),
        kind,
        size: meta.len(),
        last_modified: meta
            .modified()
            .ok()
            .and_then(|t| Timestamp::try_from(t).ok()),
        checksum: None,
    }
}

/// Resolve a local root into a candidate stream.
///
/// The walk runs on a blocking thread once the stream is first polled and
/// feeds a bounded channel, so it never stalls the runtime and stops when
/// the stream is dropped.
pub fn resolve_local(
    root: &Path,
    options: ResolveOptions,
    stop: CancellationToken,
) -> CandidateStream {
    let walker = LocalWalker::new(root, options).with_stop(stop);
    futures::stream::once(async move {
        let (tx, rx) = mpsc::channel(LOCAL_WALK_BUFFER);
        let walk = tokio::task::spawn_blocking(move || {
            for item in walker {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });
        futures::stream::unfold(Some((rx, walk)), |state| async move {
            let (mut rx, walk) = state?;
            match rx.recv().await {
                Some(item) => Some((item, Some((rx, walk)))),
                // A walk that died early must not look like a complete tree
                None => match walk.await {
                    Ok(()) => None,
                    Err(e) => {
                        let error = Error::General(format!("local walk failed: {e}"));
                        Some((Err(error), None))
                    }
                },
            }
        })
    })
    .flatten()
    .boxed()
}

struct RemoteListing {
    client: Arc<dyn StorageClient>,
    root: RemotePath,
    control: ListingControl,
    buffer: VecDeque<TransferCandidate>,
    token: Option<String>,
    last_key: Option<String>,
    done: bool,
}

impl RemoteListing {
    /// Fetch the next page into the buffer, retrying transient failures
    async fn fetch(&mut self) -> Result<()> {
        let options = ListOptions {
            max_keys: Some(LIST_PAGE_SIZE),
            continuation_token: self.token.take(),
        };
        let attempted = retry_tracked(
            &self.control.retry,
            Some(&self.control.stop),
            || self.client.list_objects(&self.root, options.clone()),
            is_retryable_error,
        )
        .await;
        if attempted.failed_attempts > 0 && attempted.result.is_ok() {
            tracing::debug!(
                prefix = %self.root,
                failed_attempts = attempted.failed_attempts,
                "Listing page succeeded after retry"
            );
        }
        let page = attempted.result?;

        self.done = !page.truncated || page.continuation_token.is_none();
        self.token = page.continuation_token;
        for item in page.items {
            if item.key.ends_with('/') {
                continue;
            }
            let Some(relative) = item.key.strip_prefix(&self.root.key) else {
                continue;
            };
            if relative.is_empty() {
                continue;
            }
            if self.last_key.as_deref().is_some_and(|last| last >= relative) {
                tracing::warn!(key = %item.key, "Listing returned keys out of order");
            }
            self.last_key = Some(relative.to_string());
            self.buffer.push_back(TransferCandidate {
                path: relative.to_string(),
                location: Location::Remote(RemotePath::new(&self.root.bucket, &item.key)),
                kind: CandidateKind::RemoteObject,
                size: item.size,
                last_modified: item.last_modified,
                checksum: item.etag,
            });
        }
        Ok(())
    }
}

/// Resolve a remote prefix into a candidate stream, paging lazily.
///
/// For recursive resolution the root key is treated as a directory prefix.
/// Non-recursive resolution yields the single object named by the root.
/// Buffered entries are still yielded after `control.stop` fires; only the
/// next page is never requested.
pub fn resolve_remote(
    client: Arc<dyn StorageClient>,
    root: RemotePath,
    options: ResolveOptions,
    control: &ListingControl,
) -> CandidateStream {
    let control = control.clone();
    if !options.recursive {
        return futures::stream::once(async move {
            let info = retry_tracked(
                &control.retry,
                Some(&control.stop),
                || client.head_object(&root),
                is_retryable_error,
            )
            .await
            .result?;
            Ok(TransferCandidate {
                path: root.file_name().unwrap_or_default().to_string(),
                location: Location::Remote(root.clone()),
                kind: CandidateKind::RemoteObject,
                size: info.size,
                last_modified: info.last_modified,
                checksum: info.etag,
            })
        })
        .boxed();
    }

    let state = RemoteListing {
        client,
        root: root.as_prefix(),
        control,
        buffer: VecDeque::new(),
        token: None,
        last_key: None,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(candidate) = state.buffer.pop_front() {
                return Some((Ok(candidate), state));
            }
            if state.done {
                return None;
            }
            if state.control.stop.is_cancelled() {
                state.done = true;
                return Some((Err(Error::Cancelled), state));
            }
            if let Err(e) = state.fetch().await {
                state.done = true;
                return Some((Err(e), state));
            }
        }
    })
    .boxed()
}

/// Resolve any location into a candidate stream
pub fn resolve(
    client: Arc<dyn StorageClient>,
    root: &Location,
    options: ResolveOptions,
    control: &ListingControl,
) -> CandidateStream {
    match root {
        Location::Local(path) => resolve_local(path, options, control.stop.clone()),
        Location::Remote(remote) => resolve_remote(client, remote.clone(), options, control),
    }
}
