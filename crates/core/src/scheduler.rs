//! Worker pool
//!
//! Consumes a plan in order and runs its instructions on spawned tasks,
//! bounded by an instruction-slot semaphore. Multipart transfers draw their
//! parts from a separate part-slot pool, so a multipart instruction never
//! competes with its own parts for a slot.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use futures::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::attributes::ObjectAttributes;
use crate::body::{BodySource, FileSource, write_body_at};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::multipart::{MultipartCoordinator, MultipartOutcome};
use crate::path::{Location, RemotePath};
use crate::planner::{Operation, PlanItem, PlanStream, TransferInstruction};
use crate::report::{OutcomeHook, Report, ResultAggregator, TransferOutcome};
use crate::retry::{Attempted, is_retryable_error, retry_tracked};
use crate::traits::{ByteRange, StorageClient};

/// State shared by every worker of one run
struct WorkerContext {
    client: Arc<dyn StorageClient>,
    config: Arc<TransferConfig>,
    multipart: MultipartCoordinator,
    cancel: CancellationToken,
    /// Child of `cancel`; fired alone when the run must stop dispatching
    dispatch: CancellationToken,
    aggregator: ResultAggregator,
    attributes: ObjectAttributes,
    /// Delete each source after its transfer succeeds
    remove_source: bool,
}

/// Bounded-concurrency executor for a plan
pub struct Scheduler {
    client: Arc<dyn StorageClient>,
    config: Arc<TransferConfig>,
    concurrency: usize,
    dry_run: bool,
    cancel: CancellationToken,
    /// Fired when dispatch stops, so listings end early
    stop_listing: CancellationToken,
    attributes: ObjectAttributes,
    remove_source: bool,
    hook: Option<OutcomeHook>,
}

impl Scheduler {
    pub fn new(
        client: Arc<dyn StorageClient>,
        config: Arc<TransferConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = config.concurrency;
        Self {
            client,
            config,
            concurrency,
            dry_run: false,
            cancel,
            stop_listing: CancellationToken::new(),
            attributes: ObjectAttributes::default(),
            remove_source: false,
            hook: None,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn on_outcome(mut self, hook: Option<OutcomeHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Token the plan's listings watch; cancelled once dispatch stops
    pub fn stop_listing(mut self, stop: CancellationToken) -> Self {
        self.stop_listing = stop;
        self
    }

    /// Attributes for every object written by this run
    pub fn attributes(mut self, attributes: ObjectAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Delete each source once its transfer succeeded (move semantics)
    pub fn remove_source(mut self, remove_source: bool) -> Self {
        self.remove_source = remove_source;
        self
    }

    /// Run every item of `plan` and return the finalized report
    pub async fn run(&self, mut plan: PlanStream) -> Report {
        let aggregator = ResultAggregator::new(self.dry_run).with_hook(self.hook.clone());
        let dispatch = self.cancel.child_token();
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let part_slots = Arc::new(Semaphore::new(self.config.part_slots()));

        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            config: self.config.clone(),
            multipart: MultipartCoordinator::new(
                self.client.clone(),
                self.config.clone(),
                part_slots,
                self.cancel.clone(),
            ),
            cancel: self.cancel.clone(),
            dispatch: dispatch.clone(),
            aggregator: aggregator.clone(),
            attributes: self.attributes.clone(),
            remove_source: self.remove_source,
        });

        tracing::debug!(
            concurrency = self.concurrency,
            part_slots = self.config.part_slots(),
            dry_run = self.dry_run,
            "Starting transfer"
        );

        let mut workers = JoinSet::new();
        let mut seq = 0u64;
        let mut listing_stopped = false;

        loop {
            let item = tokio::select! {
                biased;
                _ = dispatch.cancelled(), if !listing_stopped => {
                    // Items already listed are still drained and reported
                    listing_stopped = true;
                    self.stop_listing.cancel();
                    continue;
                }
                item = plan.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            let item_seq = seq;
            seq += 1;

            let instruction = match item {
                PlanItem::Skipped { path, reason } => {
                    tracing::debug!(key = %path, %reason, "Skipped");
                    aggregator.record(TransferOutcome::skipped(item_seq, path, reason));
                    continue;
                }
                PlanItem::Unreadable { path, error } => {
                    tracing::warn!(key = %path, error = %error, "Cannot read entry");
                    aggregator.record(TransferOutcome::failed(item_seq, path, &error));
                    continue;
                }
                PlanItem::Truncated => {
                    tracing::info!("Listing stopped; remaining entries were not enumerated");
                    aggregator.mark_truncated();
                    continue;
                }
                PlanItem::Instruction(instruction) => instruction,
            };

            if self.dry_run {
                if instruction.operation == Operation::Remove {
                    tracing::info!("(dryrun) delete: {}", instruction.destination);
                } else {
                    tracing::info!(
                        "(dryrun) {}: {} to {}",
                        instruction.operation.as_str(),
                        instruction.source,
                        instruction.destination
                    );
                }
                aggregator.record(TransferOutcome::succeeded(item_seq, instruction, 0));
                continue;
            }

            let permit = if dispatch.is_cancelled() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = dispatch.cancelled() => None,
                    permit = slots.clone().acquire_owned() => permit.ok(),
                }
            };
            let Some(permit) = permit else {
                aggregator.record(TransferOutcome::not_attempted(item_seq, instruction));
                continue;
            };

            while workers.try_join_next().is_some() {}

            let ctx = ctx.clone();
            workers.spawn(async move {
                let _permit = permit;
                run_worker(&ctx, item_seq, instruction).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task did not finish");
            }
        }

        if self.cancel.is_cancelled() {
            aggregator.mark_cancelled();
        }
        aggregator.finalize()
    }
}

/// Execute one instruction and record exactly one outcome for it
async fn run_worker(ctx: &WorkerContext, seq: u64, instruction: TransferInstruction) {
    let path = instruction.path.clone();
    let run = AssertUnwindSafe(execute(ctx, &instruction)).catch_unwind().await;

    let outcome = match run {
        Ok(Attempted {
            result: Ok(bytes),
            failed_attempts,
        }) => {
            tracing::info!(
                key = %path,
                operation = instruction.operation.as_str(),
                bytes,
                "{}: {} to {}",
                instruction.operation.as_str(),
                instruction.source,
                instruction.destination
            );
            TransferOutcome::succeeded(seq, instruction, bytes).with_failed_attempts(failed_attempts)
        }
        Ok(Attempted {
            result: Err(error),
            failed_attempts,
        }) => {
            if error.is_run_fatal() && !matches!(error, Error::Cancelled) {
                tracing::error!(key = %path, error = %error, "Halting dispatch");
                ctx.aggregator.record_fatal(&error);
                ctx.dispatch.cancel();
            } else {
                tracing::warn!(key = %path, error = %error, attempts = failed_attempts, "Transfer failed");
            }
            TransferOutcome::failed(seq, path, &error)
                .with_instruction(instruction)
                .with_failed_attempts(failed_attempts)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(key = %path, panic = %message, "Worker panicked");
            TransferOutcome::failed(seq, path, &Error::General(format!("worker panicked: {message}")))
                .with_instruction(instruction)
        }
    };
    ctx.aggregator.record(outcome);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn execute(ctx: &WorkerContext, instruction: &TransferInstruction) -> Attempted<u64> {
    let transferred = transfer(ctx, instruction).await;
    if !ctx.remove_source || instruction.operation == Operation::Remove {
        return transferred;
    }
    let bytes = match &transferred.result {
        Ok(bytes) => *bytes,
        Err(_) => return transferred,
    };

    let removed = remove(ctx, &instruction.source).await;
    let failed_attempts = transferred.failed_attempts + removed.failed_attempts;
    match removed.result {
        Ok(_) => Attempted {
            result: Ok(bytes),
            failed_attempts,
        },
        Err(e) => {
            tracing::warn!(source = %instruction.source, error = %e, "Transferred but could not remove source");
            Attempted {
                result: Err(e),
                failed_attempts,
            }
        }
    }
}

async fn transfer(ctx: &WorkerContext, instruction: &TransferInstruction) -> Attempted<u64> {
    let endpoints = (&instruction.source, &instruction.destination);
    match (instruction.operation, endpoints) {
        (Operation::Put, (Location::Local(src), Location::Remote(dst))) => {
            upload(ctx, src, dst, instruction.size, instruction.multipart_required).await
        }
        (Operation::Get, (Location::Remote(src), Location::Local(dst))) => download(ctx, src, dst, instruction).await,
        (Operation::Copy, (Location::Remote(src), Location::Remote(dst))) => {
            copy(ctx, src, dst, instruction.size, instruction.multipart_required).await
        }
        (Operation::Remove, (_, target)) => remove(ctx, target).await,
        (operation, (src, dst)) => Attempted {
            result: Err(Error::General(format!(
                "cannot {} from {src} to {dst}",
                operation.as_str()
            ))),
            failed_attempts: 0,
        },
    }
}

fn from_multipart(outcome: MultipartOutcome) -> Attempted<u64> {
    Attempted {
        result: outcome.result,
        failed_attempts: outcome.failed_attempts,
    }
}

fn content_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
}

async fn upload(
    ctx: &WorkerContext,
    src: &Path,
    dst: &RemotePath,
    size: u64,
    multipart: bool,
) -> Attempted<u64> {
    let source = Arc::new(FileSource::new(src));
    let attributes = ctx.attributes.clone().or_content_type(content_type(src));

    if multipart {
        return from_multipart(ctx.multipart.upload(source, dst, size, &attributes).await);
    }

    let attributes = &attributes;
    let attempted = retry_tracked(
        &ctx.config.retry,
        Some(&ctx.cancel),
        || {
            let source = source.clone();
            async move {
                // Reopened per attempt so a retried or redirected request starts at byte 0
                let body = source.open(ByteRange::new(0, size)).await?;
                ctx.client.put_object(dst, body, size, attributes).await
            }
        },
        is_retryable_error,
    )
    .await;
    Attempted {
        result: attempted.result.map(|()| size),
        failed_attempts: attempted.failed_attempts,
    }
}

async fn copy(
    ctx: &WorkerContext,
    src: &RemotePath,
    dst: &RemotePath,
    size: u64,
    multipart: bool,
) -> Attempted<u64> {
    if multipart {
        return from_multipart(ctx.multipart.copy(src, dst, size, &ctx.attributes).await);
    }

    let attempted = retry_tracked(
        &ctx.config.retry,
        Some(&ctx.cancel),
        || ctx.client.copy_object(src, dst, &ctx.attributes),
        is_retryable_error,
    )
    .await;
    Attempted {
        result: attempted.result.map(|()| size),
        failed_attempts: attempted.failed_attempts,
    }
}

/// Sibling temporary path a download is written to before promotion
fn temp_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{name}.objsync-{}", std::process::id()))
}

async fn download(
    ctx: &WorkerContext,
    src: &RemotePath,
    dst: &Path,
    instruction: &TransferInstruction,
) -> Attempted<u64> {
    let size = instruction.size;
    if let Some(parent) = dst.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        return Attempted {
            result: Err(Error::from_io(parent.display().to_string(), e)),
            failed_attempts: 0,
        };
    }

    let temp = temp_path(dst);
    let attempted = if instruction.multipart_required {
        from_multipart(ctx.multipart.download(src, &temp, size).await)
    } else {
        let display = temp.display().to_string();
        let temp = temp.as_path();
        let display = display.as_str();
        retry_tracked(
            &ctx.config.retry,
            Some(&ctx.cancel),
            || async move {
                let body = ctx.client.get_object(src, None).await?;
                tokio::fs::File::create(temp)
                    .await
                    .map_err(|e| Error::from_io(display, e))?;
                write_body_at(temp, 0, body, size).await
            },
            is_retryable_error,
        )
        .await
    };

    let promoted = match attempted.result {
        Ok(bytes) => promote(&temp, dst, instruction).map(|()| bytes),
        Err(e) => Err(e),
    };
    if promoted.is_err()
        && let Err(e) = tokio::fs::remove_file(&temp).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %temp.display(), error = %e, "Failed to remove temporary file");
    }

    Attempted {
        result: promoted,
        failed_attempts: attempted.failed_attempts,
    }
}

/// Apply the source mtime and move the finished download into place
fn promote(temp: &Path, dst: &Path, instruction: &TransferInstruction) -> Result<()> {
    if let Some(modified) = instruction.last_modified {
        let file = std::fs::File::options()
            .write(true)
            .open(temp)
            .map_err(|e| Error::from_io(temp.display().to_string(), e))?;
        if let Err(e) = file.set_modified(SystemTime::from(modified)) {
            tracing::debug!(path = %temp.display(), error = %e, "Could not set modification time");
        }
    }
    std::fs::rename(temp, dst).map_err(|e| Error::from_io(dst.display().to_string(), e))
}

async fn remove(ctx: &WorkerContext, target: &Location) -> Attempted<u64> {
    match target {
        Location::Local(path) => {
            let result = match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(Error::from_io(path.display().to_string(), e)),
            };
            Attempted {
                result,
                failed_attempts: 0,
            }
        }
        Location::Remote(remote) => {
            let attempted = retry_tracked(
                &ctx.config.retry,
                Some(&ctx.cancel),
                || ctx.client.delete_object(remote),
                is_retryable_error,
            )
            .await;
            Attempted {
                result: attempted.result.map(|()| 0),
                failed_attempts: attempted.failed_attempts,
            }
        }
    }
}
