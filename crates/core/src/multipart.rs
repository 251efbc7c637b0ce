//! Multipart transfers
//!
//! Large objects are split into contiguous parts that are transferred
//! independently under the shared retry policy. Uploads and remote copies
//! run a remote session (initiate, parts, complete or abort); downloads run
//! a local session whose parts are ranged reads written at their offsets.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::attributes::ObjectAttributes;
use crate::body::{BodySource, write_body_at};
use crate::config::{MIN_REMOTE_PART_SIZE, TransferConfig};
use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::retry::{Attempted, is_retryable_error, retry_tracked};
use crate::traits::{ByteRange, CompletedPart, StorageClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// One part of a multipart transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartDescriptor {
    /// 1-based part number
    pub index: u32,
    pub range: ByteRange,
    pub state: PartState,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Backend part id (ETag) once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
}

impl PartDescriptor {
    pub fn failed_attempts(&self) -> u32 {
        match self.state {
            PartState::Completed => self.attempts.saturating_sub(1),
            _ => self.attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Initiated,
    InProgress,
    Completing,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultipartSession {
    /// Backend upload id; `None` for local (download) sessions
    pub upload_id: Option<String>,
    pub parts: Vec<PartDescriptor>,
    pub state: SessionState,
}

impl MultipartSession {
    fn new(upload_id: Option<String>, parts: Vec<PartDescriptor>) -> Self {
        Self {
            upload_id,
            parts,
            state: SessionState::Initiated,
        }
    }

    pub fn failed_attempts(&self) -> u32 {
        self.parts.iter().map(PartDescriptor::failed_attempts).sum()
    }

    fn completed_parts(&self) -> Result<Vec<CompletedPart>> {
        self.parts
            .iter()
            .map(|part| match (&part.state, &part.part_id) {
                (PartState::Completed, Some(etag)) => Ok(CompletedPart {
                    part_number: part.index,
                    etag: etag.clone(),
                }),
                _ => Err(Error::General(format!(
                    "part {} has not completed",
                    part.index
                ))),
            })
            .collect()
    }
}

/// Split `size` bytes into contiguous parts.
///
/// The part size doubles until the part count fits within `max_parts`.
pub fn partition(size: u64, part_size: u64, max_parts: u32) -> Vec<PartDescriptor> {
    let mut part_size = part_size.max(1);
    while size.div_ceil(part_size) > u64::from(max_parts.max(1)) {
        part_size = part_size.saturating_mul(2);
    }

    let mut parts = Vec::with_capacity(size.div_ceil(part_size) as usize);
    let mut start = 0;
    let mut index = 1;
    while start < size {
        let end = (start + part_size).min(size);
        parts.push(PartDescriptor {
            index,
            range: ByteRange::new(start, end),
            state: PartState::Pending,
            attempts: 0,
            part_id: None,
        });
        start = end;
        index += 1;
    }
    parts
}

/// Result of one multipart transfer
#[derive(Debug)]
pub struct MultipartOutcome {
    /// Bytes transferred on success
    pub result: Result<u64>,
    /// Session state as it ended; `None` when initiation failed
    pub session: Option<MultipartSession>,
    /// Failed attempts across initiation, parts and completion
    pub failed_attempts: u32,
}

impl MultipartOutcome {
    fn failed(error: Error, failed_attempts: u32, session: Option<MultipartSession>) -> Self {
        Self {
            result: Err(error),
            session,
            failed_attempts,
        }
    }
}

/// Drives multipart sessions against a [`StorageClient`]
#[derive(Clone)]
pub struct MultipartCoordinator {
    client: Arc<dyn StorageClient>,
    config: Arc<TransferConfig>,
    part_slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl MultipartCoordinator {
    /// `part_slots` bounds in-flight parts across every session sharing it
    pub fn new(
        client: Arc<dyn StorageClient>,
        config: Arc<TransferConfig>,
        part_slots: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            part_slots,
            cancel,
        }
    }

    fn remote_part_size(&self) -> u64 {
        self.config.part_size.max(MIN_REMOTE_PART_SIZE)
    }

    /// Upload `size` bytes from `source` to `dest`
    pub async fn upload(
        &self,
        source: Arc<dyn BodySource>,
        dest: &RemotePath,
        size: u64,
        attributes: &ObjectAttributes,
    ) -> MultipartOutcome {
        let parts = partition(size, self.remote_part_size(), self.config.max_parts);
        let client = self.client.clone();
        self.run_remote(dest, size, parts, attributes, |upload_id, index, range| {
            let source = source.clone();
            let client = client.clone();
            let dest = dest.clone();
            async move {
                // A fresh view of the range on every attempt
                let body = source.open(range).await?;
                client
                    .upload_part(&dest, &upload_id, index, body, range.len())
                    .await
            }
        })
        .await
    }

    /// Server-side copy of `size` bytes from `src` to `dest`.
    ///
    /// Part copies carry no metadata, so the session is created with the
    /// source's headers unless `attributes` replaces them.
    pub async fn copy(
        &self,
        src: &RemotePath,
        dest: &RemotePath,
        size: u64,
        attributes: &ObjectAttributes,
    ) -> MultipartOutcome {
        let Attempted {
            result,
            failed_attempts: head_failures,
        } = retry_tracked(
            &self.config.retry,
            Some(&self.cancel),
            || self.client.head_object(src),
            is_retryable_error,
        )
        .await;
        let attributes = match result {
            Ok(info) => attributes.inherit(&info),
            Err(e) => return MultipartOutcome::failed(e, head_failures, None),
        };

        let parts = partition(size, self.remote_part_size(), self.config.max_parts);
        let client = self.client.clone();
        let mut outcome = self
            .run_remote(dest, size, parts, &attributes, |upload_id, index, range| {
                let client = client.clone();
                let src = src.clone();
                let dest = dest.clone();
                async move {
                    client
                        .upload_part_copy(&src, &dest, &upload_id, index, range)
                        .await
                }
            })
            .await;
        outcome.failed_attempts += head_failures;
        outcome
    }

    /// Download `size` bytes of `src` into `temp_path` with ranged reads.
    ///
    /// The file is created (or truncated) and pre-sized; the caller promotes
    /// it once this returns successfully.
    pub async fn download(&self, src: &RemotePath, temp_path: &Path, size: u64) -> MultipartOutcome {
        let display = temp_path.display().to_string();
        let prepared = async {
            let file = tokio::fs::File::create(temp_path)
                .await
                .map_err(|e| Error::from_io(&display, e))?;
            file.set_len(size)
                .await
                .map_err(|e| Error::from_io(&display, e))
        };
        if let Err(e) = prepared.await {
            return MultipartOutcome::failed(e, 0, None);
        }

        let mut session = MultipartSession::new(
            None,
            partition(size, self.config.part_size, self.config.max_parts),
        );
        let client = self.client.clone();
        let halted = self
            .run_parts(&mut session, &src.key, |index, range| {
                let client = client.clone();
                let src = src.clone();
                async move {
                    let body = client.get_object(&src, Some(range)).await?;
                    write_body_at(temp_path, range.start, body, range.len()).await?;
                    Ok(format!("{index}"))
                }
            })
            .await;

        let failed_attempts = session.failed_attempts();
        match halted {
            Some(e) => {
                session.state = SessionState::Aborted;
                MultipartOutcome::failed(e, failed_attempts, Some(session))
            }
            None => {
                session.state = SessionState::Completed;
                MultipartOutcome {
                    result: Ok(size),
                    session: Some(session),
                    failed_attempts,
                }
            }
        }
    }

    /// Initiate, transfer parts, then complete or abort a remote session
    async fn run_remote<F, Fut>(
        &self,
        dest: &RemotePath,
        size: u64,
        parts: Vec<PartDescriptor>,
        attributes: &ObjectAttributes,
        op: F,
    ) -> MultipartOutcome
    where
        F: Fn(String, u32, ByteRange) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let Attempted {
            result,
            failed_attempts: init_failures,
        } = retry_tracked(
            &self.config.retry,
            Some(&self.cancel),
            || self.client.create_multipart(dest, attributes),
            is_retryable_error,
        )
        .await;
        let upload_id = match result {
            Ok(id) => id,
            Err(e) => return MultipartOutcome::failed(e, init_failures, None),
        };

        tracing::debug!(
            key = %dest.key,
            upload_id = %upload_id,
            parts = parts.len(),
            "Started multipart upload"
        );

        let mut session = MultipartSession::new(Some(upload_id.clone()), parts);
        let halted = self
            .run_parts(&mut session, &dest.key, |index, range| {
                op(upload_id.clone(), index, range)
            })
            .await;

        let mut failed_attempts = init_failures + session.failed_attempts();
        if let Some(e) = halted {
            self.abort(dest, &mut session).await;
            return MultipartOutcome::failed(e, failed_attempts, Some(session));
        }

        session.state = SessionState::Completing;
        let completed = match session.completed_parts() {
            Ok(parts) => {
                let attempted = retry_tracked(
                    &self.config.retry,
                    None,
                    || {
                        self.client
                            .complete_multipart(dest, &upload_id, parts.clone())
                    },
                    is_retryable_error,
                )
                .await;
                failed_attempts += attempted.failed_attempts;
                attempted.result
            }
            Err(e) => Err(e),
        };

        match completed {
            Ok(()) => {
                session.state = SessionState::Completed;
                MultipartOutcome {
                    result: Ok(size),
                    session: Some(session),
                    failed_attempts,
                }
            }
            Err(e) => {
                self.abort(dest, &mut session).await;
                MultipartOutcome::failed(e, failed_attempts, Some(session))
            }
        }
    }

    /// Best-effort abort; failures are only logged
    async fn abort(&self, dest: &RemotePath, session: &mut MultipartSession) {
        session.state = SessionState::Aborted;
        let Some(upload_id) = session.upload_id.as_deref() else {
            return;
        };
        match self.client.abort_multipart(dest, upload_id).await {
            Ok(()) => tracing::debug!(key = %dest.key, upload_id, "Aborted multipart upload"),
            Err(e) => tracing::warn!(
                key = %dest.key,
                upload_id,
                error = %e,
                "Failed to abort multipart upload"
            ),
        }
    }

    /// Dispatch every part of `session`, each under its own retry budget.
    ///
    /// Returns the error that halted the session: the first unrecoverable
    /// part failure, or cancellation. No part is dispatched after that.
    async fn run_parts<F, Fut>(
        &self,
        session: &mut MultipartSession,
        key: &str,
        op: F,
    ) -> Option<Error>
    where
        F: Fn(u32, ByteRange) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        session.state = SessionState::InProgress;
        let halt = self.cancel.child_token();
        let retry = &self.config.retry;
        let op = &op;
        let launch = |index: u32, range: ByteRange, permit: OwnedSemaphorePermit| {
            let halt = &halt;
            async move {
                let _permit = permit;
                let attempted = tokio::select! {
                    _ = halt.cancelled() => Attempted {
                        result: Err(Error::Cancelled),
                        failed_attempts: 0,
                    },
                    attempted = retry_tracked(retry, Some(halt), || op(index, range), is_retryable_error) => attempted,
                };
                (index, attempted)
            }
        };

        let mut running = FuturesUnordered::new();
        let mut next = 0;
        let mut failure: Option<Error> = None;

        loop {
            let can_dispatch = failure.is_none() && next < session.parts.len() && !halt.is_cancelled();
            if !can_dispatch && running.is_empty() {
                break;
            }

            tokio::select! {
                permit = self.part_slots.clone().acquire_owned(), if can_dispatch => {
                    let Ok(permit) = permit else {
                        failure = Some(Error::Cancelled);
                        halt.cancel();
                        continue;
                    };
                    let part = &mut session.parts[next];
                    part.state = PartState::InFlight;
                    next += 1;
                    running.push(launch(part.index, part.range, permit));
                }
                Some((index, attempted)) = running.next(), if !running.is_empty() => {
                    let Some(part) = session.parts.iter_mut().find(|p| p.index == index) else {
                        continue;
                    };
                    match attempted.result {
                        Ok(part_id) => {
                            part.state = PartState::Completed;
                            part.attempts = attempted.failed_attempts + 1;
                            part.part_id = Some(part_id);
                        }
                        Err(e) => {
                            part.state = PartState::Failed;
                            part.attempts = attempted.failed_attempts;
                            if failure.is_none() {
                                if !matches!(e, Error::Cancelled) {
                                    tracing::warn!(key, part = index, error = %e, "Part failed; halting session");
                                }
                                failure = Some(e);
                                halt.cancel();
                            }
                        }
                    }
                }
                _ = halt.cancelled(), if can_dispatch => {}
            }
        }

        if failure.is_none() && self.cancel.is_cancelled() {
            failure = Some(Error::Cancelled);
        }
        failure
    }
}
