//! Engine facade
//!
//! [`SyncEngine`] ties the pieces together: [`SyncEngine::plan`] builds the
//! lazy plan, [`SyncEngine::execute`] runs it through the scheduler, and
//! [`SyncEngine::cancel`] stops the run from any task.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::attributes::ObjectAttributes;
use crate::compare::ComparisonMode;
use crate::config::TransferConfig;
use crate::error::Result;
use crate::filter::FilterRule;
use crate::path::Location;
use crate::planner::{self, PlanStream};
use crate::report::{OutcomeHook, Report};
use crate::scheduler::Scheduler;
use crate::traits::StorageClient;

/// Per-run options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub follow_symlinks: bool,
    /// Delete destination entries with no source counterpart
    pub delete_extraneous: bool,
    pub comparison_mode: ComparisonMode,
    /// Include/exclude rules in declaration order
    pub rules: Vec<FilterRule>,
    /// Overrides `TransferConfig::concurrency`
    pub concurrency: Option<usize>,
    pub dry_run: bool,
    /// Walk the whole tree under the source; otherwise transfer one entry
    pub recursive: bool,
    /// Compare against the destination; when false every source transfers
    pub compare: bool,
    /// Delete each source after it transferred (move)
    pub remove_source: bool,
    /// Metadata, storage class, encryption and ACL for written objects
    pub attributes: ObjectAttributes,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            delete_extraneous: false,
            comparison_mode: ComparisonMode::Default,
            rules: Vec::new(),
            concurrency: None,
            dry_run: false,
            recursive: true,
            compare: true,
            remove_source: false,
            attributes: ObjectAttributes::default(),
        }
    }
}

impl SyncOptions {
    /// Options for a plain copy: no comparison, no deletion
    pub fn copy(recursive: bool) -> Self {
        Self {
            recursive,
            compare: false,
            ..Self::default()
        }
    }

    /// Options for a move: a copy that removes each source afterwards
    pub fn moving(recursive: bool) -> Self {
        Self {
            remove_source: true,
            ..Self::copy(recursive)
        }
    }
}

/// Sync/transfer engine over a [`StorageClient`]
pub struct SyncEngine {
    client: Arc<dyn StorageClient>,
    config: Arc<TransferConfig>,
    cancel: CancellationToken,
    /// Watched by listings; fired when dispatch stops
    listing: Mutex<CancellationToken>,
    progress: Option<OutcomeHook>,
}

impl SyncEngine {
    pub fn new(client: Arc<dyn StorageClient>, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            listing: Mutex::new(CancellationToken::new()),
            progress: None,
        })
    }

    /// Call `hook` for every outcome as it is recorded
    pub fn with_progress(mut self, hook: OutcomeHook) -> Self {
        self.progress = Some(hook);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Build the lazy plan for transferring `source` into `dest`.
    ///
    /// Fails up front for invalid endpoints or filter patterns; listing
    /// failures surface later as unreadable plan items.
    pub fn plan(
        &self,
        source: &Location,
        dest: &Location,
        options: &SyncOptions,
    ) -> Result<PlanStream> {
        planner::plan(
            self.client.clone(),
            self.config.clone(),
            source,
            dest,
            options,
            self.listing_token(),
        )
    }

    /// Build the lazy plan deleting `target` (one key, or every key under
    /// it with `options.recursive`)
    pub fn plan_removal(&self, target: &Location, options: &SyncOptions) -> Result<PlanStream> {
        planner::plan_removal(
            self.client.clone(),
            self.config.clone(),
            target,
            options,
            self.listing_token(),
        )
    }

    /// Run a plan to completion (or until cancelled)
    pub async fn execute(&self, plan: PlanStream, options: &SyncOptions) -> Report {
        let concurrency = options.concurrency.unwrap_or(self.config.concurrency);
        Scheduler::new(self.client.clone(), self.config.clone(), self.cancel.clone())
            .concurrency(concurrency)
            .dry_run(options.dry_run)
            .attributes(options.attributes.clone())
            .remove_source(options.remove_source)
            .stop_listing(self.current_listing())
            .on_outcome(self.progress.clone())
            .run(plan)
            .await
    }

    /// Plan and execute in one call
    pub async fn sync(
        &self,
        source: &Location,
        dest: &Location,
        options: &SyncOptions,
    ) -> Result<Report> {
        let plan = self.plan(source, dest, options)?;
        Ok(self.execute(plan, options).await)
    }

    /// Plan and execute a removal in one call
    pub async fn remove(&self, target: &Location, options: &SyncOptions) -> Result<Report> {
        let plan = self.plan_removal(target, options)?;
        Ok(self.execute(plan, options).await)
    }

    /// Stop dispatching, abort multipart sessions and report the rest as
    /// not attempted
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Token for a new plan. A halted run leaves its token fired; the next
    /// plan gets a fresh one unless the engine itself was cancelled.
    fn listing_token(&self) -> CancellationToken {
        let mut listing = self.listing.lock().unwrap_or_else(PoisonError::into_inner);
        if listing.is_cancelled() && !self.cancel.is_cancelled() {
            *listing = CancellationToken::new();
        }
        if self.cancel.is_cancelled() {
            listing.cancel();
        }
        listing.clone()
    }

    fn current_listing(&self) -> CancellationToken {
        self.listing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
