//! rm command - Delete objects
//!
//! Deletes one object, or with `--recursive` every object under a prefix
//! that the filters include.

use clap::Args;
use objsync_core::{FilterRule, SyncOptions, parse_location};

use super::transfer::{self, EndpointArgs, Session};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Delete an object or every object under a prefix
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Object or prefix: s3://bucket/key
    pub target: String,

    /// Delete every object under the prefix
    #[arg(short, long)]
    pub recursive: bool,

    /// Exclude paths matching PATTERN (repeatable; later rules win)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Re-include paths matching PATTERN (repeatable; later rules win)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Show what would be deleted without deleting it
    #[arg(long = "dryrun")]
    pub dry_run: bool,

    /// Number of parallel deletes
    #[arg(short = 'P', long, value_name = "N")]
    pub concurrency: Option<usize>,

    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

impl RmArgs {
    pub fn options(&self, rules: Vec<FilterRule>) -> SyncOptions {
        SyncOptions {
            recursive: self.recursive,
            compare: false,
            rules,
            concurrency: self.concurrency,
            dry_run: self.dry_run,
            ..SyncOptions::default()
        }
    }
}

/// Execute the rm command
pub async fn execute(args: RmArgs, rules: Vec<FilterRule>, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let target = match parse_location(&args.target) {
        Ok(target) if target.is_remote() => target,
        Ok(_) => {
            formatter.error("rm only deletes s3:// objects");
            return ExitCode::UsageError;
        }
        Err(e) => {
            formatter.error(&format!("Invalid target: {e}"));
            return ExitCode::UsageError;
        }
    };

    let options = args.options(rules);
    let session = match Session::open(&args.endpoint, &formatter, options.dry_run).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    tracing::debug!(%target, recursive = options.recursive, "Starting removal");
    let report = match session
        .run(|engine| engine.plan_removal(&target, &options), &options)
        .await
    {
        Ok(report) => report,
        Err(code) => return code,
    };

    transfer::render("rm", None, &args.target, &report, &formatter);
    ExitCode::from_report(&report)
}
