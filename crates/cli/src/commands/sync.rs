//! sync command - Make a destination match a source
//!
//! Transfers new and changed entries, optionally deleting destination
//! entries that no longer exist at the source.

use clap::Args;
use objsync_core::{ComparisonMode, FilterRule, Result, SyncOptions};

use super::transfer::{self, TransferArgs};
use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

/// Synchronize a destination with a source
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Delete destination entries that do not exist at the source
    #[arg(long)]
    pub delete: bool,

    /// Treat entries with equal sizes as in sync
    #[arg(long, conflicts_with = "exact_timestamps")]
    pub size_only: bool,

    /// Compare timestamps exactly; an equal or newer destination is in sync
    #[arg(long)]
    pub exact_timestamps: bool,
}

impl SyncArgs {
    pub fn options(&self, rules: Vec<FilterRule>) -> Result<SyncOptions> {
        let comparison_mode = if self.size_only {
            ComparisonMode::SizeOnly
        } else if self.exact_timestamps {
            ComparisonMode::ExactTimestamps
        } else {
            ComparisonMode::Default
        };
        Ok(SyncOptions {
            delete_extraneous: self.delete,
            comparison_mode,
            ..self.transfer.base_options(rules)?
        })
    }
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, rules: Vec<FilterRule>, output_config: OutputConfig) -> ExitCode {
    match args.options(rules) {
        Ok(options) => transfer::run("sync", &args.transfer, options, output_config).await,
        Err(e) => transfer::rejected(&e, output_config),
    }
}
