//! mv command - Move files or objects
//!
//! A copy that deletes each source once its transfer succeeded. Sources
//! that failed to transfer stay where they are.

use clap::Args;
use objsync_core::{FilterRule, Result, SyncOptions};

use super::transfer::{self, TransferArgs};
use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

/// Move a file, an object or a whole tree
#[derive(Args, Debug)]
pub struct MvArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Move every entry under the source
    #[arg(short, long)]
    pub recursive: bool,
}

impl MvArgs {
    pub fn options(&self, rules: Vec<FilterRule>) -> Result<SyncOptions> {
        Ok(SyncOptions {
            recursive: self.recursive,
            compare: false,
            remove_source: true,
            ..self.transfer.base_options(rules)?
        })
    }
}

/// Execute the mv command
pub async fn execute(args: MvArgs, rules: Vec<FilterRule>, output_config: OutputConfig) -> ExitCode {
    match args.options(rules) {
        Ok(options) => transfer::run("mv", &args.transfer, options, output_config).await,
        Err(e) => transfer::rejected(&e, output_config),
    }
}
