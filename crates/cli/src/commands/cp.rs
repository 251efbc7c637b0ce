//! cp command - Copy files or objects
//!
//! Every included source entry is transferred; nothing is compared or
//! deleted.

use clap::Args;
use objsync_core::{FilterRule, Result, SyncOptions};

use super::transfer::{self, TransferArgs};
use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

/// Copy a file, an object or a whole tree
#[derive(Args, Debug)]
pub struct CpArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Copy every entry under the source
    #[arg(short, long)]
    pub recursive: bool,
}

impl CpArgs {
    pub fn options(&self, rules: Vec<FilterRule>) -> Result<SyncOptions> {
        Ok(SyncOptions {
            recursive: self.recursive,
            compare: false,
            ..self.transfer.base_options(rules)?
        })
    }
}

/// Execute the cp command
pub async fn execute(args: CpArgs, rules: Vec<FilterRule>, output_config: OutputConfig) -> ExitCode {
    match args.options(rules) {
        Ok(options) => transfer::run("cp", &args.transfer, options, output_config).await,
        Err(e) => transfer::rejected(&e, output_config),
    }
}
