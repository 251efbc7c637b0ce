//! CLI command definitions and dispatch

use clap::{ArgMatches, Subcommand};

use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

mod cp;
mod mv;
mod rm;
mod sync;
mod transfer;

pub use cp::CpArgs;
pub use mv::MvArgs;
pub use rm::RmArgs;
pub use sync::SyncArgs;
pub use transfer::ordered_rules;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize a destination with a source
    Sync(SyncArgs),

    /// Copy a file, an object or a whole tree
    Cp(CpArgs),

    /// Move a file, an object or a whole tree
    Mv(MvArgs),

    /// Delete an object or every object under a prefix
    Rm(RmArgs),
}

/// Execute a parsed command.
///
/// `matches` are the subcommand's own matches, used to recover the
/// interleaved order of include/exclude rules.
pub async fn execute(
    command: Commands,
    matches: Option<&ArgMatches>,
    output_config: OutputConfig,
) -> ExitCode {
    let rules = matches.map(ordered_rules).unwrap_or_default();
    match command {
        Commands::Sync(args) => sync::execute(args, rules, output_config).await,
        Commands::Cp(args) => cp::execute(args, rules, output_config).await,
        Commands::Mv(args) => mv::execute(args, rules, output_config).await,
        Commands::Rm(args) => rm::execute(args, rules, output_config).await,
    }
}
