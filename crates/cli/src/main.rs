//! objsync - sync and copy between local trees and S3-compatible storage

use clap::{CommandFactory, FromArgMatches, Parser};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod exit_code;
mod output;

use commands::Commands;
use output::{Formatter, OutputConfig};

#[derive(Parser, Debug)]
#[command(name = "objsync", version, about)]
struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("objsync=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_logging(cli.debug);

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };
    if !Formatter::new(output_config.clone()).colors_enabled() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let sub_matches = matches.subcommand().map(|(_, m)| m);
    commands::execute(cli.command, sub_matches, output_config)
        .await
        .into()
}
