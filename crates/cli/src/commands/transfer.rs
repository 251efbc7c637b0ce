//! Shared plumbing for the transfer commands
//!
//! Every command resolves its locations, builds a client and an engine,
//! then runs one plan and renders its report.

use std::sync::Arc;

use clap::{ArgMatches, Args, ValueEnum};
use objsync_core::{
    Error, FilterAction, FilterRule, Grants, Location, ObjectAttributes, PlanStream, Report,
    Result, SyncEngine, SyncOptions, parse_location,
};
use objsync_s3::S3Client;
use serde::Serialize;

use crate::config;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, TransferProgress, summary_line};

/// How to reach the storage service
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Custom endpoint for S3-compatible services
    #[arg(long, env = "OBJSYNC_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Region to sign requests for
    #[arg(long)]
    pub region: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long)]
    pub force_path_style: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseAlgorithm {
    #[value(name = "AES256")]
    Aes256,
    #[value(name = "aws:kms")]
    AwsKms,
}

impl SseAlgorithm {
    fn as_str(self) -> &'static str {
        match self {
            SseAlgorithm::Aes256 => "AES256",
            SseAlgorithm::AwsKms => "aws:kms",
        }
    }
}

/// Attributes for objects written to the remote side
#[derive(Args, Debug, Clone, Default)]
pub struct ObjectArgs {
    /// Server-side encryption; a bare --sse means AES256
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "AES256")]
    pub sse: Option<SseAlgorithm>,

    /// KMS key for --sse aws:kms
    #[arg(long, value_name = "KEY_ID", requires = "sse")]
    pub sse_kms_key_id: Option<String>,

    /// Storage class, e.g. STANDARD_IA or GLACIER
    #[arg(long, value_name = "CLASS")]
    pub storage_class: Option<String>,

    /// Canned ACL, e.g. private or public-read
    #[arg(long)]
    pub acl: Option<String>,

    /// Explicit grants as PERMISSION=GRANTEE (read, full, readacl, writeacl)
    #[arg(long, num_args = 1.., value_name = "GRANT")]
    pub grants: Vec<String>,

    /// Content type; guessed from the file name when unset
    #[arg(long)]
    pub content_type: Option<String>,

    #[arg(long)]
    pub cache_control: Option<String>,

    #[arg(long)]
    pub content_disposition: Option<String>,

    #[arg(long)]
    pub content_encoding: Option<String>,

    #[arg(long)]
    pub content_language: Option<String>,

    /// Redirect requests for the object to this URL (website buckets)
    #[arg(long, value_name = "URL")]
    pub website_redirect: Option<String>,
}

impl ObjectArgs {
    pub fn attributes(&self) -> Result<ObjectAttributes> {
        if self.sse_kms_key_id.is_some() && self.sse != Some(SseAlgorithm::AwsKms) {
            return Err(Error::Config(
                "--sse-kms-key-id requires --sse aws:kms".to_string(),
            ));
        }
        Ok(ObjectAttributes {
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
            content_disposition: self.content_disposition.clone(),
            content_encoding: self.content_encoding.clone(),
            content_language: self.content_language.clone(),
            storage_class: self.storage_class.clone(),
            sse: self.sse.map(|sse| sse.as_str().to_string()),
            sse_kms_key_id: self.sse_kms_key_id.clone(),
            acl: self.acl.clone(),
            grants: Grants::parse(&self.grants)?,
            website_redirect: self.website_redirect.clone(),
        })
    }
}

/// Flags common to sync, cp and mv
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Source: local path or s3://bucket/prefix
    pub source: String,

    /// Destination: local path or s3://bucket/prefix
    pub destination: String,

    /// Exclude paths matching PATTERN (repeatable; later rules win)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Re-include paths matching PATTERN (repeatable; later rules win)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Skip symlinks instead of transferring their targets
    #[arg(long)]
    pub no_follow_symlinks: bool,

    /// Show what would be done without doing it
    #[arg(long = "dryrun")]
    pub dry_run: bool,

    /// Number of parallel transfers
    #[arg(short = 'P', long, value_name = "N")]
    pub concurrency: Option<usize>,

    #[command(flatten)]
    pub object: ObjectArgs,

    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

impl TransferArgs {
    /// Options shared by every command; callers set comparison and recursion
    pub fn base_options(&self, rules: Vec<FilterRule>) -> Result<SyncOptions> {
        Ok(SyncOptions {
            follow_symlinks: !self.no_follow_symlinks,
            rules,
            concurrency: self.concurrency,
            dry_run: self.dry_run,
            attributes: self.object.attributes()?,
            ..SyncOptions::default()
        })
    }
}

/// Collect `--exclude` / `--include` in command-line order.
///
/// clap stores each flag separately; argument indices restore the
/// interleaving that last-match-wins depends on.
pub fn ordered_rules(matches: &ArgMatches) -> Vec<FilterRule> {
    let mut indexed = Vec::new();
    for (id, action) in [
        ("exclude", FilterAction::Exclude),
        ("include", FilterAction::Include),
    ] {
        let (Some(indices), Some(values)) =
            (matches.indices_of(id), matches.get_many::<String>(id))
        else {
            continue;
        };
        indexed.extend(indices.zip(values).map(|(index, pattern)| {
            (
                index,
                FilterRule {
                    pattern: pattern.clone(),
                    action,
                },
            )
        }));
    }
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, rule)| rule).collect()
}

#[derive(Debug, Serialize)]
struct TransferSummary<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    destination: &'a str,
    #[serde(flatten)]
    report: &'a Report,
}

fn parse_endpoints(args: &TransferArgs, formatter: &Formatter) -> Option<(Location, Location)> {
    let source = match parse_location(&args.source) {
        Ok(location) => location,
        Err(e) => {
            formatter.error(&format!("Invalid source: {e}"));
            return None;
        }
    };
    let destination = match parse_location(&args.destination) {
        Ok(location) => location,
        Err(e) => {
            formatter.error(&format!("Invalid destination: {e}"));
            return None;
        }
    };
    if !source.is_remote() && !destination.is_remote() {
        formatter.error("At least one location must be an s3:// path");
        return None;
    }
    Some((source, destination))
}

/// Report options that could not be built and pick the exit code
pub fn rejected(error: &Error, output_config: OutputConfig) -> ExitCode {
    Formatter::new(output_config).error(&error.to_string());
    ExitCode::from_error(error)
}

/// An engine connected to the configured backend, with progress attached
pub struct Session {
    engine: SyncEngine,
    progress: Arc<TransferProgress>,
    formatter: Formatter,
}

impl Session {
    pub async fn open(
        endpoint: &EndpointArgs,
        formatter: &Formatter,
        dry_run: bool,
    ) -> std::result::Result<Self, ExitCode> {
        let settings = match config::load() {
            Ok(settings) => settings,
            Err(e) => {
                formatter.error(&format!("{e:#}"));
                return Err(ExitCode::UsageError);
            }
        };

        let mut client_config = settings.s3.client_config();
        if endpoint.endpoint_url.is_some() {
            client_config.endpoint_url = endpoint.endpoint_url.clone();
        }
        if endpoint.region.is_some() {
            client_config.region = endpoint.region.clone();
        }
        client_config.force_path_style |= endpoint.force_path_style;

        let client = match S3Client::new(client_config).await {
            Ok(client) => client,
            Err(e) => {
                formatter.error(&format!("Failed to create client: {e}"));
                return Err(match e {
                    Error::Config(_) => ExitCode::UsageError,
                    _ => ExitCode::NetworkError,
                });
            }
        };

        let progress = TransferProgress::new(formatter.clone(), dry_run);
        let engine = match SyncEngine::new(Arc::new(client), settings.transfer) {
            Ok(engine) => engine.with_progress(progress.hook()),
            Err(e) => {
                formatter.error(&e.to_string());
                return Err(ExitCode::UsageError);
            }
        };
        Ok(Self {
            engine,
            progress,
            formatter: formatter.clone(),
        })
    }

    /// Build a plan with `plan` and run it; Ctrl-C cancels the run
    pub async fn run<F>(&self, plan: F, options: &SyncOptions) -> std::result::Result<Report, ExitCode>
    where
        F: FnOnce(&SyncEngine) -> Result<PlanStream>,
    {
        let token = self.engine.cancel_token();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Received Ctrl-C; stopping");
                token.cancel();
            }
        });

        let plan = match plan(&self.engine) {
            Ok(plan) => plan,
            Err(e) => {
                ctrl_c.abort();
                self.formatter.error(&e.to_string());
                return Err(ExitCode::from_error(&e));
            }
        };

        let report = self.engine.execute(plan, options).await;
        ctrl_c.abort();
        self.progress.finish();
        tracing::debug!(bytes = self.progress.bytes(), "Transfer finished");
        Ok(report)
    }
}

/// Run one source-to-destination command end to end
pub async fn run(
    command: &str,
    args: &TransferArgs,
    options: SyncOptions,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let Some((source, destination)) = parse_endpoints(args, &formatter) else {
        return ExitCode::UsageError;
    };
    let session = match Session::open(&args.endpoint, &formatter, options.dry_run).await {
        Ok(session) => session,
        Err(code) => return code,
    };

    tracing::debug!(%source, %destination, command, "Starting transfer");
    let report = match session
        .run(|engine| engine.plan(&source, &destination, &options), &options)
        .await
    {
        Ok(report) => report,
        Err(code) => return code,
    };

    render(command, Some(&args.source), &args.destination, &report, &formatter);
    ExitCode::from_report(&report)
}

pub fn render(
    command: &str,
    source: Option<&str>,
    destination: &str,
    report: &Report,
    formatter: &Formatter,
) {
    if formatter.is_json() {
        formatter.json(&TransferSummary {
            command,
            source,
            destination,
            report,
        });
        return;
    }

    // Failure lines were already printed unless progress was off
    if !formatter.shows_progress() {
        for failure in &report.failures {
            formatter.error(&format!("{}: {}", failure.path, failure.error.message));
        }
    }
    if let Some(fatal) = &report.fatal {
        formatter.error(&format!("Transfer halted: {}", fatal.message));
    }
    if report.cancelled {
        formatter.warning(&format!(
            "Interrupted; {} transfer(s) not attempted",
            report.not_attempted
        ));
    }
    formatter.println(&summary_line(command_title(command), report));
}

fn command_title(command: &str) -> &'static str {
    match command {
        "cp" => "Copy",
        "mv" => "Move",
        "rm" => "Delete",
        _ => "Sync",
    }
}
