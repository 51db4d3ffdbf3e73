//! zenc - ZFS native-encryption gates
//!
//! Entry point for the `zenc` binary:
//! - `capability`: whether the installed zfs supports native encryption
//! - `encryption <dataset>`: whether encryption is enabled on a dataset
//! - `keystatus <dataset>`: whether a dataset's key is unloaded
//! - `send-check <dataset>`: whether a live send may start

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info_span};
use zenc_common::{format_error_human, Error, OutputFormat, StructuredError, SCHEMA_VERSION};
use zenc_core::config::{load_config, ConfigOptions, Services};
use zenc_core::context::QueryContext;
use zenc_core::exit_codes::ExitCode;
use zenc_core::logging::{generate_run_id, init_logging, LogConfig, LogFormat, LogLevel};
use zenc_core::zfs::SendDecision;

/// Native-encryption gates for ZFS datasets
#[derive(Parser)]
#[command(name = "zenc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (default: $XDG_CONFIG_HOME/zenc/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// zfs binary name or path
    #[arg(long, global = true)]
    zfs_bin: Option<String>,

    /// Abort if the whole operation exceeds this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether zfs supports native encryption
    Capability,

    /// Report whether native encryption is enabled on a dataset
    Encryption(DatasetArgs),

    /// Report whether a dataset's encryption key is unloaded
    Keystatus(DatasetArgs),

    /// Check whether a send from a dataset may start
    SendCheck(SendCheckArgs),
}

#[derive(Args, Debug)]
struct DatasetArgs {
    /// Filesystem or volume, e.g. tank/data
    dataset: String,
}

#[derive(Args, Debug)]
struct SendCheckArgs {
    /// Filesystem or volume, e.g. tank/data
    dataset: String,

    /// The send is raw (`zfs send -w`); no key needed
    #[arg(long)]
    raw: bool,
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else if cli.global.verbose > 0 {
        Some(LogLevel::Warn.louder(cli.global.verbose))
    } else {
        None
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let run_id = generate_run_id();
    let span = info_span!("zenc", run_id = %run_id);
    let _enter = span.enter();

    let exit_code = run(&cli, &run_id);
    debug!(exit_code = %exit_code, "done");
    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli, run_id: &str) -> ExitCode {
    let global = &cli.global;
    let options = ConfigOptions {
        config_path: global.config.clone(),
        zfs_binary: global.zfs_bin.clone(),
        query_timeout_ms: None,
    };
    let services = match load_config(&options) {
        Ok(resolved) => resolved.config.build_services(),
        Err(e) => return output_error(global, run_id, &e.into()),
    };

    let ctx = match global.timeout {
        Some(secs) => QueryContext::with_timeout(Duration::from_secs(secs)),
        None => QueryContext::background(),
    };

    let result = match &cli.command {
        Commands::Capability => run_capability(&services, &ctx),
        Commands::Encryption(args) => run_encryption(&services, &ctx, &args.dataset),
        Commands::Keystatus(args) => run_keystatus(&services, &ctx, &args.dataset),
        Commands::SendCheck(args) => run_send_check(&services, &ctx, args),
    };

    match result {
        Ok(report) => {
            emit(global, run_id, &report);
            report.exit_code
        }
        Err(e) => output_error(global, run_id, &e),
    }
}

/// A successful answer.
struct Report {
    command: &'static str,
    payload: Value,
    human: String,
    exit_code: ExitCode,
}

impl Report {
    fn new(command: &'static str, payload: Value, human: String) -> Self {
        Self {
            command,
            payload,
            human,
            exit_code: ExitCode::Clean,
        }
    }
}

fn run_capability(services: &Services, ctx: &QueryContext) -> Result<Report, Error> {
    let supported = services.prober.probe_supported(ctx)?;
    let state = services.prober.state(ctx);
    let human = match (supported, state.forced) {
        (true, Some(_)) => "native encryption: supported (forced)".to_string(),
        (true, None) => "native encryption: supported".to_string(),
        (false, Some(_)) => "native encryption: not supported (forced)".to_string(),
        (false, None) => "native encryption: not supported".to_string(),
    };
    Ok(Report::new(
        "capability",
        json!({ "supported": supported, "capability": state }),
        human,
    ))
}

fn run_encryption(services: &Services, ctx: &QueryContext, dataset: &str) -> Result<Report, Error> {
    let status = services.gate.encryption_status(ctx, dataset)?;
    let enabled = status.is_enabled();
    let human = format!(
        "{}: encryption {}",
        dataset,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(Report::new(
        "encryption",
        json!({ "dataset": dataset, "encryption_enabled": enabled, "status": status }),
        human,
    ))
}

fn run_keystatus(services: &Services, ctx: &QueryContext, dataset: &str) -> Result<Report, Error> {
    let status = services.gate.key_status(ctx, dataset)?;
    let unloaded = status.is_unloaded();
    let human = format!(
        "{}: key {}",
        dataset,
        if unloaded { "unloaded" } else { "loaded" }
    );
    Ok(Report::new(
        "keystatus",
        json!({ "dataset": dataset, "key_unloaded": unloaded, "status": status }),
        human,
    ))
}

fn run_send_check(
    services: &Services,
    ctx: &QueryContext,
    args: &SendCheckArgs,
) -> Result<Report, Error> {
    let decision = services
        .preflight
        .check_live_send(ctx, &args.dataset, args.raw)?;
    let (human, exit_code) = match &decision {
        SendDecision::Allowed { .. } => (format!("{}: send allowed", args.dataset), ExitCode::Clean),
        SendDecision::Blocked { .. } => (
            format!(
                "{}: live send blocked, key not loaded (load the key or use a raw send)",
                args.dataset
            ),
            ExitCode::SendBlocked,
        ),
    };
    let mut report = Report::new(
        "send-check",
        json!({
            "dataset": args.dataset,
            "raw": args.raw,
            "allowed": decision.is_allowed(),
            "decision": decision,
        }),
        human,
    );
    report.exit_code = exit_code;
    Ok(report)
}

fn emit(global: &GlobalOpts, run_id: &str, report: &Report) {
    match global.format {
        OutputFormat::Json => {
            let mut doc = json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": run_id,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "command": report.command,
                "status": "ok",
            });
            if let (Value::Object(doc), Value::Object(payload)) = (&mut doc, &report.payload) {
                doc.extend(payload.clone());
            }
            println!("{}", to_pretty(&doc));
        }
        OutputFormat::Human => println!("{}", report.human),
    }
}

fn output_error(global: &GlobalOpts, run_id: &str, error: &Error) -> ExitCode {
    let exit_code = ExitCode::from(error);
    match global.format {
        OutputFormat::Json => {
            let structured = StructuredError::from(error);
            let response = json!({
                "schema_version": SCHEMA_VERSION,
                "run_id": run_id,
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "status": "error",
                "exit_code": exit_code.code_name(),
                "error": structured,
            });
            eprintln!("{}", to_pretty(&response));
        }
        OutputFormat::Human => eprintln!("{}", format_error_human(error)),
    }
    exit_code
}

fn to_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
