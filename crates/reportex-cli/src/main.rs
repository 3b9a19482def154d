mod cli;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use reportex_core::fhir::{Bundle, Task};
use reportex_policy::{PolicyVersion, QueryPolicy, SearchBundleValidator};
use reportex_protocol::codec::StatusCodec;

use cli::{Cli, Commands, StatusArgs, ValidateArgs};
use output::{print_error, print_success};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    if let Err(e) = run() {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Validate(args) => validate(args),
        Commands::Status(args) => status(args),
    }
}

fn validate(args: &ValidateArgs) -> Result<()> {
    let version: PolicyVersion = args
        .policy
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let bundle: Bundle = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.file.display()))?;

    let validator = SearchBundleValidator::new(QueryPolicy::new(version));
    match validator.validate(&bundle) {
        Ok(()) => {
            print_success(&format!(
                "Search bundle is valid against policy {version} ({} request{})",
                bundle.entry.len(),
                if bundle.entry.len() == 1 { "" } else { "s" }
            ));
            Ok(())
        }
        Err(rejection) => {
            print_error(&rejection.reason);
            std::process::exit(1);
        }
    }
}

fn status(args: &StatusArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let task: Task = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.file.display()))?;

    let outputs = StatusCodec::decode_all(&task.output);
    let inputs = StatusCodec::decode_all(&task.input);

    if outputs.is_empty() && inputs.is_empty() {
        println!("Task '{}' carries no report status", task.id);
        return Ok(());
    }

    println!("{}: {} ({})", "Task".cyan(), task.id, task.status);
    for status in outputs {
        print_status("output", &status);
    }
    for status in inputs {
        print_status("input", &status);
    }
    Ok(())
}

fn print_status(direction: &str, status: &reportex_core::status::ReportStatus) {
    let code = if status.is_ok() {
        status.code.to_string().green()
    } else {
        status.code.to_string().red()
    };
    match &status.error_detail {
        Some(detail) => println!("  {direction}: {code} - {detail}"),
        None => println!("  {direction}: {code}"),
    }
}
