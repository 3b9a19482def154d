use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "reportex", about = "Operator tooling for the report exchange", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a search bundle file against the query policy
    Validate(ValidateArgs),
    /// Show the report statuses recorded on a task file
    Status(StatusArgs),
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Path to a search bundle (JSON)
    pub file: PathBuf,

    /// Query policy revision to check against
    #[arg(long, default_value = "1.1")]
    pub policy: String,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Path to a task record (JSON)
    pub file: PathBuf,
}
