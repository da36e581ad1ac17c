//! Command-line interface definitions.
//!
//! Defines the CLI structure for the rangelock binary using `clap`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Intraday range-breakout execution engine
#[derive(Parser, Debug)]
#[command(name = "rangelock")]
#[command(version)]
pub struct Cli {
    /// JSON output for scripting
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine over the configured replay bars against the paper venue
    Run(ConfigPathArg),

    /// Validate configuration and run startup health checks
    Check(ConfigPathArg),

    /// Show persisted stream records for a trading date
    Status(StatusArgs),
}

/// Shared argument struct for commands that require only a configuration path.
#[derive(Parser, Debug)]
pub struct ConfigPathArg {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Trading date to show (YYYY-MM-DD).
    #[arg(long)]
    pub date: NaiveDate,
}
