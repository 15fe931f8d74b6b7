//! CLI argument definitions for the `relaylog` binary.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// relaylog demo driver.
///
/// Builds the sink stack described by the config file, emits events from
/// several producer threads through a `Logger`, runs one health round and
/// prints the report.
#[derive(Parser, Debug, Clone)]
#[command(name = "relaylog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to relaylog.toml configuration file.
    #[arg(short, long, default_value = "relaylog.toml")]
    pub config: PathBuf,

    /// Fall back to built-in defaults when the config file does not exist.
    #[arg(long)]
    pub allow_missing_config: bool,

    /// Override diagnostics log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override diagnostics log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit.
    #[arg(long)]
    pub validate: bool,

    /// Total number of events to emit.
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub events: u64,

    /// Number of producer threads.
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..=256))]
    pub producers: u32,

    /// Print the final health report as JSON.
    #[arg(long)]
    pub health_json: bool,
}
