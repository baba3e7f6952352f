// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cycleflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cycleflow",
    version,
    about = "Run a cycling workflow of recurring, graph-dependent tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow definition (TOML).
    ///
    /// Default: `flow.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "flow.toml")]
    pub config: String,

    /// Restart from the configured checkpoint instead of a cold start.
    #[arg(long)]
    pub restart: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CYCLEFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the compiled graph, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
