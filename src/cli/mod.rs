//! CLI module for Fanout
//!
//! Argument parsing and subcommand handling for the `fanout` binary.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fanout - run one module across many hosts
///
/// Resolves a host pattern against the inventory, executes the module on
/// every match with bounded parallelism and reports a result per host.
#[derive(Parser, Debug, Clone)]
#[command(name = "fanout")]
#[command(author = "Fanout Contributors")]
#[command(version)]
#[command(about = "Fan-out command executor", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Inventory file, directory or comma separated host list (repeatable)
    #[arg(short = 'i', long, global = true, action = clap::ArgAction::Append)]
    pub inventory: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "FANOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON document
    Json,
    /// YAML document
    Yaml,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a module against the hosts matching a pattern
    Run(commands::run::RunArgs),

    /// List hosts matching a pattern
    #[command(name = "list-hosts")]
    ListHosts(commands::inventory::ListHostsArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if a structured document is requested
    pub fn is_structured(&self) -> bool {
        !matches!(self.output, OutputFormat::Human)
    }
}
