//! Subcommands module for Fanout CLI
//!
//! This module contains all the subcommand implementations.

pub mod inventory;
pub mod run;

use anyhow::Result;
use fanout::config::Config;
use fanout::inventory::{InventoryResolver, InventorySource};

use crate::cli::output::OutputFormatter;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Inventory arguments from the command line
    pub inventory: Vec<String>,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let use_color = !cli.no_color && config.colors.enabled;
        let output = OutputFormatter::new(use_color, cli.output);

        Self {
            config,
            output,
            inventory: cli.inventory.clone(),
            verbosity: cli.verbosity(),
        }
    }

    /// Inventory sources: command line first, else the configured default,
    /// else `localhost` alone.
    pub fn resolver(&self) -> InventoryResolver {
        let mut resolver = InventoryResolver::new();

        if !self.inventory.is_empty() {
            for arg in &self.inventory {
                resolver.add_source(InventorySource::from_arg(arg));
            }
        } else if let Some(path) = self.config.inventory_path() {
            resolver.add_source(InventorySource::from_arg(&path.to_string_lossy()));
        } else {
            self.output
                .warning("No inventory was given, only localhost is available");
            resolver.add_source(InventorySource::HostList("localhost,".to_string()));
        }

        resolver
    }
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command, returning the process exit code
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
