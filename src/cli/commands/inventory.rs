//! Inventory commands - List hosts
//!
//! This module implements the `list-hosts` subcommand.

use super::{CommandContext, Runnable};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeSet;

use fanout::inventory::{InventoryError, InventoryResolver};

/// Arguments for list-hosts command
#[derive(Parser, Debug, Clone)]
pub struct ListHostsArgs {
    /// Host pattern to match
    #[arg(default_value = "all")]
    pub pattern: String,

    /// Show host variables
    #[arg(long)]
    pub vars: bool,
}

#[derive(Debug, Serialize)]
struct HostEntry<'a> {
    name: &'a str,
    address: &'a str,
    groups: &'a BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vars: Option<&'a indexmap::IndexMap<String, serde_yaml::Value>>,
}

impl ListHostsArgs {
    /// Execute the list-hosts command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let inventory = ctx
            .resolver()
            .load()
            .context("Failed to load inventory")?;

        let hosts = match InventoryResolver::select(&inventory, &self.pattern) {
            Ok(hosts) => hosts,
            Err(InventoryError::NoHostsMatched(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if !ctx.output.is_human() {
            let entries: Vec<HostEntry<'_>> = hosts
                .iter()
                .map(|h| HostEntry {
                    name: h.name(),
                    address: h.address(),
                    groups: &h.groups,
                    vars: (self.vars && !h.vars.is_empty()).then_some(&h.vars),
                })
                .collect();
            ctx.output.document(&entries)?;
            return Ok(0);
        }

        if hosts.is_empty() {
            ctx.output
                .warning(&format!("No hosts matched pattern: {}", self.pattern));
            return Ok(0);
        }

        ctx.output.section(&format!("  hosts ({}):", hosts.len()));
        for host in &hosts {
            ctx.output.item(host.name());
            if self.vars {
                for (key, value) in &host.vars {
                    ctx.output.item(&format!(
                        "  {}: {}",
                        key,
                        serde_yaml::to_string(value)?.trim()
                    ));
                }
            }
        }

        Ok(0)
    }
}

#[async_trait::async_trait]
impl Runnable for ListHostsArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
