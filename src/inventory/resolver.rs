//! Inventory resolution.
//!
//! The resolver combines one or more inventory sources and turns a host
//! pattern into the target set of a run: an ordered, deduplicated list of
//! immutable, shareable host records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{Host, Inventory, InventoryDefinition, InventoryError, InventoryResult};

/// A place hosts are loaded from
#[derive(Debug, Clone)]
pub enum InventorySource {
    /// Inventory file (YAML, JSON, INI) or directory containing a `hosts` file
    Path(PathBuf),
    /// In-memory definition
    Definition(InventoryDefinition),
    /// Ad-hoc comma separated host list, e.g. `"web1,web2,"`
    HostList(String),
}

impl InventorySource {
    /// Interpret a command-line inventory argument.
    ///
    /// An argument containing a comma that does not name an existing path is
    /// an ad-hoc host list; anything else is a path.
    pub fn from_arg(arg: &str) -> Self {
        if arg.contains(',') && !Path::new(arg).exists() {
            InventorySource::HostList(arg.to_string())
        } else {
            InventorySource::Path(PathBuf::from(shellexpand::tilde(arg).into_owned()))
        }
    }

    /// Load this source into an inventory
    pub fn load(&self) -> InventoryResult<Inventory> {
        match self {
            InventorySource::Path(path) => Inventory::load(path),
            InventorySource::Definition(definition) => Inventory::from_definition(definition),
            InventorySource::HostList(list) => Inventory::from_host_list(list),
        }
    }
}

impl std::fmt::Display for InventorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventorySource::Path(path) => write!(f, "{}", path.display()),
            InventorySource::Definition(def) => write!(f, "<definition: {} groups>", def.groups.len()),
            InventorySource::HostList(list) => write!(f, "{}", list),
        }
    }
}

impl From<InventoryDefinition> for InventorySource {
    fn from(definition: InventoryDefinition) -> Self {
        InventorySource::Definition(definition)
    }
}

impl From<PathBuf> for InventorySource {
    fn from(path: PathBuf) -> Self {
        InventorySource::Path(path)
    }
}

/// Resolves host patterns against a set of inventory sources
#[derive(Debug, Clone, Default)]
pub struct InventoryResolver {
    sources: Vec<InventorySource>,
}

impl InventoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source (builder style)
    pub fn with_source(mut self, source: impl Into<InventorySource>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Add a source
    pub fn add_source(&mut self, source: impl Into<InventorySource>) {
        self.sources.push(source.into());
    }

    pub fn sources(&self) -> &[InventorySource] {
        &self.sources
    }

    /// Load and merge all sources, later sources extending earlier ones
    pub fn load(&self) -> InventoryResult<Inventory> {
        let mut inventory = Inventory::new();
        for source in &self.sources {
            debug!(source = %source, "Loading inventory source");
            inventory.merge(source.load()?)?;
        }
        Ok(inventory)
    }

    /// Resolve a pattern into the target host set.
    ///
    /// Fails with [`InventoryError::NoHostsMatched`] when nothing matches.
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub fn resolve(&self, pattern: &str) -> InventoryResult<Vec<Arc<Host>>> {
        let inventory = self.load()?;
        let hosts = Self::select(&inventory, pattern)?;
        debug!(count = hosts.len(), "Resolved hosts");
        Ok(hosts)
    }

    /// Select hosts from an already loaded inventory
    pub fn select(inventory: &Inventory, pattern: &str) -> InventoryResult<Vec<Arc<Host>>> {
        let hosts: Vec<Arc<Host>> = inventory
            .get_hosts_for_pattern(pattern)?
            .into_iter()
            .map(|h| Arc::new(h.clone()))
            .collect();

        if hosts.is_empty() {
            return Err(InventoryError::NoHostsMatched(pattern.to_string()));
        }
        Ok(hosts)
    }
}
