//! Inventory management for Fanout.
//!
//! This module turns inventory sources into a flat set of hosts:
//! - Loading from YAML, INI, and JSON files or an inventory directory
//! - In-memory definitions and ad-hoc `host1,host2,` lists
//! - Host pattern matching (groups, globs, regex, union/intersection/exclusion)
//! - Group hierarchy with variable inheritance for connection parameters

pub mod group;
pub mod host;
pub mod resolver;

pub use group::Group;
pub use host::{ConnectionParams, ConnectionType, Host, HostParseError};
pub use resolver::{InventoryResolver, InventorySource};

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("inventory source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("host entry in group '{group}' is missing required key '{key}'")]
    MissingKey { group: String, key: String },

    #[error("invalid host entry in group '{group}': {reason}")]
    InvalidEntry { group: String, reason: String },

    #[error("circular group dependency detected: {0}")]
    CircularDependency(String),

    #[error("invalid INI format: {0}")]
    InvalidIniFormat(String),

    #[error("host parse error: {0}")]
    HostParse(#[from] HostParseError),

    #[error("no hosts matched pattern: {0}")]
    NoHostsMatched(String),
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Host variables that map onto [`ConnectionParams`] when set on a group
const CONNECTION_VARS: &[&str] = &[
    "ansible_host",
    "ansible_port",
    "ansible_user",
    "ansible_ssh_private_key_file",
    "ansible_connection",
    "address",
    "port",
    "user",
    "private_key_file",
    "connection",
];

// ============================================================================
// In-memory definitions
// ============================================================================

/// Deserialized YAML/JSON inventory: group name to group definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryDefinition {
    pub groups: IndexMap<String, GroupDefinition>,
}

impl InventoryDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group made of bare host names
    pub fn group<I, S>(mut self, name: impl Into<String>, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = hosts
            .into_iter()
            .map(|h| serde_yaml::Value::String(h.into()))
            .collect();
        self.groups
            .insert(name.into(), GroupDefinition::Hosts(entries));
        self
    }

    /// Add a group with an explicit definition
    pub fn group_with(mut self, name: impl Into<String>, definition: GroupDefinition) -> Self {
        self.groups.insert(name.into(), definition);
        self
    }
}

/// Definition of a single group.
///
/// A group is either empty, a list of host entries, or a mapping with
/// `hosts`, `children` and `vars`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupDefinition {
    Empty,
    Hosts(Vec<serde_yaml::Value>),
    Detailed(GroupSpec),
}

/// Mapping form of a group definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Sequence of host entries or mapping of host name to attributes
    #[serde(default)]
    pub hosts: serde_yaml::Value,

    /// Sequence of child group names or mapping of child name to definition
    #[serde(default)]
    pub children: serde_yaml::Value,

    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,
}

// ============================================================================
// Inventory
// ============================================================================

/// The main inventory structure holding all hosts and groups
#[derive(Debug, Clone)]
pub struct Inventory {
    /// All hosts indexed by name, in order of first appearance
    hosts: IndexMap<String, Host>,

    /// All groups indexed by name
    groups: IndexMap<String, Group>,

    /// Source descriptions, for display
    sources: Vec<String>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with default groups
    pub fn new() -> Self {
        let mut groups = IndexMap::new();
        groups.insert("all".to_string(), Group::all());
        groups.insert("ungrouped".to_string(), Group::ungrouped());

        Self {
            hosts: IndexMap::new(),
            groups,
            sources: Vec::new(),
        }
    }

    /// Load inventory from a file or directory
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let path = path.as_ref();
        let mut inventory = Self::new();
        inventory.sources.push(path.display().to_string());

        if path.is_file() {
            inventory.load_file(path)?;
        } else if path.is_dir() {
            inventory.load_directory(path)?;
        } else {
            return Err(InventoryError::NotFound(path.to_path_buf()));
        }

        inventory.finalize()?;
        Ok(inventory)
    }

    /// Build an inventory from an in-memory definition
    pub fn from_definition(definition: &InventoryDefinition) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.sources.push("<definition>".to_string());
        for (name, group) in &definition.groups {
            inventory.load_group_definition(name, group)?;
        }
        inventory.finalize()?;
        Ok(inventory)
    }

    /// Build an inventory from an ad-hoc host list such as `"web1,web2,"`.
    ///
    /// `localhost` and `127.0.0.1` entries use the local transport.
    pub fn from_host_list(list: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.sources.push(list.to_string());
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let host = if matches!(name, "localhost" | "127.0.0.1") {
                Host::local(name)
            } else {
                Host::new(name)
            };
            inventory.add_host(host);
        }
        inventory.finalize()?;
        Ok(inventory)
    }

    /// Parse YAML inventory content
    pub fn from_yaml(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_yaml(content)?;
        inventory.finalize()?;
        Ok(inventory)
    }

    /// Parse JSON inventory content
    pub fn from_json(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_json(content)?;
        inventory.finalize()?;
        Ok(inventory)
    }

    /// Parse INI inventory content
    pub fn from_ini(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        inventory.parse_ini(content)?;
        inventory.finalize()?;
        Ok(inventory)
    }

    /// Load a single inventory file
    fn load_file(&mut self, path: &Path) -> InventoryResult<()> {
        let content = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        debug!(path = %path.display(), "Loading inventory file");

        match extension.to_lowercase().as_str() {
            "yml" | "yaml" => self.parse_yaml(&content),
            "json" => self.parse_json(&content),
            "ini" | "cfg" => self.parse_ini(&content),
            _ => {
                let trimmed = content.trim_start();
                if trimmed.starts_with('{') {
                    self.parse_json(&content)
                } else if content.lines().any(|l| l.trim_start().starts_with('[')) {
                    self.parse_ini(&content)
                } else {
                    self.parse_yaml(&content)
                }
            }
        }
    }

    /// Load inventory from a directory
    fn load_directory(&mut self, path: &Path) -> InventoryResult<()> {
        for name in ["hosts", "hosts.yml", "hosts.yaml", "hosts.ini"] {
            let hosts_file = path.join(name);
            if hosts_file.is_file() {
                return self.load_file(&hosts_file);
            }
        }
        Err(InventoryError::NotFound(path.join("hosts")))
    }

    /// Parse YAML inventory format
    fn parse_yaml(&mut self, content: &str) -> InventoryResult<()> {
        if content.trim().is_empty() {
            return Ok(());
        }
        let definition: InventoryDefinition = serde_yaml::from_str(content)?;
        for (name, group) in &definition.groups {
            self.load_group_definition(name, group)?;
        }
        Ok(())
    }

    /// Parse JSON inventory format
    fn parse_json(&mut self, content: &str) -> InventoryResult<()> {
        let definition: InventoryDefinition = serde_json::from_str(content)?;
        for (name, group) in &definition.groups {
            if name == "_meta" {
                continue;
            }
            self.load_group_definition(name, group)?;
        }
        Ok(())
    }

    fn load_group_definition(
        &mut self,
        name: &str,
        definition: &GroupDefinition,
    ) -> InventoryResult<()> {
        self.ensure_group(name);

        match definition {
            GroupDefinition::Empty => {}
            GroupDefinition::Hosts(entries) => {
                for entry in entries {
                    let host = host_from_entry(name, entry)?;
                    self.add_host_to_group(name, host);
                }
            }
            GroupDefinition::Detailed(spec) => {
                self.load_host_entries(name, &spec.hosts)?;
                self.load_children(name, &spec.children)?;
                if let Some(group) = self.groups.get_mut(name) {
                    group.merge_vars(&spec.vars);
                }
            }
        }

        Ok(())
    }

    fn load_host_entries(&mut self, group: &str, hosts: &serde_yaml::Value) -> InventoryResult<()> {
        use serde_yaml::Value;

        match hosts {
            Value::Null => {}
            Value::Sequence(entries) => {
                for entry in entries {
                    let host = host_from_entry(group, entry)?;
                    self.add_host_to_group(group, host);
                }
            }
            Value::Mapping(map) => {
                for (key, attrs) in map {
                    let name = key.as_str().ok_or_else(|| InventoryError::InvalidEntry {
                        group: group.to_string(),
                        reason: "host names must be strings".to_string(),
                    })?;
                    let entry = match attrs {
                        Value::Null => Value::String(name.to_string()),
                        Value::Mapping(attrs) => {
                            let mut attrs = attrs.clone();
                            attrs.insert(Value::String("name".into()), Value::String(name.into()));
                            Value::Mapping(attrs)
                        }
                        _ => {
                            return Err(InventoryError::InvalidEntry {
                                group: group.to_string(),
                                reason: format!("attributes of host '{}' must be a mapping", name),
                            })
                        }
                    };
                    let host = host_from_entry(group, &entry)?;
                    self.add_host_to_group(group, host);
                }
            }
            _ => {
                return Err(InventoryError::InvalidEntry {
                    group: group.to_string(),
                    reason: "'hosts' must be a list or a mapping".to_string(),
                })
            }
        }

        Ok(())
    }

    fn load_children(&mut self, group: &str, children: &serde_yaml::Value) -> InventoryResult<()> {
        use serde_yaml::Value;

        match children {
            Value::Null => {}
            Value::Sequence(names) => {
                for child in names {
                    let child = child.as_str().ok_or_else(|| InventoryError::InvalidEntry {
                        group: group.to_string(),
                        reason: "child group names must be strings".to_string(),
                    })?;
                    self.add_child(group, child);
                }
            }
            Value::Mapping(map) => {
                for (key, value) in map {
                    let child = key.as_str().ok_or_else(|| InventoryError::InvalidEntry {
                        group: group.to_string(),
                        reason: "child group names must be strings".to_string(),
                    })?;
                    let definition: GroupDefinition = serde_yaml::from_value(value.clone())?;
                    self.add_child(group, child);
                    self.load_group_definition(child, &definition)?;
                }
            }
            _ => {
                return Err(InventoryError::InvalidEntry {
                    group: group.to_string(),
                    reason: "'children' must be a list or a mapping".to_string(),
                })
            }
        }

        Ok(())
    }

    /// Parse INI inventory format
    fn parse_ini(&mut self, content: &str) -> InventoryResult<()> {
        let mut current_group = "ungrouped".to_string();
        let mut is_vars_section = false;
        let mut is_children_section = false;

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') {
                let section = line
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(|| {
                        InventoryError::InvalidIniFormat(format!(
                            "line {}: unterminated section header '{}'",
                            lineno + 1,
                            line
                        ))
                    })?;

                match section.rsplit_once(':') {
                    Some((group_name, suffix)) => {
                        is_vars_section = suffix == "vars";
                        is_children_section = suffix == "children";
                        if !is_vars_section && !is_children_section {
                            return Err(InventoryError::InvalidIniFormat(format!(
                                "line {}: unknown section type '{}'",
                                lineno + 1,
                                suffix
                            )));
                        }
                        current_group = group_name.to_string();
                    }
                    None => {
                        current_group = section.to_string();
                        is_vars_section = false;
                        is_children_section = false;
                    }
                }

                self.ensure_group(&current_group);
                continue;
            }

            if is_vars_section {
                let (key, value) = line.split_once('=').ok_or_else(|| {
                    InventoryError::InvalidIniFormat(format!(
                        "line {}: expected key=value in [{}:vars]",
                        lineno + 1,
                        current_group
                    ))
                })?;
                if let Some(group) = self.groups.get_mut(&current_group) {
                    group.set_var(key.trim(), parse_ini_value(value));
                }
            } else if is_children_section {
                self.add_child(&current_group, line);
            } else {
                let host = Host::parse(line)?;
                self.add_host_to_group(&current_group, host);
            }
        }

        Ok(())
    }

    fn ensure_group(&mut self, name: &str) -> &mut Group {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name))
    }

    fn add_child(&mut self, parent: &str, child: &str) {
        self.ensure_group(child);
        self.ensure_group(parent).add_child(child);
    }

    /// Add a host to a named group (and to `all`)
    pub fn add_host_to_group(&mut self, group: &str, mut host: Host) {
        let name = host.name.clone();
        host.add_to_group(group);
        host.add_to_group("all");

        self.ensure_group(group).add_host(name.clone());
        self.ensure_group("all").add_host(name.clone());

        match self.hosts.get_mut(&name) {
            Some(existing) => existing.merge(&host),
            None => {
                self.hosts.insert(name, host);
            }
        }
    }

    /// Add a host to the inventory, keeping the groups it already names
    pub fn add_host(&mut self, host: Host) {
        let groups: Vec<String> = host
            .groups
            .iter()
            .filter(|g| g.as_str() != "all")
            .cloned()
            .collect();

        if groups.is_empty() {
            self.add_host_to_group("ungrouped", host);
        } else {
            for group in &groups {
                self.add_host_to_group(group, host.clone());
            }
        }
    }

    /// Merge another inventory into this one
    pub fn merge(&mut self, other: Inventory) -> InventoryResult<()> {
        for (name, group) in other.groups {
            let target = self.ensure_group(&name);
            for child in &group.children {
                target.add_child(child.clone());
            }
            target.merge_vars(&group.vars);
        }
        for (_, host) in other.hosts {
            let groups: Vec<String> = host.groups.iter().cloned().collect();
            for group in groups.iter().filter(|g| g.as_str() != "all") {
                self.add_host_to_group(group, host.clone());
            }
            if groups.iter().all(|g| g == "all") {
                self.add_host_to_group("ungrouped", host);
            }
        }
        self.sources.extend(other.sources);
        self.finalize()
    }

    /// Compute parents, reject cycles, fill `ungrouped` and apply group
    /// connection variables to member hosts.
    fn finalize(&mut self) -> InventoryResult<()> {
        self.check_cycles()?;

        let edges: Vec<(String, String)> = self
            .groups
            .values()
            .flat_map(|g| g.children.iter().map(move |c| (g.name.clone(), c.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(group) = self.groups.get_mut(&child) {
                group.add_parent(parent);
            }
        }

        for host in self.hosts.values_mut() {
            let grouped = host
                .groups
                .iter()
                .any(|g| g != "all" && g != "ungrouped");
            let ungrouped = self
                .groups
                .entry("ungrouped".to_string())
                .or_insert_with(Group::ungrouped);
            if grouped {
                host.groups.remove("ungrouped");
                ungrouped.remove_host(&host.name);
            } else {
                host.add_to_group("ungrouped");
                ungrouped.add_host(host.name.clone());
            }
        }

        let mut effective = IndexMap::with_capacity(self.hosts.len());
        for (name, host) in &self.hosts {
            effective.insert(name.clone(), self.effective_host(host)?);
        }
        self.hosts = effective;

        Ok(())
    }

    fn check_cycles(&self) -> InventoryResult<()> {
        fn visit<'a>(
            inventory: &'a Inventory,
            name: &'a str,
            path: &mut Vec<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> InventoryResult<()> {
            if done.contains(name) {
                return Ok(());
            }
            if path.contains(&name) {
                path.push(name);
                return Err(InventoryError::CircularDependency(path.join(" -> ")));
            }
            path.push(name);
            if let Some(group) = inventory.groups.get(name) {
                for child in &group.children {
                    visit(inventory, child, path, done)?;
                }
            }
            path.pop();
            done.insert(name);
            Ok(())
        }

        let mut done = HashSet::new();
        for name in self.groups.keys() {
            visit(self, name, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }

    /// Groups a host inherits from, ordered from least to most specific
    fn group_ancestry(&self, host: &Host) -> Vec<&str> {
        fn collect<'a>(
            inventory: &'a Inventory,
            name: &'a str,
            out: &mut Vec<&'a str>,
            visited: &mut HashSet<&'a str>,
        ) {
            if !visited.insert(name) {
                return;
            }
            if let Some(group) = inventory.groups.get(name) {
                for parent in &group.parents {
                    collect(inventory, parent, out, visited);
                }
            }
            out.push(name);
        }

        let mut out = vec!["all"];
        let mut visited = HashSet::from(["all"]);
        for group in &host.groups {
            if let Some((name, _)) = self.groups.get_key_value(group.as_str()) {
                collect(self, name, &mut out, &mut visited);
            }
        }
        out
    }

    /// Host with group variables applied underneath its own settings
    fn effective_host(&self, host: &Host) -> InventoryResult<Host> {
        let mut base = Host::new(host.name.clone());
        for group_name in self.group_ancestry(host) {
            let Some(group) = self.groups.get(group_name) else {
                continue;
            };
            for (key, value) in &group.vars {
                match yaml_scalar(value) {
                    Some(scalar) if CONNECTION_VARS.contains(&key.as_str()) => {
                        base.apply_var(key, &scalar)?;
                    }
                    _ => base.set_var(key.clone(), value.clone()),
                }
            }
        }
        base.merge(host);
        Ok(base)
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a group by name
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Get all hosts in order of first appearance
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Get all groups
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Count total hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Count total groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Descriptions of the sources this inventory was built from
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Get hosts matching a pattern, ordered by first appearance and
    /// deduplicated.
    ///
    /// Supported patterns:
    /// - `all` or `*` - all hosts
    /// - `hostname` - specific host
    /// - `groupname` - all hosts in group, including child groups
    /// - `host1:host2`, `host1,host2` - union
    /// - `group1:&group2` - intersection
    /// - `group1:!group2` - exclusion
    /// - `~regex` - regex match on host name
    /// - `web*`, `db?`, `app[12]` - glob match on host and group names
    ///
    /// Intersections and exclusions apply after all unions regardless of
    /// their position; a pattern made only of exclusions starts from `all`.
    /// Terms that match nothing are ignored with a warning.
    pub fn get_hosts_for_pattern(&self, pattern: &str) -> InventoryResult<Vec<&Host>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        let mut unions = Vec::new();
        let mut intersections = Vec::new();
        let mut exclusions = Vec::new();

        for term in split_pattern(pattern) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(sub) = term.strip_prefix('&') {
                intersections.push(sub);
            } else if let Some(sub) = term.strip_prefix('!') {
                exclusions.push(sub);
            } else {
                unions.push(term);
            }
        }

        let mut selected: IndexSet<&str> = IndexSet::new();
        if unions.is_empty() {
            selected.extend(self.hosts.keys().map(String::as_str));
        }
        for term in unions {
            selected.extend(self.match_term(term)?);
        }
        for term in intersections {
            let keep: HashSet<&str> = self.match_term(term)?.into_iter().collect();
            selected.retain(|name| keep.contains(name));
        }
        for term in exclusions {
            let drop: HashSet<&str> = self.match_term(term)?.into_iter().collect();
            selected.retain(|name| !drop.contains(name));
        }

        Ok(selected
            .into_iter()
            .filter_map(|name| self.hosts.get(name))
            .collect())
    }

    /// Host names matched by a single pattern term
    fn match_term(&self, term: &str) -> InventoryResult<Vec<&str>> {
        if term == "all" || term == "*" {
            return Ok(self.hosts.keys().map(String::as_str).collect());
        }

        // `~` patterns match from the start of the host name
        if let Some(regex_str) = term.strip_prefix('~') {
            let regex = Regex::new(&format!("^(?:{})", regex_str))
                .map_err(|e| InventoryError::InvalidPattern(format!("{}: {}", term, e)))?;
            return Ok(self
                .hosts
                .keys()
                .filter(|name| regex.is_match(name))
                .map(String::as_str)
                .collect());
        }

        if term.contains(['*', '?', '[']) {
            let regex = Regex::new(&glob_to_regex(term))
                .map_err(|e| InventoryError::InvalidPattern(format!("{}: {}", term, e)))?;
            let mut matched: IndexSet<&str> = self
                .hosts
                .keys()
                .filter(|name| regex.is_match(name))
                .map(String::as_str)
                .collect();
            for group in self.groups.values().filter(|g| regex.is_match(&g.name)) {
                matched.extend(self.hosts_in_group(group));
            }
            return Ok(matched.into_iter().collect());
        }

        if let Some(group) = self.groups.get(term) {
            return Ok(self.hosts_in_group(group));
        }

        if let Some((name, _)) = self.hosts.get_key_value(term) {
            return Ok(vec![name.as_str()]);
        }

        warn!("Could not match supplied host pattern, ignoring: {}", term);
        Ok(Vec::new())
    }

    /// All hosts in a group, including hosts from child groups
    fn hosts_in_group<'a>(&'a self, group: &'a Group) -> Vec<&'a str> {
        fn collect<'a>(
            inventory: &'a Inventory,
            group: &'a Group,
            out: &mut IndexSet<&'a str>,
            visited: &mut HashSet<&'a str>,
        ) {
            if !visited.insert(group.name.as_str()) {
                return;
            }
            out.extend(group.hosts.iter().map(String::as_str));
            for child in &group.children {
                if let Some(child) = inventory.groups.get(child) {
                    collect(inventory, child, out, visited);
                }
            }
        }

        let mut out = IndexSet::new();
        collect(self, group, &mut out, &mut HashSet::new());
        out.into_iter().collect()
    }
}

/// Turn one host entry (bare name or mapping) into a [`Host`]
fn host_from_entry(group: &str, entry: &serde_yaml::Value) -> InventoryResult<Host> {
    use serde_yaml::Value;

    match entry {
        Value::String(name) => Ok(Host::new(name.clone())),
        Value::Mapping(map) => {
            match map.get("name") {
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(InventoryError::InvalidEntry {
                        group: group.to_string(),
                        reason: "'name' must be a string".to_string(),
                    })
                }
                None => {
                    return Err(InventoryError::MissingKey {
                        group: group.to_string(),
                        key: "name".to_string(),
                    })
                }
            }
            Ok(serde_yaml::from_value(entry.clone())?)
        }
        other => Err(InventoryError::InvalidEntry {
            group: group.to_string(),
            reason: format!("expected a host name or mapping, got {:?}", other),
        }),
    }
}

/// Split pattern by `:` or `,` but not inside brackets or braces
fn split_pattern(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth: usize = 0;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ':' | ',' if depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&pattern[start..]);
    parts
}

/// Convert a glob pattern to an anchored regex; `[...]` stays a character class
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut in_class = false;

    for ch in pattern.chars() {
        match ch {
            '*' if !in_class => regex.push_str(".*"),
            '?' if !in_class => regex.push('.'),
            '[' if !in_class => {
                in_class = true;
                regex.push('[');
            }
            ']' if in_class => {
                in_class = false;
                regex.push(']');
            }
            _ if in_class => regex.push(ch),
            _ => regex.push_str(&regex::escape(&ch.to_string())),
        }
    }

    regex.push('$');
    regex
}

/// Parse INI value (handle quoted strings, booleans, numbers)
fn parse_ini_value(value: &str) -> serde_yaml::Value {
    let value = value.trim();

    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        return serde_yaml::Value::String(value[1..value.len() - 1].to_string());
    }

    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" => return serde_yaml::Value::Bool(true),
        "false" | "no" | "off" => return serde_yaml::Value::Bool(false),
        _ => {}
    }

    if let Ok(n) = value.parse::<i64>() {
        return serde_yaml::Value::Number(n.into());
    }
    if let Ok(n) = value.parse::<f64>() {
        return serde_yaml::Value::Number(n.into());
    }

    serde_yaml::Value::String(value.to_string())
}

/// String form of a scalar YAML value
fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl std::fmt::Display for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Inventory ({} hosts, {} groups)",
            self.hosts.len(),
            self.groups.len()
        )?;

        for group in self.groups.values() {
            if group.is_empty() {
                continue;
            }
            writeln!(f, "  [{}]", group.name)?;
            for host_name in &group.hosts {
                if let Some(host) = self.hosts.get(host_name) {
                    writeln!(f, "    {}", host)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(hosts: &[&Host]) -> Vec<String> {
        hosts.iter().map(|h| h.name.clone()).collect()
    }

    fn sample() -> Inventory {
        Inventory::from_ini(
            r#"
[webservers]
web1 ansible_host=10.0.0.1
web2 ansible_host=10.0.0.2

[databases]
db1 ansible_host=10.0.0.10
web1

[webservers:vars]
ansible_user=deploy
http_port=80

[production:children]
webservers
databases
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_inventory() {
        let inv = Inventory::new();
        assert_eq!(inv.host_count(), 0);
        assert!(inv.get_group("all").is_some());
        assert!(inv.get_group("ungrouped").is_some());
    }

    #[test]
    fn test_parse_ini() {
        let inv = sample();
        assert_eq!(inv.host_count(), 3);

        let webservers = inv.get_group("webservers").unwrap();
        assert!(webservers.has_host("web1"));
        assert!(webservers.has_host("web2"));
        assert_eq!(
            webservers.vars.get("http_port"),
            Some(&serde_yaml::Value::Number(80.into()))
        );

        let production = inv.get_group("production").unwrap();
        assert!(production.children.contains("databases"));
        assert!(inv.get_group("databases").unwrap().parents.contains("production"));
    }

    #[test]
    fn test_group_connection_vars_apply_to_hosts() {
        let inv = sample();
        let web2 = inv.get_host("web2").unwrap();
        assert_eq!(web2.connection.user.as_deref(), Some("deploy"));
        assert_eq!(web2.address(), "10.0.0.2");
        assert_eq!(
            web2.get_var("http_port"),
            Some(&serde_yaml::Value::Number(80.into()))
        );
        assert!(inv.get_host("db1").unwrap().connection.user.is_none());
    }

    #[test]
    fn test_parse_ini_rejects_unknown_section() {
        let err = Inventory::from_ini("[web:hosts]\nweb1\n").unwrap_err();
        assert!(matches!(err, InventoryError::InvalidIniFormat(_)));
    }

    #[test]
    fn test_parse_yaml_shapes() {
        let inv = Inventory::from_yaml(
            r#"
web:
  - h1
  - name: h2
    address: 10.0.0.2
    port: 2202
    rack: a1
db:
  hosts:
    - d1
  vars:
    ansible_user: postgres
prod:
  children: [web, db]
empty:
"#,
        )
        .unwrap();

        assert_eq!(inv.host_count(), 3);
        let h2 = inv.get_host("h2").unwrap();
        assert_eq!(h2.address(), "10.0.0.2");
        assert_eq!(h2.connection.port, 2202);
        assert_eq!(
            inv.get_host("d1").unwrap().connection.user.as_deref(),
            Some("postgres")
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("prod").unwrap()),
            vec!["h1", "h2", "d1"]
        );
        assert!(inv.get_hosts_for_pattern("empty").unwrap().is_empty());
    }

    #[test]
    fn test_parse_yaml_nested_ansible_form() {
        let inv = Inventory::from_yaml(
            r#"
all:
  children:
    web:
      hosts:
        web1:
          ansible_host: 192.168.0.1
        web2:
"#,
        )
        .unwrap();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("web").unwrap()),
            vec!["web1", "web2"]
        );
        assert_eq!(inv.get_host("web1").unwrap().address(), "192.168.0.1");
    }

    #[test]
    fn test_yaml_entry_without_name_fails() {
        let err = Inventory::from_yaml("web:\n  - address: 10.0.0.1\n").unwrap_err();
        match err {
            InventoryError::MissingKey { group, key } => {
                assert_eq!(group, "web");
                assert_eq!(key, "name");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_json() {
        let inv = Inventory::from_json(
            r#"{"web": {"hosts": ["a", "b"], "vars": {"ansible_port": 2222}}, "_meta": {"hostvars": {}}}"#,
        )
        .unwrap();
        assert_eq!(inv.host_count(), 2);
        assert_eq!(inv.get_host("a").unwrap().connection.port, 2222);
    }

    #[test]
    fn test_host_list() {
        let inv = Inventory::from_host_list("web1, web2,localhost,").unwrap();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("all").unwrap()),
            vec!["web1", "web2", "localhost"]
        );
        assert!(inv.get_host("localhost").unwrap().is_local());
        assert!(inv.get_group("ungrouped").unwrap().has_host("web1"));
    }

    #[test]
    fn test_pattern_union_is_ordered_and_deduplicated() {
        let inv = sample();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("databases:webservers").unwrap()),
            vec!["db1", "web1", "web2"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("web2,web1,web2").unwrap()),
            vec!["web2", "web1"]
        );
    }

    #[test]
    fn test_pattern_intersection_and_exclusion() {
        let inv = sample();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("webservers:&databases").unwrap()),
            vec!["web1"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("!databases:production").unwrap()),
            vec!["web2"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("!webservers").unwrap()),
            vec!["db1"]
        );
    }

    #[test]
    fn test_glob_and_regex_patterns() {
        let inv = sample();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("web*").unwrap()),
            vec!["web1", "web2"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("web[2]").unwrap()),
            vec!["web2"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("~^(db|web)1$").unwrap()),
            vec!["web1", "db1"]
        );
        assert!(matches!(
            inv.get_hosts_for_pattern("~web(").unwrap_err(),
            InventoryError::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_regex_pattern_anchored_at_start() {
        let inv = Inventory::from_host_list("web1,myweb1,web22,").unwrap();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("~web\\d").unwrap()),
            vec!["web1", "web22"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("~.*web1").unwrap()),
            vec!["web1", "myweb1"]
        );
        assert_eq!(
            names(&inv.get_hosts_for_pattern("~web|myweb").unwrap()),
            vec!["web1", "myweb1", "web22"]
        );
    }

    #[test]
    fn test_unknown_term_matches_nothing() {
        let inv = sample();
        assert!(inv.get_hosts_for_pattern("nosuchgroup").unwrap().is_empty());
        assert_eq!(
            names(&inv.get_hosts_for_pattern("nosuchgroup:db1").unwrap()),
            vec!["db1"]
        );
    }

    #[test]
    fn test_cycle_detection() {
        let err = Inventory::from_ini("[a:children]\nb\n[b:children]\na\n").unwrap_err();
        assert!(matches!(err, InventoryError::CircularDependency(_)));
    }

    #[test]
    fn test_merge_inventories() {
        let mut inv = Inventory::from_host_list("a,b").unwrap();
        let other = Inventory::from_yaml("web: [b, c]\n").unwrap();
        inv.merge(other).unwrap();
        assert_eq!(
            names(&inv.get_hosts_for_pattern("all").unwrap()),
            vec!["a", "b", "c"]
        );
        assert!(inv.get_host("b").unwrap().in_group("web"));
    }

    #[test]
    fn test_split_and_glob_helpers() {
        assert_eq!(split_pattern("a:b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_pattern("~w\\d{1,2}:db"), vec!["~w\\d{1,2}", "db"]);
        assert_eq!(glob_to_regex("web*.example"), "^web.*\\.example$");
    }
}
