//! Group definition for the Fanout inventory.
//!
//! Groups keep their members in insertion order so that pattern resolution
//! can report hosts in the order they first appear in the inventory source.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// A group of hosts in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Host names belonging to this group
    #[serde(default)]
    pub hosts: IndexSet<String>,

    /// Child group names
    #[serde(default)]
    pub children: IndexSet<String>,

    /// Parent group names (computed from children relationships)
    #[serde(skip)]
    pub parents: IndexSet<String>,

    /// Group-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,
}

impl Group {
    /// Create a new group with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: IndexSet::new(),
            children: IndexSet::new(),
            parents: IndexSet::new(),
            vars: IndexMap::new(),
        }
    }

    /// Create the special "all" group
    pub fn all() -> Self {
        Self::new("all")
    }

    /// Create the special "ungrouped" group
    pub fn ungrouped() -> Self {
        Self::new("ungrouped")
    }

    /// Add a host to this group
    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    /// Remove a host from this group
    pub fn remove_host(&mut self, host: &str) -> bool {
        self.hosts.shift_remove(host)
    }

    /// Check if a host belongs directly to this group
    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Add a child group
    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    /// Add a parent group
    pub fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    /// Set a group variable
    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// Overlay variables onto this group
    pub fn merge_vars(&mut self, other: &IndexMap<String, serde_yaml::Value>) {
        for (key, value) in other {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Whether the group has neither hosts nor children
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.children.is_empty()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Group {}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_keeps_insertion_order() {
        let mut group = Group::new("web");
        group.add_host("web3");
        group.add_host("web1");
        group.add_host("web3");
        group.add_host("web2");
        let hosts: Vec<_> = group.hosts.iter().map(String::as_str).collect();
        assert_eq!(hosts, vec!["web3", "web1", "web2"]);

        assert!(group.remove_host("web1"));
        assert!(!group.has_host("web1"));
        assert!(!group.is_empty());
    }

    #[test]
    fn test_group_vars() {
        let mut group = Group::new("db");
        group.set_var("ansible_user", serde_yaml::Value::String("postgres".into()));
        let mut overlay = IndexMap::new();
        overlay.insert(
            "ansible_user".to_string(),
            serde_yaml::Value::String("admin".into()),
        );
        group.merge_vars(&overlay);
        assert_eq!(
            group.vars.get("ansible_user"),
            Some(&serde_yaml::Value::String("admin".into()))
        );
    }
}
