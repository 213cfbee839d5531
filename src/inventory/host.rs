//! Host definition for the Fanout inventory.
//!
//! A [`Host`] is the single value type every inventory shape normalizes
//! into: a bare name in a YAML list, a mapping with connection parameters,
//! an INI host line or an entry of an ad-hoc `h1,h2,` list.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Transport used to reach a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// OpenSSH client (default)
    #[default]
    Ssh,
    /// Local execution on the control node
    Local,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Ssh => write!(f, "ssh"),
            ConnectionType::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = HostParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ssh" | "paramiko_ssh" | "paramiko" | "smart" => Ok(ConnectionType::Ssh),
            "local" => Ok(ConnectionType::Local),
            other => Err(HostParseError::InvalidConnectionType(other.to_string())),
        }
    }
}

/// Connection parameters for a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Connection type
    #[serde(default, alias = "ansible_connection")]
    pub connection: ConnectionType,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port", alias = "ansible_port")]
    pub port: u16,

    /// Remote user
    #[serde(
        default,
        alias = "ansible_user",
        skip_serializing_if = "Option::is_none"
    )]
    pub user: Option<String>,

    /// Private key used for authentication
    #[serde(
        default,
        alias = "ansible_ssh_private_key_file",
        alias = "key_file",
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key_file: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            connection: ConnectionType::default(),
            port: default_ssh_port(),
            user: None,
            private_key_file: None,
        }
    }
}

/// A managed host in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host name; the identity used in reports
    pub name: String,

    /// Hostname or IP to connect to (if different from name)
    #[serde(
        default,
        alias = "ansible_host",
        skip_serializing_if = "Option::is_none"
    )]
    pub address: Option<String>,

    /// Connection parameters
    #[serde(flatten)]
    pub connection: ConnectionParams,

    /// Host-specific variables
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: IndexMap<String, serde_yaml::Value>,

    /// Groups this host belongs to
    #[serde(skip)]
    pub groups: BTreeSet<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            connection: ConnectionParams::default(),
            vars: IndexMap::new(),
            groups: BTreeSet::new(),
        }
    }

    /// Create a new host with hostname/IP
    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut host = Self::new(name);
        host.address = Some(address.into());
        host
    }

    /// Create a host reached through the local transport
    pub fn local(name: impl Into<String>) -> Self {
        let mut host = Self::new(name);
        host.connection.connection = ConnectionType::Local;
        host
    }

    /// Host identity
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the actual address to connect to
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    /// Whether commands for this host run on the control node
    pub fn is_local(&self) -> bool {
        self.connection.connection == ConnectionType::Local
    }

    /// Key identifying interchangeable connections to this host
    pub fn connection_key(&self) -> String {
        match self.connection.connection {
            ConnectionType::Local => format!("local://{}", self.name),
            ConnectionType::Ssh => format!(
                "ssh://{}@{}:{}",
                self.connection.user.as_deref().unwrap_or(""),
                self.address(),
                self.connection.port
            ),
        }
    }

    /// Set a variable on this host
    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this host
    pub fn get_var(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.vars.get(key)
    }

    /// Add this host to a group
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    /// Check if host belongs to a specific group
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Set SSH port
    pub fn set_port(&mut self, port: u16) {
        self.connection.port = port;
    }

    /// Set remote user
    pub fn set_user(&mut self, user: impl Into<String>) {
        self.connection.user = Some(user.into());
    }

    /// Set private key file
    pub fn set_private_key(&mut self, key_file: impl Into<String>) {
        self.connection.private_key_file = Some(key_file.into());
    }

    /// Merge another definition of the same host into this one.
    ///
    /// Connection parameters that differ from the defaults win, variables
    /// are overlaid and group membership is unioned.
    pub fn merge(&mut self, other: &Host) {
        if other.address.is_some() {
            self.address = other.address.clone();
        }
        if other.connection.connection != ConnectionType::default() {
            self.connection.connection = other.connection.connection;
        }
        if other.connection.port != default_ssh_port() {
            self.connection.port = other.connection.port;
        }
        if other.connection.user.is_some() {
            self.connection.user = other.connection.user.clone();
        }
        if other.connection.private_key_file.is_some() {
            self.connection.private_key_file = other.connection.private_key_file.clone();
        }
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
        self.groups.extend(other.groups.iter().cloned());
    }

    /// Apply a `key=value` host variable, recognizing connection variables.
    pub fn apply_var(&mut self, key: &str, value: &str) -> Result<(), HostParseError> {
        match key {
            "ansible_host" | "address" => self.address = Some(value.to_string()),
            "ansible_port" | "port" => {
                self.connection.port = value
                    .parse()
                    .map_err(|_| HostParseError::InvalidPort(value.to_string()))?;
            }
            "ansible_user" | "user" => self.connection.user = Some(value.to_string()),
            "ansible_ssh_private_key_file" | "private_key_file" => {
                self.connection.private_key_file = Some(value.to_string())
            }
            "ansible_connection" | "connection" => {
                self.connection.connection = value.parse()?;
            }
            _ => {
                self.vars
                    .insert(key.to_string(), serde_yaml::Value::String(value.to_string()));
            }
        }
        Ok(())
    }

    /// Parse host definition from an INI line (e.g., "web1 ansible_host=10.0.0.1 ansible_port=22")
    pub fn parse(input: &str) -> Result<Self, HostParseError> {
        let parts = shell_words::split(input)
            .map_err(|e| HostParseError::InvalidSyntax(e.to_string()))?;
        let Some((name, vars)) = parts.split_first() else {
            return Err(HostParseError::EmptyInput);
        };

        let mut host = Host::new(name.clone());
        for part in vars {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| HostParseError::InvalidSyntax(part.clone()))?;
            host.apply_var(key, value)?;
        }

        Ok(host)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(addr) = &self.address {
            write!(f, " ({})", addr)?;
        }
        Ok(())
    }
}

/// Errors that can occur when parsing a host definition
#[derive(Debug, thiserror::Error)]
pub enum HostParseError {
    #[error("empty input")]
    EmptyInput,
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid connection type: {0}")]
    InvalidConnectionType(String),
    #[error("invalid host definition: {0}")]
    InvalidSyntax(String),
}
