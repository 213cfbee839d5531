//! Configuration module for Fanout
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/fanout/fanout.toml)
//! - User configuration (~/.fanout.toml, ~/.fanout/config.toml)
//! - Project configuration (./fanout.toml)
//! - Environment variables
//!
//! Command-line flags are applied on top by the CLI.

use anyhow::{Context, Result};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::connection::{ConnectionConfig, ExecuteOptions, PoolConfig};
use crate::executor::controller::ControllerConfig;
use crate::executor::task::{DEFAULT_FORKS, DEFAULT_MODULE, DEFAULT_TIMEOUT};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// Connection pool settings
    pub pool: PoolConfig,

    /// Privilege escalation settings
    pub privilege_escalation: PrivilegeEscalation,

    /// SSH transport settings
    pub ssh: ConnectionConfig,

    /// Colors and output settings
    pub colors: ColorsConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            pool: PoolConfig::default(),
            privilege_escalation: PrivilegeEscalation::default(),
            ssh: ConnectionConfig::default(),
            colors: ColorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Default inventory path
    pub inventory: Option<PathBuf>,

    /// Default remote user
    pub remote_user: Option<String>,

    /// Default number of forks (parallel hosts)
    pub forks: usize,

    /// Default module
    pub module_name: String,

    /// Default per-host timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Default deadline for a whole run
    #[serde(with = "humantime_serde")]
    pub global_timeout: Option<Duration>,

    /// Parent directory for run workspaces
    pub local_tmp: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            inventory: None,
            remote_user: None,
            forks: DEFAULT_FORKS,
            module_name: DEFAULT_MODULE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            global_timeout: None,
            local_tmp: None,
        }
    }
}

/// Privilege escalation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeEscalation {
    /// Enable become by default
    pub r#become: bool,

    /// Default become method
    pub become_method: String,

    /// Default become user
    pub become_user: Option<String>,
}

impl Default for PrivilegeEscalation {
    fn default() -> Self {
        Self {
            r#become: false,
            become_method: "sudo".to_string(),
            become_user: None,
        }
    }
}

/// Colors configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// Enable colors
    pub enabled: bool,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level when neither `-v` nor `RUST_LOG` say otherwise
    pub level: String,

    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                debug!(path = %path.display(), "Loading configuration file");
                merge_values(&mut merged, Self::read_file(&path)?);
            } else if config_path.is_some() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid configuration")?;

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest precedence first
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        // Explicit path takes priority
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }

        if let Ok(env_config) = std::env::var("FANOUT_CONFIG") {
            return vec![PathBuf::from(shellexpand::tilde(&env_config).into_owned())];
        }

        let mut paths = vec![PathBuf::from("/etc/fanout/fanout.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".fanout.toml"));
            paths.push(home.join(".fanout/config.toml"));
        }

        paths.push(PathBuf::from("fanout.toml"));
        paths
    }

    /// Parse one configuration file into a generic document
    fn read_file(path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        // Determine format based on extension
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let value = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
        };

        Ok(value)
    }

    /// Load from a specific file on top of the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Config::default())?;
        merge_values(&mut merged, Self::read_file(path.as_ref())?);
        serde_json::from_value(merged).context("Invalid configuration")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // FANOUT_FORKS
        if let Ok(forks) = std::env::var("FANOUT_FORKS") {
            self.defaults.forks = forks
                .parse()
                .with_context(|| format!("Invalid FANOUT_FORKS: {}", forks))?;
        }

        // FANOUT_TIMEOUT
        if let Ok(timeout) = std::env::var("FANOUT_TIMEOUT") {
            self.defaults.timeout = parse_duration(&timeout)
                .map_err(anyhow::Error::msg)
                .context("Invalid FANOUT_TIMEOUT")?;
        }

        // FANOUT_REMOTE_USER
        if let Ok(user) = std::env::var("FANOUT_REMOTE_USER") {
            self.defaults.remote_user = Some(user);
        }

        // FANOUT_POOL_SIZE
        if let Ok(size) = std::env::var("FANOUT_POOL_SIZE") {
            self.pool.capacity = Some(
                size.parse::<usize>()
                    .with_context(|| format!("Invalid FANOUT_POOL_SIZE: {}", size))?,
            );
        }

        // FANOUT_BECOME
        if let Ok(value) = std::env::var("FANOUT_BECOME") {
            self.privilege_escalation.r#become =
                !matches!(value.to_lowercase().as_str(), "" | "0" | "false" | "no");
        }

        // FANOUT_BECOME_USER
        if let Ok(user) = std::env::var("FANOUT_BECOME_USER") {
            self.privilege_escalation.become_user = Some(user);
        }

        // FANOUT_LOCAL_TMP
        if let Ok(path) = std::env::var("FANOUT_LOCAL_TMP") {
            self.defaults.local_tmp = Some(PathBuf::from(path));
        }

        // FANOUT_INVENTORY
        if let Ok(path) = std::env::var("FANOUT_INVENTORY") {
            self.defaults.inventory = Some(PathBuf::from(path));
        }

        // FANOUT_SSH_EXECUTABLE
        if let Ok(path) = std::env::var("FANOUT_SSH_EXECUTABLE") {
            self.ssh.ssh_executable = Some(PathBuf::from(path));
        }

        // NO_COLOR
        if std::env::var_os("NO_COLOR").is_some() {
            self.colors.enabled = false;
        }

        Ok(())
    }

    /// Get the effective inventory path
    pub fn inventory_path(&self) -> Option<&PathBuf> {
        self.defaults.inventory.as_ref()
    }

    /// Check if become is enabled
    pub fn become_enabled(&self) -> bool {
        self.privilege_escalation.r#become
    }

    /// Transport settings with the default remote user folded in
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut connection = self.ssh.clone();
        if connection.remote_user.is_none() {
            connection.remote_user = self.defaults.remote_user.clone();
        }
        connection
    }

    /// Controller settings derived from this configuration
    pub fn controller_config(&self) -> ControllerConfig {
        let mut controller = ControllerConfig::default()
            .with_pool(self.pool.clone())
            .with_connection(self.connection_config());
        controller.local_tmp = self.defaults.local_tmp.clone();
        controller
    }

    /// Escalation options from the configured defaults
    pub fn escalation(&self) -> ExecuteOptions {
        if !self.become_enabled() {
            return ExecuteOptions::new();
        }
        ExecuteOptions::new()
            .with_escalation(self.privilege_escalation.become_user.clone())
            .with_escalate_method(self.privilege_escalation.become_method.clone())
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else
/// is replaced.
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parse a duration given as plain seconds (`30`) or humantime (`1m 30s`)
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let deserializer: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
        value.into_deserializer();
    humantime_serde::deserialize(deserializer)
        .map_err(|e| format!("invalid duration '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.forks, 5);
        assert_eq!(config.defaults.timeout, Duration::from_secs(300));
        assert_eq!(config.defaults.module_name, "command");
        assert!(!config.privilege_escalation.r#become);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut base = serde_json::to_value(Config::default()).unwrap();
        merge_values(
            &mut base,
            serde_json::json!({"defaults": {"forks": 10}, "ssh": {"host_key_checking": false}}),
        );
        let config: Config = serde_json::from_value(base).unwrap();
        assert_eq!(config.defaults.forks, 10);
        assert_eq!(config.defaults.module_name, "command");
        assert!(!config.ssh.host_key_checking);
        assert_eq!(config.ssh.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "fanout.toml",
            r#"
[defaults]
forks = 12
timeout = "45s"
remote_user = "deploy"

[pool]
capacity = 4
acquire_timeout = "2s"

[privilege_escalation]
become = true
become_user = "postgres"

[logging]
format = "json"
"#,
        );

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.defaults.forks, 12);
        assert_eq!(config.defaults.timeout, Duration::from_secs(45));
        assert_eq!(config.pool.capacity, Some(4));
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(2));
        assert!(config.become_enabled());
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.connection_config().remote_user.as_deref(),
            Some("deploy")
        );

        let escalation = config.escalation();
        assert!(escalation.escalate);
        assert_eq!(escalation.escalate_user.as_deref(), Some("postgres"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "fanout.yml",
            "defaults:\n  module_name: shell\nssh:\n  ssh_args: ['-o', 'Compression=yes']\n",
        );
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.defaults.module_name, "shell");
        assert_eq!(config.ssh.ssh_args.len(), 2);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/fanout.toml"))).is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("FANOUT_FORKS", "20");
        std::env::set_var("FANOUT_TIMEOUT", "2m");
        std::env::set_var("FANOUT_BECOME", "yes");
        std::env::set_var("FANOUT_POOL_SIZE", "3");
        let mut config = Config::default();
        let applied = config.apply_env_overrides();
        std::env::remove_var("FANOUT_FORKS");
        std::env::remove_var("FANOUT_TIMEOUT");
        std::env::remove_var("FANOUT_BECOME");
        std::env::remove_var("FANOUT_POOL_SIZE");

        applied.unwrap();
        assert_eq!(config.defaults.forks, 20);
        assert_eq!(config.defaults.timeout, Duration::from_secs(120));
        assert!(config.become_enabled());
        assert_eq!(config.pool.capacity, Some(3));
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        std::env::set_var("FANOUT_FORKS", "many");
        let mut config = Config::default();
        let applied = config.apply_env_overrides();
        std::env::remove_var("FANOUT_FORKS");
        assert!(applied.is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m 30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert!(parse_duration("soon").is_err());
    }
}
