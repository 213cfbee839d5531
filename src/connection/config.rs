//! Connection configuration module
//!
//! Transport settings shared by every connection of a run: which ssh client
//! to run, how long to wait for it, multiplexing and host key policy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of an idle ssh control master
pub const DEFAULT_CONTROL_PERSIST: Duration = Duration::from_secs(60);

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// ssh client binary; looked up on `PATH` when unset
    pub ssh_executable: Option<PathBuf>,

    /// Timeout for establishing a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long the control master outlives its last session
    #[serde(with = "humantime_serde")]
    pub control_persist: Duration,

    /// Verify host keys against known_hosts
    pub host_key_checking: bool,

    /// Extra arguments passed to every ssh invocation
    pub ssh_args: Vec<String>,

    /// Remote user for hosts that do not name one
    pub remote_user: Option<String>,

    /// Private key for hosts that do not name one
    pub private_key_file: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ssh_executable: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            control_persist: DEFAULT_CONTROL_PERSIST,
            host_key_checking: true,
            ssh_args: Vec::new(),
            remote_user: None,
            private_key_file: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ssh_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_executable = Some(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = Some(user.into());
        self
    }

    pub fn with_host_key_checking(mut self, enabled: bool) -> Self {
        self.host_key_checking = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.control_persist, Duration::from_secs(60));
        assert!(config.host_key_checking);
        assert!(config.ssh_executable.is_none());
    }

    #[test]
    fn test_deserialize_humantime() {
        let config: ConnectionConfig = toml::from_str(
            r#"
connect_timeout = "3s"
control_persist = "5m"
host_key_checking = false
ssh_args = ["-o", "Compression=yes"]
"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.control_persist, Duration::from_secs(300));
        assert!(!config.host_key_checking);
        assert_eq!(config.ssh_args.len(), 2);
    }
}
