//! Connection layer for remote host communication.
//!
//! This module provides a unified interface for executing commands on hosts
//! regardless of the transport. All transports implement the [`Connection`]
//! trait; a [`Connector`] establishes them and the [`ConnectionPool`] leases
//! them to the dispatcher.
//!
//! # Supported Transports
//!
//! - **SSH** (via the system OpenSSH client, `ssh` feature, default): remote
//!   execution multiplexed over a control socket kept in the run workspace
//! - **Local**: Direct execution on the control node
//!
//! # Example
//!
//! ```rust,ignore
//! use fanout::connection::{Connection, ExecuteOptions, LocalConnection};
//!
//! let conn = LocalConnection::new();
//! let opts = ExecuteOptions::new().with_cwd("/opt/app");
//! let result = conn.execute("uname -a", Some(opts)).await?;
//! println!("Output: {}", result.stdout);
//! ```

/// Connection configuration types.
pub mod config;

/// Local execution connection implementation.
pub mod local;

/// Bounded pool of reusable connections.
pub mod pool;

/// SSH implementation using the OpenSSH client binary.
#[cfg(feature = "ssh")]
pub mod ssh;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::inventory::{ConnectionType, Host};

pub use config::ConnectionConfig;
pub use local::LocalConnection;
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
#[cfg(feature = "ssh")]
pub use ssh::SshConnection;

/// Errors that can occur during connection operations.
///
/// Every variant tied to a host carries its name so that a failure can be
/// attributed without additional context.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection to the host.
    #[error("Connection to {host} failed: {message}")]
    ConnectionFailed { host: String, message: String },

    /// No pool slot became available within the acquire timeout.
    #[error("Timed out after {timeout:?} waiting for a connection slot for {host}")]
    AcquireTimeout { host: String, timeout: Duration },

    /// The transport broke while a command was running.
    #[error("Command execution on {host} failed: {message}")]
    ExecutionFailed { host: String, message: String },

    /// A command exceeded the timeout given in its [`ExecuteOptions`].
    #[error("Command on {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    /// The pool has been closed and accepts no new acquisitions.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Name of the host the error concerns, if any
    pub fn host(&self) -> Option<&str> {
        match self {
            ConnectionError::ConnectionFailed { host, .. }
            | ConnectionError::AcquireTimeout { host, .. }
            | ConnectionError::ExecutionFailed { host, .. }
            | ConnectionError::Timeout { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Whether the error means the host could not be reached or the
    /// transport to it broke.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConnectionFailed { .. }
                | ConnectionError::ExecutionFailed { .. }
                | ConnectionError::Timeout { .. }
                | ConnectionError::Io(_)
        )
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// ```rust
/// use fanout::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Timeout (None for no timeout)
    pub timeout: Option<Duration>,
    /// Run command with privilege escalation
    pub escalate: bool,
    /// User to escalate to (default: root)
    pub escalate_user: Option<String>,
    /// Method for privilege escalation (sudo, su, doas)
    pub escalate_method: Option<String>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable privilege escalation
    pub fn with_escalation(mut self, user: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_user = user;
        self
    }

    /// Set the escalation method
    pub fn with_escalate_method(mut self, method: impl Into<String>) -> Self {
        self.escalate_method = Some(method.into());
        self
    }

    /// Wrap a shell command for execution through a remote shell, applying
    /// the working directory, environment and escalation settings.
    pub fn wrap_shell_command(&self, command: &str) -> String {
        let mut script = String::new();
        if let Some(cwd) = &self.cwd {
            script.push_str(&format!("cd {} && ", shell_words::quote(cwd)));
        }
        let mut env: Vec<_> = self.env.iter().collect();
        env.sort();
        for (key, value) in env {
            script.push_str(&format!("export {}={}; ", key, shell_words::quote(value)));
        }
        script.push_str(command);

        let quoted = shell_words::quote(&script).into_owned();
        if !self.escalate {
            return format!("/bin/sh -c {}", quoted);
        }

        let user = self.escalate_user.as_deref().unwrap_or("root");
        match self.escalate_method.as_deref().unwrap_or("sudo") {
            "su" => format!("su - {} -c {}", user, quoted),
            "doas" => format!("doas -u {} /bin/sh -c {}", user, quoted),
            _ => format!("sudo -n -u {} -- /bin/sh -c {}", user, quoted),
        }
    }
}

/// The main connection trait that all transport implementations must implement
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (host name)
    fn identifier(&self) -> &str;

    /// Check if the connection is still alive
    async fn is_alive(&self) -> bool;

    /// Execute a command on the host
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Close the connection
    async fn close(&self) -> ConnectionResult<()>;
}

/// Establishes connections for hosts.
///
/// `workdir` is the run workspace; transports may keep per-run state there
/// (the SSH transport places its control sockets in it).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &Host, workdir: &Path) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Connector that picks the transport from the host's connection type
#[derive(Debug, Clone, Default)]
pub struct TransportConnector {
    config: Arc<ConnectionConfig>,
}

impl TransportConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self, host: &Host, workdir: &Path) -> ConnectionResult<Arc<dyn Connection>> {
        match host.connection.connection {
            ConnectionType::Local => Ok(Arc::new(LocalConnection::with_identifier(host.name()))),
            ConnectionType::Ssh => {
                #[cfg(feature = "ssh")]
                {
                    let conn = SshConnection::connect(host, &self.config, workdir).await?;
                    Ok(Arc::new(conn))
                }
                #[cfg(not(feature = "ssh"))]
                {
                    let _ = workdir;
                    Err(ConnectionError::InvalidConfig(
                        "No SSH transport available. Enable the 'ssh' feature.".to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_host_and_classification() {
        let err = ConnectionError::ConnectionFailed {
            host: "web1".into(),
            message: "refused".into(),
        };
        assert_eq!(err.host(), Some("web1"));
        assert!(err.is_unreachable());

        let err = ConnectionError::AcquireTimeout {
            host: "web2".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.host(), Some("web2"));
        assert!(!err.is_unreachable());
        assert!(err.to_string().contains("connection slot"));

        assert_eq!(ConnectionError::PoolClosed.host(), None);
    }

    #[test]
    fn test_wrap_shell_command() {
        let opts = ExecuteOptions::new();
        assert_eq!(opts.wrap_shell_command("uptime"), "/bin/sh -c uptime");

        let opts = ExecuteOptions::new()
            .with_cwd("/srv/my app")
            .with_env("MODE", "fast");
        assert_eq!(
            opts.wrap_shell_command("make"),
            "/bin/sh -c 'cd '\\''/srv/my app'\\'' && export MODE=fast; make'"
        );

        let opts = ExecuteOptions::new().with_escalation(Some("postgres".into()));
        assert_eq!(
            opts.wrap_shell_command("id -un"),
            "sudo -n -u postgres -- /bin/sh -c 'id -un'"
        );

        let opts = ExecuteOptions::new()
            .with_escalation(None)
            .with_escalate_method("doas");
        assert_eq!(opts.wrap_shell_command("id"), "doas -u root /bin/sh -c id");
    }

    #[tokio::test]
    async fn test_transport_connector_local() {
        let connector = TransportConnector::default();
        let host = Host::local("control");
        let dir = tempfile::tempdir().unwrap();
        let conn = connector.connect(&host, dir.path()).await.unwrap();
        assert_eq!(conn.identifier(), "control");
        let result = conn.execute("echo pooled", None).await.unwrap();
        assert_eq!(result.stdout.trim(), "pooled");
    }
}
