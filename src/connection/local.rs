//! Local connection module
//!
//! Executes commands on the control node through `sh -c`, without any
//! network transport.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    /// Identifier for this connection
    identifier: String,
}

impl LocalConnection {
    /// Create a new local connection named after the control node
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    /// Build the command with options
    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = if options.escalate {
            let escalate_method = options.escalate_method.as_deref().unwrap_or("sudo");
            let escalate_user = options.escalate_user.as_deref().unwrap_or("root");

            match escalate_method {
                "su" => {
                    let mut c = Command::new("su");
                    c.arg("-").arg(escalate_user).arg("-c").arg(command);
                    c
                }
                "doas" => {
                    let mut c = Command::new("doas");
                    c.arg("-u")
                        .arg(escalate_user)
                        .arg("sh")
                        .arg("-c")
                        .arg(command);
                    c
                }
                _ => {
                    let mut c = Command::new("sudo");
                    c.arg("-n").arg("-u").arg(escalate_user);
                    c.arg("--").arg("sh").arg("-c").arg(command);
                    c
                }
            }
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        // A dropped execution future (timeout, cancellation) must not leave
        // the child running.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(host = %self.identifier, command = %command, "Executing local command");

        let mut cmd = self.build_command(command, &options);

        let child = cmd.spawn().map_err(|e| ConnectionError::ExecutionFailed {
            host: self.identifier.clone(),
            message: format!("Failed to spawn process: {}", e),
        })?;

        let wait = child.wait_with_output();
        let output = match options.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(ConnectionError::Timeout {
                        host: self.identifier.clone(),
                        timeout,
                    })
                }
            },
            None => wait.await,
        }
        .map_err(|e| ConnectionError::ExecutionFailed {
            host: self.identifier.clone(),
            message: format!("Failed to wait for process: {}", e),
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_execute() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo 'hello world'", None).await.unwrap();

        assert!(result.success);
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_local_execute_with_env_and_cwd() {
        let conn = LocalConnection::with_identifier("ctl");
        let options = ExecuteOptions::new()
            .with_env("TEST_VAR", "test_value")
            .with_cwd("/tmp");
        let result = conn
            .execute("echo $TEST_VAR; pwd", Some(options))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.stdout.contains("test_value"));
        assert!(result.stdout.contains("/tmp"));
    }

    #[tokio::test]
    async fn test_local_execute_failure() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo oops >&2; exit 42", None).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.combined_output().trim(), "oops");
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let conn = LocalConnection::with_identifier("slow");
        let options = ExecuteOptions::new().with_timeout(Duration::from_millis(200));
        let result = conn.execute("sleep 10", Some(options)).await;

        match result {
            Err(ConnectionError::Timeout { host, timeout }) => {
                assert_eq!(host, "slow");
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_is_alive() {
        let conn = LocalConnection::new();
        assert!(conn.is_alive().await);
        assert!(conn.close().await.is_ok());
    }
}
