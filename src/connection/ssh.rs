//! SSH connection module
//!
//! Runs commands through the system OpenSSH client. The first invocation
//! for a host starts a control master whose socket lives in the run
//! workspace; later commands reuse it, so a pooled connection costs one TCP
//! session regardless of how many commands run over it.
//!
//! The client reserves exit status 255 for its own failures, which is how
//! a broken transport is told apart from a failing remote command.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use super::config::ConnectionConfig;
use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};
use crate::inventory::Host;

/// Exit status the OpenSSH client uses for its own errors
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Extra time granted on top of `ConnectTimeout` before the client is killed
const CONNECT_GRACE: Duration = Duration::from_secs(5);

/// SSH connection backed by an OpenSSH control master
#[derive(Debug)]
pub struct SshConnection {
    /// Host name from the inventory
    identifier: String,
    /// Address passed to the client
    destination: String,
    /// ssh binary
    executable: PathBuf,
    /// Options shared by every invocation
    args: Vec<String>,
    /// Control socket path
    control_path: PathBuf,
    connect_timeout: Duration,
    alive: AtomicBool,
}

impl SshConnection {
    /// Connect to a host, starting the control master.
    pub async fn connect(
        host: &Host,
        config: &ConnectionConfig,
        workdir: &Path,
    ) -> ConnectionResult<Self> {
        let executable = match &config.ssh_executable {
            Some(path) => path.clone(),
            None => which::which("ssh").map_err(|e| {
                ConnectionError::InvalidConfig(format!("ssh client not found on PATH: {}", e))
            })?,
        };

        let control_path = workdir.join("%C");
        let conn = Self {
            identifier: host.name().to_string(),
            destination: host.address().to_string(),
            executable,
            args: Self::build_args(host, config, &control_path),
            control_path,
            connect_timeout: config.connect_timeout,
            alive: AtomicBool::new(false),
        };

        debug!(
            host = %conn.identifier,
            destination = %conn.destination,
            port = %host.connection.port,
            "Connecting via SSH"
        );

        let output = conn
            .run_client(&["exit 0".to_string()], Some(conn.connect_timeout + CONNECT_GRACE))
            .await
            .map_err(|e| match e {
                ConnectionError::Timeout { host, timeout } => ConnectionError::ConnectionFailed {
                    host,
                    message: format!("no response within {:?}", timeout),
                },
                other => other,
            })?;

        if !output.success {
            return Err(ConnectionError::ConnectionFailed {
                host: conn.identifier.clone(),
                message: transport_message(&output),
            });
        }

        conn.alive.store(true, Ordering::SeqCst);
        Ok(conn)
    }

    /// Options passed to every ssh invocation for this host
    pub fn build_args(host: &Host, config: &ConnectionConfig, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", config.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}s", config.control_persist.as_secs()),
            "-p".to_string(),
            host.connection.port.to_string(),
        ];

        if !config.host_key_checking {
            args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
            ]);
        }

        if let Some(user) = host
            .connection
            .user
            .as_deref()
            .or(config.remote_user.as_deref())
        {
            args.extend(["-l".to_string(), user.to_string()]);
        }

        let key = host
            .connection
            .private_key_file
            .as_ref()
            .map(|k| PathBuf::from(shellexpand::tilde(k).into_owned()))
            .or_else(|| config.private_key_file.clone());
        if let Some(key) = key {
            args.extend(["-i".to_string(), key.display().to_string()]);
        }

        args.extend(config.ssh_args.iter().cloned());
        args
    }

    /// Run the ssh client with the shared options, the destination and the
    /// given trailing arguments.
    async fn run_client(
        &self,
        trailing: &[String],
        timeout: Option<Duration>,
    ) -> ConnectionResult<CommandResult> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .arg(&self.destination)
            .args(trailing)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| ConnectionError::ExecutionFailed {
            host: self.identifier.clone(),
            message: format!("Failed to spawn {}: {}", self.executable.display(), e),
        })?;

        let wait = child.wait_with_output();
        let output = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.map_err(|_| {
                ConnectionError::Timeout {
                    host: self.identifier.clone(),
                    timeout,
                }
            })?,
            None => wait.await,
        }?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!(host = %self.identifier, exit_code, "ssh client exited");

        Ok(if exit_code == 0 {
            CommandResult::success(stdout, stderr)
        } else {
            CommandResult::failure(exit_code, stdout, stderr)
        })
    }

    /// Run a control command (`check`, `exit`) against the master
    async fn control(&self, operation: &str) -> bool {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg(operation)
            .arg(&self.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.connect_timeout, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let alive = self.control("check").await;
        if !alive {
            self.alive.store(false, Ordering::SeqCst);
        }
        alive
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        let remote = options.wrap_shell_command(command);
        debug!(host = %self.identifier, command = %command, "Executing remote command");

        let result = self.run_client(&[remote], options.timeout).await;
        match result {
            Ok(output) if output.exit_code == SSH_TRANSPORT_FAILURE => {
                self.alive.store(false, Ordering::SeqCst);
                Err(ConnectionError::ExecutionFailed {
                    host: self.identifier.clone(),
                    message: transport_message(&output),
                })
            }
            Ok(output) => Ok(output),
            Err(e) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn close(&self) -> ConnectionResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) && !self.control("exit").await {
            warn!(host = %self.identifier, "Failed to stop ssh control master");
        }
        Ok(())
    }
}

fn transport_message(output: &CommandResult) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("ssh exited with status {}", output.exit_code)
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable standing in for the ssh client
    fn fake_ssh(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Runs the last argument through the local shell, succeeds on -O
    const LOOPBACK: &str = r#"for arg; do
  if [ "$arg" = "-O" ]; then exit 0; fi
  last="$arg"
done
exec /bin/sh -c "$last""#;

    #[test]
    fn test_build_args() {
        let mut host = Host::with_address("web1", "10.0.0.1");
        host.set_port(2222);
        host.set_private_key("/keys/id_ed25519");
        let config = ConnectionConfig::default()
            .with_remote_user("deploy")
            .with_host_key_checking(false);

        let args = SshConnection::build_args(&host, &config, Path::new("/tmp/run/%C"));
        let joined = args.join(" ");
        assert!(joined.contains("BatchMode=yes"));
        assert!(joined.contains("ConnectTimeout=10"));
        assert!(joined.contains("ControlPath=/tmp/run/%C"));
        assert!(joined.contains("ControlPersist=60s"));
        assert!(joined.contains("-p 2222"));
        assert!(joined.contains("-l deploy"));
        assert!(joined.contains("-i /keys/id_ed25519"));
        assert!(joined.contains("StrictHostKeyChecking=no"));
    }

    #[test]
    fn test_host_user_overrides_default() {
        let mut host = Host::new("db1");
        host.set_user("postgres");
        let config = ConnectionConfig::default().with_remote_user("deploy");
        let args = SshConnection::build_args(&host, &config, Path::new("/tmp/%C"));
        assert!(args.join(" ").contains("-l postgres"));
        assert!(!args.iter().any(|a| a == "StrictHostKeyChecking=no"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = fake_ssh(
            dir.path(),
            "echo 'ssh: connect to host h3 port 22: Connection refused' >&2; exit 255",
        );
        let config = ConnectionConfig::default().with_ssh_executable(ssh);

        let err = SshConnection::connect(&Host::new("h3"), &config, dir.path())
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(err.host(), Some("h3"));
        assert!(err.to_string().contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_execute_through_client() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectionConfig::default().with_ssh_executable(fake_ssh(dir.path(), LOOPBACK));

        let conn = SshConnection::connect(&Host::new("h1"), &config, dir.path())
            .await
            .unwrap();
        assert!(conn.is_alive().await);

        let result = conn
            .execute("echo remote; exit 3", Some(ExecuteOptions::new().with_env("A", "b")))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "remote");

        let err = conn.execute("exit 255", None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::ExecutionFailed { .. }));
        assert!(!conn.is_alive().await);
        conn.close().await.unwrap();
    }
}
