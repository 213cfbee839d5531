//! Translation of execution outcomes into host results.
//!
//! Everything a dispatch can end with (module output, connection errors,
//! timeouts, cancellation) is funnelled through [`HostOutcome`] and turned
//! into a [`HostResult`] here, in one place.

use std::time::Duration;

use serde_json::{Map, Value};

use super::result::HostResult;
use crate::connection::ConnectionError;
use crate::modules::{ModuleError, ModuleOutput, ModuleStatus};

/// How a single host's execution ended
#[derive(Debug)]
pub enum HostOutcome {
    /// The module ran to completion (its own status may still be failed)
    Completed(ModuleOutput),
    /// The module could not run or its transport broke
    Module(ModuleError),
    /// No connection could be leased
    Connection(ConnectionError),
    /// The per-host timeout elapsed
    TimedOut(Duration),
    /// The run was cancelled before the host settled
    Cancelled,
}

impl HostOutcome {
    /// Whether the connection used for this outcome may be reused.
    ///
    /// Only transport-level problems make a connection unhealthy; a module
    /// that ran and failed leaves a perfectly good connection behind.
    pub fn connection_healthy(&self) -> bool {
        match self {
            HostOutcome::Completed(_) => true,
            HostOutcome::Module(ModuleError::Transport(_)) => false,
            HostOutcome::Module(_) => true,
            HostOutcome::Connection(_) | HostOutcome::TimedOut(_) | HostOutcome::Cancelled => false,
        }
    }

    /// Convert into the host's result
    pub fn into_result(self, host: &str, duration: Duration) -> HostResult {
        let result = match self {
            HostOutcome::Completed(output) => from_module_output(host, output),
            HostOutcome::Module(ModuleError::Transport(err)) | HostOutcome::Connection(err) => {
                from_connection_error(host, err)
            }
            HostOutcome::Module(err) => HostResult::failed(host, err.to_string()),
            HostOutcome::TimedOut(timeout) => HostResult::failed(
                host,
                format!("Host execution timed out after {:?}", timeout),
            ),
            HostOutcome::Cancelled => {
                HostResult::failed(host, "Run cancelled before the host completed")
            }
        };
        result.with_duration(duration)
    }
}

impl From<ModuleOutput> for HostOutcome {
    fn from(output: ModuleOutput) -> Self {
        HostOutcome::Completed(output)
    }
}

impl From<ConnectionError> for HostOutcome {
    fn from(err: ConnectionError) -> Self {
        HostOutcome::Connection(err)
    }
}

fn from_connection_error(host: &str, err: ConnectionError) -> HostResult {
    if err.is_unreachable() {
        HostResult::unreachable(host, err.to_string())
    } else {
        HostResult::failed(host, err.to_string())
    }
}

fn from_module_output(host: &str, output: ModuleOutput) -> HostResult {
    let mut payload = Map::new();
    payload.insert("msg".to_string(), Value::String(output.msg.clone()));
    if let Some(rc) = output.rc {
        payload.insert("rc".to_string(), Value::from(rc));
    }
    if let Some(stdout) = &output.stdout {
        payload.insert("stdout".to_string(), Value::String(stdout.clone()));
    }
    if let Some(stderr) = &output.stderr {
        payload.insert("stderr".to_string(), Value::String(stderr.clone()));
    }
    for (key, value) in output.data {
        payload.entry(key).or_insert(value);
    }
    let payload = Value::Object(payload);

    match output.status {
        ModuleStatus::Ok | ModuleStatus::Changed => {
            HostResult::ok(host, payload).with_changed(output.changed)
        }
        ModuleStatus::Skipped => HostResult::skipped(host, payload),
        ModuleStatus::Failed => HostResult::failed(host, output.msg)
            .with_payload(payload)
            .with_changed(output.changed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::result::HostStatus;
    use serde_json::json;

    #[test]
    fn test_module_statuses() {
        let ok = HostOutcome::from(ModuleOutput::ok("pong").with_data("ping", json!("pong")))
            .into_result("h1", Duration::from_millis(5));
        assert_eq!(ok.status, HostStatus::Ok);
        assert!(!ok.changed);
        assert_eq!(ok.payload["ping"], json!("pong"));
        assert_eq!(ok.duration, Duration::from_millis(5));

        let changed = HostOutcome::from(ModuleOutput::changed("ran").with_command_output(
            Some("out".into()),
            Some(String::new()),
            Some(0),
        ))
        .into_result("h1", Duration::ZERO);
        assert_eq!(changed.status, HostStatus::Ok);
        assert!(changed.changed);
        assert_eq!(changed.payload["rc"], json!(0));

        let failed = HostOutcome::from(
            ModuleOutput::failed("non-zero return code").with_command_output(None, None, Some(3)),
        )
        .into_result("h1", Duration::ZERO);
        assert_eq!(failed.status, HostStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("non-zero return code"));
        assert_eq!(failed.payload["rc"], json!(3));

        let skipped = HostOutcome::from(ModuleOutput::skipped("exists"))
            .into_result("h1", Duration::ZERO);
        assert_eq!(skipped.status, HostStatus::Skipped);
    }

    #[test]
    fn test_connection_errors() {
        let refused = HostOutcome::from(ConnectionError::ConnectionFailed {
            host: "h3".into(),
            message: "Connection refused".into(),
        });
        assert!(!refused.connection_healthy());
        let result = refused.into_result("h3", Duration::ZERO);
        assert_eq!(result.status, HostStatus::Unreachable);
        assert!(result.error.unwrap().contains("Connection refused"));

        let broken = HostOutcome::Module(ModuleError::Transport(ConnectionError::ExecutionFailed {
            host: "h3".into(),
            message: "broken pipe".into(),
        }));
        assert!(!broken.connection_healthy());
        assert_eq!(broken.into_result("h3", Duration::ZERO).status, HostStatus::Unreachable);

        let saturated = HostOutcome::from(ConnectionError::AcquireTimeout {
            host: "h3".into(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(saturated.into_result("h3", Duration::ZERO).status, HostStatus::Failed);
    }

    #[test]
    fn test_timeout_and_cancellation() {
        let timed_out = HostOutcome::TimedOut(Duration::from_millis(100));
        assert!(!timed_out.connection_healthy());
        let result = timed_out.into_result("h1", Duration::from_millis(100));
        assert_eq!(result.status, HostStatus::Failed);
        assert!(result.error.unwrap().contains("timed out after 100ms"));

        let cancelled = HostOutcome::Cancelled.into_result("h1", Duration::ZERO);
        assert_eq!(cancelled.status, HostStatus::Failed);
        assert!(cancelled.error.unwrap().contains("cancelled"));

        let bad_args = HostOutcome::Module(ModuleError::MissingParameter("cmd".into()));
        assert!(bad_args.connection_healthy());
        assert_eq!(bad_args.into_result("h1", Duration::ZERO).status, HostStatus::Failed);
    }
}
