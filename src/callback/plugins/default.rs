//! Default callback plugin.
//!
//! Prints one entry per host as it settles, in the familiar ad-hoc style:
//!
//! ```text
//! web1 | SUCCESS => {
//!     "ping": "pong"
//! }
//! web2 | CHANGED | rc=0 >>
//! 12:01:33 up 3 days
//! db1 | UNREACHABLE! => {
//!     "msg": "Failed to connect to db1: Connection refused"
//! }
//!
//! RECAP ok=2 changed=1 unreachable=1 failed=0 skipped=0 (1.24s)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use colored::{Color, Colorize};
use serde_json::Value;

use crate::callback::RunCallback;
use crate::executor::result::{HostResult, HostStatus, RunReport};
use crate::inventory::Host;

/// Display options
#[derive(Debug, Clone, Default)]
pub struct DefaultCallbackConfig {
    /// Disable colored output
    pub no_color: bool,
    /// Verbosity level (0 = normal); 1 and above adds per-host durations
    pub verbosity: u8,
    /// Print ok hosts (failures are always printed)
    pub hide_ok: bool,
}

/// Ad-hoc style terminal output
#[derive(Debug, Clone, Default)]
pub struct DefaultCallback {
    config: DefaultCallbackConfig,
}

impl DefaultCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DefaultCallbackConfig) -> Self {
        Self { config }
    }

    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.config.no_color = no_color;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.config.verbosity = verbosity;
        self
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.config.no_color {
            text.to_string()
        } else {
            text.color(color).to_string()
        }
    }

    fn status_label(result: &HostResult) -> (&'static str, Color) {
        match result.status {
            HostStatus::Ok if result.changed => ("CHANGED", Color::Yellow),
            HostStatus::Ok => ("SUCCESS", Color::Green),
            HostStatus::Failed => ("FAILED!", Color::Red),
            HostStatus::Unreachable => ("UNREACHABLE!", Color::Red),
            HostStatus::Skipped => ("SKIPPED", Color::Cyan),
        }
    }

    /// Render the entry for one host
    pub fn format_result(&self, result: &HostResult) -> String {
        let (label, color) = Self::status_label(result);

        let mut text = match command_output(result) {
            Some((rc, output)) => {
                let label = label.trim_end_matches('!');
                format!("{} | {} | rc={} >>\n{}", result.host, label, rc, output)
            }
            None => {
                let body = display_payload(result);
                if body.is_empty() {
                    format!("{} | {}", result.host, label)
                } else {
                    format!("{} | {} => {}", result.host, label, body)
                }
            }
        };

        if self.config.verbosity > 0 {
            text.push_str(&format!(" ({})", format_duration(result.duration)));
        }

        self.paint(text.trim_end(), color)
    }

    /// Render the closing summary line
    pub fn format_recap(&self, report: &RunReport) -> String {
        let summary = &report.summary;
        let line = format!(
            "RECAP {} ({})",
            summary,
            format_duration(report.duration())
        );
        let color = if summary.failed > 0 || summary.unreachable > 0 {
            Color::Red
        } else if summary.changed > 0 {
            Color::Yellow
        } else {
            Color::Green
        };
        self.paint(&line, color)
    }
}

/// `(rc, output)` for command-like payloads
fn command_output(result: &HostResult) -> Option<(i64, String)> {
    let rc = result.payload.get("rc")?.as_i64()?;
    let stdout = result
        .payload
        .get("stdout")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let stderr = result
        .payload
        .get("stderr")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut output = stdout.trim_end().to_string();
    if result.status != HostStatus::Ok && !stderr.trim().is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stderr.trim_end());
    }
    Some((rc, output))
}

/// Pretty JSON of what the user cares about for non-command results
fn display_payload(result: &HostResult) -> String {
    let mut body = match &result.payload {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };

    if result.status == HostStatus::Ok || result.status == HostStatus::Skipped {
        // The message only repeats the status for successful modules
        if body.len() > 1 {
            body.remove("msg");
        }
    } else if let Some(error) = &result.error {
        body.insert("msg".to_string(), Value::String(error.clone()));
    }
    body.insert("changed".to_string(), Value::Bool(result.changed));

    serde_json::to_string_pretty(&Value::Object(body)).unwrap_or_default()
}

fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

#[async_trait]
impl RunCallback for DefaultCallback {
    async fn on_host_start(&self, host: &Host) {
        if self.config.verbosity >= 2 {
            println!("{}", self.paint(&format!("<{}> START", host.name()), Color::BrightBlack));
        }
    }

    async fn on_host_result(&self, result: &HostResult) {
        if self.config.hide_ok && result.status == HostStatus::Ok {
            return;
        }
        let text = self.format_result(result);
        match result.status {
            HostStatus::Failed | HostStatus::Unreachable => eprintln!("{}", text),
            _ => println!("{}", text),
        }
    }

    async fn on_no_hosts_matched(&self, pattern: &str) {
        eprintln!(
            "{}",
            self.paint(
                &format!("[WARNING]: No hosts matched pattern '{}', nothing to do", pattern),
                Color::Magenta,
            )
        );
    }

    async fn on_run_end(&self, report: &RunReport) {
        if report.is_empty() {
            return;
        }
        println!();
        println!("{}", self.format_recap(report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain() -> DefaultCallback {
        DefaultCallback::new().with_no_color(true)
    }

    #[test]
    fn test_format_ping() {
        let result = HostResult::ok("web1", json!({"msg": "pong", "ping": "pong"}));
        assert_eq!(
            plain().format_result(&result),
            "web1 | SUCCESS => {\n  \"changed\": false,\n  \"ping\": \"pong\"\n}"
        );
    }

    #[test]
    fn test_format_command() {
        let result = HostResult::ok("web2", json!({"rc": 0, "stdout": "hello\n", "stderr": ""}))
            .with_changed(true);
        assert_eq!(plain().format_result(&result), "web2 | CHANGED | rc=0 >>\nhello");

        let failed = HostResult::failed("web3", "non-zero return code")
            .with_payload(json!({"rc": 2, "stdout": "", "stderr": "no such file\n"}));
        assert_eq!(
            plain().format_result(&failed),
            "web3 | FAILED | rc=2 >>\nno such file"
        );
    }

    #[test]
    fn test_format_unreachable() {
        let result = HostResult::unreachable("db1", "Connection refused");
        let text = plain().format_result(&result);
        assert!(text.starts_with("db1 | UNREACHABLE! => {"));
        assert!(text.contains("\"msg\": \"Connection refused\""));
    }

    #[test]
    fn test_verbose_adds_duration() {
        let result = HostResult::skipped("h", json!({"msg": "exists"}))
            .with_duration(Duration::from_millis(1500));
        let text = plain().with_verbosity(1).format_result(&result);
        assert!(text.starts_with("h | SKIPPED => "));
        assert!(text.ends_with("(1.50s)"));
    }
}
