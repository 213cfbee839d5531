//! Host results and the run report

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final status of one host in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Module completed successfully (with or without changes)
    Ok,
    /// Module failed, timed out, was cancelled or could not be started
    Failed,
    /// The host could not be reached
    Unreachable,
    /// Module decided there was nothing to do
    Skipped,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Ok => write!(f, "ok"),
            HostStatus::Failed => write!(f, "failed"),
            HostStatus::Unreachable => write!(f, "unreachable"),
            HostStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of a run on one host. Created once, never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    /// Host name
    pub host: String,
    pub status: HostStatus,
    /// Whether the module changed something
    #[serde(default)]
    pub changed: bool,
    /// Structured module output (msg, rc, stdout, stderr, module data)
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Error detail for failed and unreachable hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time from dispatch to settlement
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
}

impl HostResult {
    fn new(host: impl Into<String>, status: HostStatus) -> Self {
        Self {
            host: host.into(),
            status,
            changed: false,
            payload: serde_json::Value::Null,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn ok(host: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(host, HostStatus::Ok).with_payload(payload)
    }

    pub fn skipped(host: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(host, HostStatus::Skipped).with_payload(payload)
    }

    pub fn failed(host: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(host, HostStatus::Failed).with_error(error)
    }

    pub fn unreachable(host: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(host, HostStatus::Unreachable).with_error(error)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_changed(mut self, changed: bool) -> Self {
        self.changed = changed;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == HostStatus::Ok
    }

    pub fn is_failed(&self) -> bool {
        self.status == HostStatus::Failed
    }

    pub fn is_unreachable(&self) -> bool {
        self.status == HostStatus::Unreachable
    }

    pub fn is_skipped(&self) -> bool {
        self.status == HostStatus::Skipped
    }
}

/// Count of hosts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub unreachable: usize,
    pub skipped: usize,
    pub total: usize,
}

impl RunSummary {
    /// Tally a set of results
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a HostResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            if result.changed {
                summary.changed += 1;
            }
            match result.status {
                HostStatus::Ok => summary.ok += 1,
                HostStatus::Failed => summary.failed += 1,
                HostStatus::Unreachable => summary.unreachable += 1,
                HostStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// True when no host failed or was unreachable
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.unreachable == 0
    }

    /// Process exit status: 2 on any failure, 4 on unreachable hosts only
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            2
        } else if self.unreachable > 0 {
            4
        } else {
            0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} changed={} unreachable={} failed={} skipped={}",
            self.ok, self.changed, self.unreachable, self.failed, self.skipped
        )
    }
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub module: String,
    pub pattern: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Results keyed by host name, in resolution order
    pub results: IndexMap<String, HostResult>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Result for a host
    pub fn get(&self, host: &str) -> Option<&HostResult> {
        self.results.get(host)
    }

    /// Host names in resolution order
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.results.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code()
    }

    /// Wall clock time of the run
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<HostResult> {
        vec![
            HostResult::ok("a", json!({"msg": "pong"})),
            HostResult::ok("b", json!({})).with_changed(true),
            HostResult::failed("c", "boom"),
            HostResult::unreachable("d", "refused"),
            HostResult::skipped("e", json!({})),
        ]
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::from_results(&sample());
        assert_eq!(summary.total, 5);
        assert_eq!(summary.ok, 2);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.exit_code(), 2);
        assert_eq!(
            summary.to_string(),
            "ok=2 changed=1 unreachable=1 failed=1 skipped=1"
        );
    }

    #[test]
    fn test_exit_codes() {
        let unreachable = RunSummary::from_results(&[HostResult::unreachable("a", "x")]);
        assert_eq!(unreachable.exit_code(), 4);
        let clean = RunSummary::from_results(&[HostResult::skipped("a", json!(null))]);
        assert_eq!(clean.exit_code(), 0);
        assert!(clean.is_success());
    }

    #[test]
    fn test_report_serializes() {
        let results: IndexMap<String, HostResult> = sample()
            .into_iter()
            .map(|r| (r.host.clone(), r))
            .collect();
        let now = Utc::now();
        let report = RunReport {
            run_id: Uuid::new_v4(),
            module: "ping".into(),
            pattern: "all".into(),
            started_at: now,
            finished_at: now,
            summary: RunSummary::from_results(results.values()),
            results,
        };

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["results"]["c"]["status"], json!("failed"));
        assert_eq!(value["results"]["c"]["error"], json!("boom"));
        assert!(value["results"]["a"].get("error").is_none());
        assert_eq!(value["summary"]["unreachable"], json!(1));

        let yaml = report.to_yaml().unwrap();
        let back: RunReport = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, report);
        assert_eq!(report.hosts().collect::<Vec<_>>(), vec!["a", "b", "c", "d", "e"]);
    }
}
