//! Task definition
//!
//! A task names one module, its arguments and the host pattern it targets,
//! together with the limits of the run: fork count, per-host timeout and an
//! optional deadline for the whole run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ExecuteOptions;
use crate::error::{Error, Result};
use crate::modules::ModuleParams;

/// Default number of hosts executed concurrently
pub const DEFAULT_FORKS: usize = 5;

/// Default per-host execution timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default module when none is given
pub const DEFAULT_MODULE: &str = "command";

/// Parameters that free-form modules accept inline next to the command text
const FREE_FORM_KEYS: &[&str] = &["chdir", "creates", "removes", "executable"];

fn default_pattern() -> String {
    "all".to_string()
}

fn default_forks() -> usize {
    DEFAULT_FORKS
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// One module invocation fanned out over a host pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Module identifier
    pub module: String,

    /// Module arguments
    #[serde(default)]
    pub args: ModuleParams,

    /// Host pattern selecting the targets
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Maximum number of hosts in flight
    #[serde(default = "default_forks")]
    pub forks: usize,

    /// Per-host execution timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Deadline for the whole run, counted from the start of
    /// `ExecutionController::run` so inventory resolution is included.
    /// Hosts still pending or in flight when it passes are cancelled.
    #[serde(default, with = "humantime_serde")]
    pub global_timeout: Option<Duration>,

    /// Run the module with privilege escalation
    #[serde(default, rename = "become")]
    pub escalate: bool,

    /// User to become
    #[serde(default, rename = "become_user")]
    pub escalate_user: Option<String>,

    /// Escalation method (sudo, su, doas)
    #[serde(default, rename = "become_method")]
    pub escalate_method: Option<String>,
}

impl Task {
    /// Create a task for `module` against all hosts with default limits
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            args: ModuleParams::new(),
            pattern: default_pattern(),
            forks: DEFAULT_FORKS,
            timeout: DEFAULT_TIMEOUT,
            global_timeout: None,
            escalate: false,
            escalate_user: None,
            escalate_method: None,
        }
    }

    /// Parse a task from YAML (JSON is accepted as well)
    pub fn from_yaml(content: &str) -> Result<Self> {
        let task: Task = serde_yaml::from_str(content)?;
        task.validate()?;
        Ok(task)
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: ModuleParams) -> Self {
        self.args = args;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    /// Enable privilege escalation, optionally to a specific user
    pub fn with_become(mut self, user: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_user = user;
        self
    }

    pub fn with_become_method(mut self, method: impl Into<String>) -> Self {
        self.escalate_method = Some(method.into());
        self
    }

    /// Check the task's limits
    pub fn validate(&self) -> Result<()> {
        if self.module.trim().is_empty() {
            return Err(Error::InvalidTask("module must not be empty".to_string()));
        }
        if self.pattern.trim().is_empty() {
            return Err(Error::InvalidTask("host pattern must not be empty".to_string()));
        }
        if self.forks == 0 {
            return Err(Error::InvalidTask("forks must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidTask("timeout must be greater than zero".to_string()));
        }
        if matches!(self.global_timeout, Some(t) if t.is_zero()) {
            return Err(Error::InvalidTask(
                "global timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(method) = &self.escalate_method {
            if !matches!(method.as_str(), "sudo" | "su" | "doas") {
                return Err(Error::InvalidTask(format!(
                    "unsupported become method '{}'",
                    method
                )));
            }
        }
        Ok(())
    }

    /// Base execution options every command of this task runs with
    pub fn execute_options(&self) -> ExecuteOptions {
        let mut options = ExecuteOptions::new();
        if self.escalate {
            options = options.with_escalation(self.escalate_user.clone());
            if let Some(method) = &self.escalate_method {
                options = options.with_escalate_method(method.clone());
            }
        }
        options
    }
}

/// Parse module arguments given on the command line.
///
/// A JSON object is taken as-is. Otherwise the text is a list of
/// `key=value` words; for free-form modules (command, shell, raw) words
/// that are not one of the inline parameters form the `cmd`, keeping their
/// original quoting.
pub fn parse_module_args(raw: &str, free_form: bool) -> Result<ModuleParams> {
    let raw = raw.trim();
    let mut params = ModuleParams::new();
    if raw.is_empty() {
        return Ok(params);
    }

    if raw.starts_with('{') {
        return serde_json::from_str(raw).map_err(Error::from);
    }

    if free_form {
        let mut command = Vec::new();
        for word in split_raw_words(raw) {
            match word.split_once('=') {
                Some((key, _)) if FREE_FORM_KEYS.contains(&key) => {
                    let (key, value) = unquote_pair(word)?;
                    params.insert(key, serde_json::Value::String(value));
                }
                _ => command.push(word),
            }
        }
        if !command.is_empty() {
            params.insert(
                "cmd".to_string(),
                serde_json::Value::String(command.join(" ")),
            );
        }
        return Ok(params);
    }

    let words = shell_words::split(raw)
        .map_err(|e| Error::InvalidTask(format!("cannot parse module arguments: {}", e)))?;
    for word in words {
        let (key, value) = word.split_once('=').ok_or_else(|| {
            Error::InvalidTask(format!("expected key=value in module arguments, got '{}'", word))
        })?;
        params.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }
    Ok(params)
}

fn unquote_pair(word: &str) -> Result<(String, String)> {
    let unquoted = shell_words::split(word)
        .map_err(|e| Error::InvalidTask(format!("cannot parse '{}': {}", word, e)))?
        .join(" ");
    match unquoted.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(Error::InvalidTask(format!("expected key=value, got '{}'", word))),
    }
}

/// Split on unquoted whitespace, returning the words verbatim
fn split_raw_words(raw: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut quote = None;
    let mut escaped = false;

    for (i, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', q) if q != Some('\'') => escaped = true,
            ('\'' | '"', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            (c, None) if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    words.push(&raw[s..i]);
                }
                continue;
            }
            _ => {}
        }
        if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        words.push(&raw[s..]);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_task_defaults_and_validation() {
        let task = Task::new("ping");
        assert_eq!(task.pattern, "all");
        assert_eq!(task.forks, DEFAULT_FORKS);
        assert!(task.validate().is_ok());

        assert!(Task::new("ping").with_forks(0).validate().is_err());
        assert!(Task::new("").validate().is_err());
        assert!(Task::new("ping")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Task::new("ping")
            .with_become(None)
            .with_become_method("pbrun")
            .validate()
            .is_err());
    }

    #[test]
    fn test_task_from_yaml() {
        let task = Task::from_yaml(
            r#"
module: shell
args:
  cmd: uptime
pattern: "web:&prod"
forks: 2
timeout: 30s
global_timeout: 5m
become: true
become_user: postgres
"#,
        )
        .unwrap();

        assert_eq!(task.module, "shell");
        assert_eq!(task.args["cmd"], json!("uptime"));
        assert_eq!(task.forks, 2);
        assert_eq!(task.timeout, Duration::from_secs(30));
        assert_eq!(task.global_timeout, Some(Duration::from_secs(300)));

        let options = task.execute_options();
        assert!(options.escalate);
        assert_eq!(options.escalate_user.as_deref(), Some("postgres"));
    }

    #[test]
    fn test_task_from_yaml_rejects_zero_forks() {
        assert!(Task::from_yaml("module: ping\nforks: 0\n").is_err());
    }

    #[test]
    fn test_parse_key_value_args() {
        let params = parse_module_args("data='hello world' x=1", false).unwrap();
        assert_eq!(params["data"], json!("hello world"));
        assert_eq!(params["x"], json!("1"));

        assert!(parse_module_args("novalue", false).is_err());
    }

    #[test]
    fn test_parse_free_form_args() {
        let params =
            parse_module_args("chdir=/tmp echo \"a  b\" | grep a creates='/x y'", true).unwrap();
        assert_eq!(params["cmd"], json!("echo \"a  b\" | grep a"));
        assert_eq!(params["chdir"], json!("/tmp"));
        assert_eq!(params["creates"], json!("/x y"));

        let params = parse_module_args("FOO=bar env", true).unwrap();
        assert_eq!(params["cmd"], json!("FOO=bar env"));
    }

    #[test]
    fn test_parse_json_args() {
        let params = parse_module_args(r#"{"argv": ["ls", "-l"]}"#, true).unwrap();
        assert_eq!(params["argv"], json!(["ls", "-l"]));
    }

    #[test]
    fn test_split_raw_words() {
        assert_eq!(
            split_raw_words(r#"a 'b c'  "d \" e" f\ g"#),
            vec!["a", "'b c'", r#""d \" e""#, r"f\ g"]
        );
    }
}
