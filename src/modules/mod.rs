//! Module system for Fanout
//!
//! A module turns a name plus arguments into one or more command executions
//! over a [`Connection`] and interprets what comes back. Modules never talk
//! to the transport directly; they only see the leased connection.

pub mod command;
pub mod ping;
pub mod raw;
pub mod shell;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::{CommandResult, Connection, ConnectionError, ExecuteOptions};

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// The connection failed underneath the module
    #[error(transparent)]
    Transport(#[from] ConnectionError),
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Status of a module execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Module executed successfully and made changes
    Changed,
    /// Module executed successfully but no changes were needed
    Ok,
    /// Module execution failed
    Failed,
    /// Module was skipped (e.g., `creates` target already present)
    Skipped,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Changed => write!(f, "changed"),
            ModuleStatus::Ok => write!(f, "ok"),
            ModuleStatus::Failed => write!(f, "failed"),
            ModuleStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of a module execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Whether the module changed anything
    pub changed: bool,
    /// Human-readable message about what happened
    pub msg: String,
    /// Status of the execution
    pub status: ModuleStatus,
    /// Additional data returned by the module
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, serde_json::Value>,
    /// Standard output (for command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Standard error (for command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Return code (for command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
}

impl ModuleOutput {
    fn with_status(status: ModuleStatus, changed: bool, msg: impl Into<String>) -> Self {
        Self {
            changed,
            msg: msg.into(),
            status,
            data: IndexMap::new(),
            stdout: None,
            stderr: None,
            rc: None,
        }
    }

    /// Create a new successful output with no changes
    pub fn ok(msg: impl Into<String>) -> Self {
        Self::with_status(ModuleStatus::Ok, false, msg)
    }

    /// Create a new successful output with changes
    pub fn changed(msg: impl Into<String>) -> Self {
        Self::with_status(ModuleStatus::Changed, true, msg)
    }

    /// Create a failed output
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::with_status(ModuleStatus::Failed, false, msg)
    }

    /// Create a skipped output
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self::with_status(ModuleStatus::Skipped, false, msg)
    }

    /// Add data to the output
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Add stdout/stderr/rc for command outputs
    pub fn with_command_output(
        mut self,
        stdout: Option<String>,
        stderr: Option<String>,
        rc: Option<i32>,
    ) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.rc = rc;
        self
    }
}

/// Parameters passed to a module, in the order given
pub type ModuleParams = IndexMap<String, serde_json::Value>;

/// Per-execution settings handed to a module
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    /// Host the module runs against
    pub host: String,
    /// Base options (escalation) for every command the module runs
    pub options: ExecuteOptions,
}

impl ModuleContext {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            options: ExecuteOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Options for a command honoring the `chdir` and `env` parameters
    pub fn command_options(&self, params: &ModuleParams) -> ModuleResult<ExecuteOptions> {
        let mut options = self.options.clone();
        if let Some(chdir) = params.get_string("chdir")? {
            options = options.with_cwd(chdir);
        }
        match params.get("env") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(env)) => {
                for (key, value) in env {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    options = options.with_env(key.clone(), value);
                }
            }
            Some(_) => {
                return Err(ModuleError::InvalidParameter(
                    "env must be a mapping".to_string(),
                ))
            }
        }
        Ok(options)
    }
}

/// Trait that all modules must implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the name of the module
    fn name(&self) -> &'static str;

    /// Returns a description of what the module does
    fn description(&self) -> &'static str;

    /// Execute the module over a leased connection
    async fn execute(
        &self,
        params: &ModuleParams,
        conn: &dyn Connection,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput>;

    /// Validate the parameters before execution
    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let _ = params;
        Ok(())
    }

    /// Returns the list of required parameters
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    /// Whether free-form text on the command line is this module's `cmd`
    fn accepts_free_form(&self) -> bool {
        false
    }
}

/// Helper trait for extracting parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_))) => {
                Ok(Some(v.to_string()))
            }
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a string",
                key
            ))),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool(&self, key: &str) -> ModuleResult<Option<bool>> {
        match self.get(key) {
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(serde_json::Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => Err(ModuleError::InvalidParameter(format!(
                    "{} must be a boolean",
                    key
                ))),
            },
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a boolean",
                key
            ))),
            None => Ok(None),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).ok().flatten().unwrap_or(default)
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(serde_json::Value::Array(arr)) => Ok(Some(
                arr.iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        v => v.to_string(),
                    })
                    .collect(),
            )),
            Some(serde_json::Value::String(s)) => {
                Ok(Some(s.split(',').map(|s| s.trim().to_string()).collect()))
            }
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an array",
                key
            ))),
            None => Ok(None),
        }
    }
}

/// Skip outcome from the `creates`/`removes` guards shared by the command
/// modules, probed on the host itself.
pub(crate) async fn check_creates_removes(
    params: &ModuleParams,
    conn: &dyn Connection,
    context: &ModuleContext,
) -> ModuleResult<Option<ModuleOutput>> {
    if let Some(creates) = params.get_string("creates")? {
        if path_exists(&creates, conn, context).await? {
            return Ok(Some(ModuleOutput::skipped(format!(
                "Skipped, '{}' exists",
                creates
            ))));
        }
    }

    if let Some(removes) = params.get_string("removes")? {
        if !path_exists(&removes, conn, context).await? {
            return Ok(Some(ModuleOutput::skipped(format!(
                "Skipped, '{}' does not exist",
                removes
            ))));
        }
    }

    Ok(None)
}

/// Interpret a finished command: rc 0 is a change, anything else a failure
/// carrying the command's output.
pub(crate) fn command_output(
    display: &str,
    result: CommandResult,
    started: chrono::DateTime<chrono::Utc>,
) -> ModuleOutput {
    let ended = chrono::Utc::now();
    let delta = (ended - started).to_std().unwrap_or_default();
    let rc = result.exit_code;

    let output = if result.success {
        ModuleOutput::changed(format!("Command '{}' executed successfully", display))
    } else {
        ModuleOutput::failed("non-zero return code")
    };

    output
        .with_data("cmd", serde_json::json!(display))
        .with_data("start", serde_json::json!(started.to_rfc3339()))
        .with_data("end", serde_json::json!(ended.to_rfc3339()))
        .with_data("delta", serde_json::json!(format!("{:?}", delta)))
        .with_command_output(Some(result.stdout), Some(result.stderr), Some(rc))
}

async fn path_exists(
    path: &str,
    conn: &dyn Connection,
    context: &ModuleContext,
) -> ModuleResult<bool> {
    let probe = format!("test -e {}", shell_words::quote(path));
    let result = conn.execute(&probe, Some(context.options.clone())).await?;
    Ok(result.success)
}

/// Registry for looking up modules by name
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ping::PingModule));
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(shell::ShellModule));
        registry.register(Arc::new(raw::RawModule));
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Look a module up and check its parameters
    pub fn resolve(&self, name: &str, params: &ModuleParams) -> ModuleResult<Arc<dyn Module>> {
        let module = self
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        module.validate_params(params)?;

        for param in module.required_params() {
            if !params.contains_key(*param) {
                return Err(ModuleError::MissingParameter((*param).to_string()));
            }
        }

        Ok(module)
    }

    /// Execute a module by name
    pub async fn execute(
        &self,
        name: &str,
        params: &ModuleParams,
        conn: &dyn Connection,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self.resolve(name, params)?;
        module.execute(params, conn, context).await
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use serde_json::json;

    #[test]
    fn test_module_registry() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["command", "ping", "raw", "shell"]);
        assert!(matches!(
            registry.resolve("nonexistent", &ModuleParams::new()),
            Err(ModuleError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("shell", &ModuleParams::new()),
            Err(ModuleError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_module_output() {
        let output = ModuleOutput::changed("Something changed").with_data("key", json!("value"));

        assert!(output.changed);
        assert_eq!(output.status, ModuleStatus::Changed);
        assert!(output.data.contains_key("key"));
        assert_eq!(ModuleOutput::skipped("x").status.to_string(), "skipped");
    }

    #[test]
    fn test_param_ext() {
        let mut params = ModuleParams::new();
        params.insert("string".to_string(), json!("hello"));
        params.insert("bool_str".to_string(), json!("yes"));
        params.insert("number".to_string(), json!(42));
        params.insert("array".to_string(), json!(["one", "two"]));
        params.insert("object".to_string(), json!({"a": 1}));

        assert_eq!(params.get_string("string").unwrap(), Some("hello".into()));
        assert_eq!(params.get_string("number").unwrap(), Some("42".into()));
        assert!(params.get_string("object").is_err());
        assert_eq!(params.get_bool("bool_str").unwrap(), Some(true));
        assert!(!params.get_bool_or("missing", false));
        assert_eq!(
            params.get_vec_string("array").unwrap(),
            Some(vec!["one".to_string(), "two".to_string()])
        );
    }

    #[test]
    fn test_command_options_from_params() {
        let mut params = ModuleParams::new();
        params.insert("chdir".into(), json!("/srv"));
        params.insert("env".into(), json!({"A": "1", "B": 2}));
        let options = ModuleContext::new("h").command_options(&params).unwrap();
        assert_eq!(options.cwd.as_deref(), Some("/srv"));
        assert_eq!(options.env.get("B").map(String::as_str), Some("2"));

        params.insert("env".into(), json!("A=1"));
        assert!(ModuleContext::new("h").command_options(&params).is_err());
    }

    #[tokio::test]
    async fn test_creates_removes_guards() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present");
        std::fs::write(&present, "x").unwrap();
        let conn = LocalConnection::new();
        let ctx = ModuleContext::new("local");

        let mut params = ModuleParams::new();
        params.insert("creates".into(), json!(present.display().to_string()));
        let skipped = check_creates_removes(&params, &conn, &ctx).await.unwrap();
        assert_eq!(skipped.unwrap().status, ModuleStatus::Skipped);

        let mut params = ModuleParams::new();
        params.insert(
            "removes".into(),
            json!(dir.path().join("absent").display().to_string()),
        );
        assert!(check_creates_removes(&params, &conn, &ctx)
            .await
            .unwrap()
            .is_some());

        let mut params = ModuleParams::new();
        params.insert("removes".into(), json!(present.display().to_string()));
        assert!(check_creates_removes(&params, &conn, &ctx)
            .await
            .unwrap()
            .is_none());
    }
}
