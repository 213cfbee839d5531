//! Shell module - Execute shell commands
//!
//! This module executes commands through a shell, enabling shell features
//! like pipes, redirects, environment variable expansion, etc.

use async_trait::async_trait;

use super::{
    check_creates_removes, command_output, Module, ModuleContext, ModuleOutput, ModuleParams,
    ModuleResult, ParamExt,
};
use crate::connection::Connection;

/// Module for executing shell commands
pub struct ShellModule;

impl ShellModule {
    /// The command as handed to the connection. A custom `executable` gets
    /// the script as its `-c` argument; otherwise the connection's own
    /// `/bin/sh -c` runs it directly.
    fn build_command(&self, params: &ModuleParams) -> ModuleResult<String> {
        let cmd = params.get_string_required("cmd")?;
        Ok(match params.get_string("executable")? {
            Some(executable) => format!(
                "{} -c {}",
                shell_words::quote(&executable),
                shell_words::quote(&cmd)
            ),
            None => cmd,
        })
    }
}

#[async_trait]
impl Module for ShellModule {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "Execute shell commands with full shell features"
    }

    fn required_params(&self) -> &[&'static str] {
        &["cmd"]
    }

    fn accepts_free_form(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        conn: &dyn Connection,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        if let Some(output) = check_creates_removes(params, conn, context).await? {
            return Ok(output);
        }

        let command = self.build_command(params)?;
        let options = context.command_options(params)?;

        let started = chrono::Utc::now();
        let result = conn.execute(&command, Some(options)).await?;
        Ok(command_output(&params.get_string_required("cmd")?, result, started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use crate::modules::ModuleStatus;
    use serde_json::json;

    fn cmd(command: &str) -> ModuleParams {
        let mut params = ModuleParams::new();
        params.insert("cmd".to_string(), json!(command));
        params
    }

    #[tokio::test]
    async fn test_shell_pipes() {
        let conn = LocalConnection::new();
        let output = ShellModule
            .execute(
                &cmd("printf 'a\\nb\\nc\\n' | wc -l"),
                &conn,
                &ModuleContext::new("local"),
            )
            .await
            .unwrap();

        assert_eq!(output.status, ModuleStatus::Changed);
        assert_eq!(output.stdout.as_deref().map(str::trim), Some("3"));
    }

    #[tokio::test]
    async fn test_shell_env_and_failure() {
        let conn = LocalConnection::new();
        let mut params = cmd("echo $GREETING; exit 2");
        params.insert("env".to_string(), json!({"GREETING": "hi"}));

        let output = ShellModule
            .execute(&params, &conn, &ModuleContext::new("local"))
            .await
            .unwrap();
        assert_eq!(output.status, ModuleStatus::Failed);
        assert_eq!(output.rc, Some(2));
        assert_eq!(output.stdout.as_deref().map(str::trim), Some("hi"));
        assert_eq!(output.data["cmd"], json!("echo $GREETING; exit 2"));
    }

    #[test]
    fn test_custom_executable() {
        let mut params = cmd("echo $0");
        params.insert("executable".to_string(), json!("/bin/bash"));
        assert_eq!(
            ShellModule.build_command(&params).unwrap(),
            "/bin/bash -c 'echo $0'"
        );
    }
}
