//! Command module - Execute arbitrary commands
//!
//! The command line is split into words and every word is quoted before it
//! reaches the remote shell, so pipes, redirects and variables are passed
//! through literally. For shell features use the shell module.

use async_trait::async_trait;

use super::{
    check_creates_removes, command_output, Module, ModuleContext, ModuleError, ModuleOutput,
    ModuleParams, ModuleResult, ParamExt,
};
use crate::connection::Connection;

/// Module for executing commands without shell interpretation
pub struct CommandModule;

impl CommandModule {
    /// Quoted command line built from `argv` or `cmd`
    fn build_command(&self, params: &ModuleParams) -> ModuleResult<String> {
        let words = match params.get_vec_string("argv")? {
            Some(argv) => argv,
            None => {
                let cmd = params.get_string_required("cmd")?;
                shell_words::split(&cmd).map_err(|e| {
                    ModuleError::InvalidParameter(format!("cannot parse cmd '{}': {}", cmd, e))
                })?
            }
        };

        if words.is_empty() {
            return Err(ModuleError::InvalidParameter(
                "cmd cannot be empty".to_string(),
            ));
        }

        Ok(shell_words::join(words))
    }
}

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    fn description(&self) -> &'static str {
        "Execute commands without going through a shell"
    }

    fn accepts_free_form(&self) -> bool {
        true
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if params.get("cmd").is_none() && params.get("argv").is_none() {
            return Err(ModuleError::MissingParameter(
                "Either 'cmd' or 'argv' must be provided".to_string(),
            ));
        }
        self.build_command(params).map(|_| ())
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
        Ok(command_output(&command, result, started))
    }
}
