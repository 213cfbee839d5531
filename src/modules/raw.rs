//! Raw module - run a command line as-is
//!
//! No `creates`/`removes` guards, no `chdir`; the string goes to the
//! connection untouched.

use async_trait::async_trait;

use super::{command_output, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::connection::Connection;

/// Module for executing a raw command
pub struct RawModule;

#[async_trait]
impl Module for RawModule {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn description(&self) -> &'static str {
        "Execute a low-down and dirty command"
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
        let command = params.get_string_required("cmd")?;
        let started = chrono::Utc::now();
        let result = conn
            .execute(&command, Some(context.options.clone()))
            .await?;
        Ok(command_output(&command, result, started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use crate::modules::ModuleStatus;

    #[tokio::test]
    async fn test_raw_execute() {
        let mut params = ModuleParams::new();
        params.insert("cmd".to_string(), serde_json::json!("echo raw && exit 0"));

        let output = RawModule
            .execute(&params, &LocalConnection::new(), &ModuleContext::new("local"))
            .await
            .unwrap();
        assert_eq!(output.status, ModuleStatus::Changed);
        assert_eq!(output.stdout.as_deref().map(str::trim), Some("raw"));
    }
}
