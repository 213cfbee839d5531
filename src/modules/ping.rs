//! Ping module - connectivity check
//!
//! Sends a payload through the host's shell and expects it echoed back.

use async_trait::async_trait;
use serde_json::json;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::connection::Connection;

/// Payload returned when none is given
const DEFAULT_DATA: &str = "pong";

/// Module that verifies a host can run commands
pub struct PingModule;

#[async_trait]
impl Module for PingModule {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn description(&self) -> &'static str {
        "Try to connect to host and verify a usable shell"
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        conn: &dyn Connection,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let data = params
            .get_string("data")?
            .unwrap_or_else(|| DEFAULT_DATA.to_string());

        // `crash` forces a failure so error handling can be exercised
        if data == "crash" {
            return Ok(ModuleOutput::failed("boom").with_data("ping", json!(data)));
        }

        let probe = format!("printf '%s' {}", shell_words::quote(&data));
        let result = conn.execute(&probe, Some(context.options.clone())).await?;

        if !result.success || result.stdout != data {
            return Ok(ModuleOutput::failed(format!(
                "unexpected ping response from {}",
                context.host
            ))
            .with_command_output(Some(result.stdout), Some(result.stderr), Some(result.exit_code)));
        }

        Ok(ModuleOutput::ok("pong").with_data("ping", json!(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use crate::modules::ModuleStatus;

    #[tokio::test]
    async fn test_ping_default() {
        let output = PingModule
            .execute(
                &ModuleParams::new(),
                &LocalConnection::new(),
                &ModuleContext::new("local"),
            )
            .await
            .unwrap();
        assert_eq!(output.status, ModuleStatus::Ok);
        assert!(!output.changed);
        assert_eq!(output.data["ping"], json!("pong"));
    }

    #[tokio::test]
    async fn test_ping_custom_data_and_crash() {
        let conn = LocalConnection::new();
        let ctx = ModuleContext::new("local");

        let mut params = ModuleParams::new();
        params.insert("data".into(), json!("hello world"));
        let output = PingModule.execute(&params, &conn, &ctx).await.unwrap();
        assert_eq!(output.data["ping"], json!("hello world"));

        params.insert("data".into(), json!("crash"));
        let output = PingModule.execute(&params, &conn, &ctx).await.unwrap();
        assert_eq!(output.status, ModuleStatus::Failed);
    }
}
