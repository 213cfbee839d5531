//! Run command - Execute a module against a host pattern
//!
//! This module implements the `run` subcommand: resolve the pattern, fan the
//! module out over the matching hosts and report per-host results.

use super::{CommandContext, Runnable};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use fanout::callback::{DefaultCallback, NullCallback, RunCallback};
use fanout::config::parse_duration;
use fanout::executor::{parse_module_args, ExecutionController, Task};
use fanout::modules::ModuleRegistry;

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Host pattern (e.g. `all`, `web:&prod`, `web*:!web3`)
    #[arg(required = true)]
    pub pattern: String,

    /// Module to execute
    #[arg(short = 'm', long = "module-name")]
    pub module: Option<String>,

    /// Module arguments (`key=value` words, a JSON object, or a free-form command)
    #[arg(short = 'a', long = "args")]
    pub args: Option<String>,

    /// Maximum number of hosts in flight
    #[arg(short = 'f', long, value_parser = parse_forks)]
    pub forks: Option<usize>,

    /// Per-host timeout (`30`, `30s`, `2m`)
    #[arg(short = 'T', long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Deadline for the whole run
    #[arg(long, value_parser = parse_duration)]
    pub global_timeout: Option<Duration>,

    /// Connection pool capacity (default: the larger of 16 and the fork limit)
    #[arg(long, value_parser = parse_forks)]
    pub pool_size: Option<usize>,

    /// Become (sudo/su/doas)
    #[arg(short = 'b', long)]
    pub r#become: bool,

    /// Become user
    #[arg(long)]
    pub become_user: Option<String>,

    /// Become method (sudo, su, doas)
    #[arg(long)]
    pub become_method: Option<String>,

    /// Succeed with an empty report when the pattern matches no hosts
    #[arg(long)]
    pub allow_empty: bool,
}

fn parse_forks(value: &str) -> std::result::Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("invalid number '{}': {}", value, e)),
    }
}

impl RunArgs {
    /// Build the task from arguments layered over configured defaults
    pub fn build_task(&self, ctx: &CommandContext, registry: &ModuleRegistry) -> Result<Task> {
        let defaults = &ctx.config.defaults;
        let module = self
            .module
            .clone()
            .unwrap_or_else(|| defaults.module_name.clone());

        let free_form = registry
            .get(&module)
            .map(|m| m.accepts_free_form())
            .unwrap_or(false);
        let args = match &self.args {
            Some(raw) => parse_module_args(raw, free_form)
                .with_context(|| format!("Invalid arguments for module '{}'", module))?,
            None => Default::default(),
        };

        let mut task = Task::new(module)
            .with_pattern(self.pattern.clone())
            .with_args(args)
            .with_forks(self.forks.unwrap_or(defaults.forks))
            .with_timeout(self.timeout.unwrap_or(defaults.timeout));

        if let Some(deadline) = self.global_timeout.or(defaults.global_timeout) {
            task = task.with_global_timeout(deadline);
        }

        let escalation = &ctx.config.privilege_escalation;
        if self.r#become || escalation.r#become {
            let user = self
                .become_user
                .clone()
                .or_else(|| escalation.become_user.clone());
            let method = self
                .become_method
                .clone()
                .unwrap_or_else(|| escalation.become_method.clone());
            task = task.with_become(user).with_become_method(method);
        }

        Ok(task)
    }

    /// Execute the run command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let registry = Arc::new(ModuleRegistry::with_builtins());
        let task = self.build_task(ctx, &registry)?;
        debug!(module = %task.module, pattern = %task.pattern, forks = task.forks, "Built task");

        let mut controller_config = ctx
            .config
            .controller_config()
            .with_fatal_on_empty(!self.allow_empty);
        if let Some(capacity) = self.pool_size {
            controller_config.pool.capacity = Some(capacity);
        }

        let callback: Arc<dyn RunCallback> = if ctx.output.is_human() {
            Arc::new(
                DefaultCallback::new()
                    .with_no_color(!ctx.output.use_color())
                    .with_verbosity(ctx.verbosity),
            )
        } else {
            Arc::new(NullCallback)
        };

        let controller = ExecutionController::new(ctx.resolver(), controller_config)
            .with_registry(registry)
            .with_callback(callback);

        let token = controller.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling remaining hosts");
                token.cancel();
            }
        });

        let outcome = controller.run(&task).await;
        interrupt.abort();

        match outcome {
            Ok(report) => {
                if !ctx.output.is_human() {
                    ctx.output.document(&report)?;
                }
                Ok(report.exit_code())
            }
            Err(err) => {
                ctx.output.error(&err.to_string());
                Ok(err.exit_code())
            }
        }
    }
}

#[async_trait::async_trait]
impl Runnable for RunArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}
