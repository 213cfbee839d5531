//! Fanout - run one module across many hosts
//!
//! This is the main entry point for the Fanout CLI.

mod cli;

use anyhow::Result;
use cli::commands::{CommandContext, Runnable};
use cli::{Cli, Commands};
use fanout::config::{Config, LogFormat, LoggingConfig};
use fanout::inventory::InventoryError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status for configuration errors
const CONFIG_ERROR_EXIT: i32 = 6;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; only an explicitly requested file is fatal
    let (config, load_error) = match Config::load(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(e) if cli.config.is_some() => {
            eprintln!("ERROR! {:#}", e);
            std::process::exit(CONFIG_ERROR_EXIT);
        }
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(cli.verbosity(), &config.logging);

    if let Some(e) = load_error {
        tracing::warn!("Failed to load config, using defaults: {:#}", e);
    }
    if cli.verbosity() >= 2 && !cli.is_structured() {
        eprintln!("Fanout v{}", VERSION);
    }

    if cli.no_color || !config.colors.enabled {
        colored::control::set_override(false);
    }

    // Create command context
    let mut ctx = CommandContext::new(&cli, config);

    // Execute the appropriate command
    let exit_code = match &cli.command {
        Commands::Run(args) => args.run(&mut ctx).await,
        Commands::ListHosts(args) => args.run(&mut ctx).await,
    }
    .unwrap_or_else(|e| {
        ctx.output.error(&format!("{:#}", e));
        exit_code_for(&e)
    });

    std::process::exit(exit_code);
}

/// Map a command error onto the documented exit codes
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<fanout::Error>() {
        e.exit_code()
    } else if err.downcast_ref::<InventoryError>().is_some() {
        5
    } else {
        1
    }
}

/// Initialize logging based on verbosity level and configured defaults
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
