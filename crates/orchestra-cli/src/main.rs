//! orchestra CLI entry point.
//!
//! Binary name: `orchestra`
//!
//! Parses CLI arguments, loads `orchestra.toml`, initializes logging, then
//! dispatches to the command handler.

mod cli;

use anyhow::anyhow;
use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = orchestra_infra::config::load_config(&cli.config).await;
    if let Some(url) = &cli.agent_url {
        config.agent_service.url = url.clone();
    }

    // -v / -vv win over RUST_LOG and the configured level
    let level_override = match cli.verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };
    orchestra_observe::tracing_setup::init_tracing(&config.logging, level_override)
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    match cli.command {
        Commands::Run {
            file,
            inputs,
            input_json,
        } => {
            cli::workflow::handle_run(&file, &inputs, input_json.as_deref(), &config, cli.json).await
        }
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json),
        Commands::Check => cli::check::handle_check(&config, cli.json).await,
    }
}
