//! CLI command definitions for the `orchestra` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod check;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and inspect agent workflows.
#[derive(Parser)]
#[command(name = "orchestra", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "orchestra.toml")]
    pub config: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Agent service base URL (overrides `agent_service.url`).
    #[arg(long, global = true, env = "ORCHESTRA_AGENT_URL")]
    pub agent_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition and wait for it to finish.
    Run {
        /// Definition file (.yaml, .yml or .json).
        file: PathBuf,

        /// Seed a context value (repeatable). Values parse as JSON, falling
        /// back to a plain string.
        #[arg(long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Seed the context from a JSON object.
        #[arg(long, value_name = "JSON")]
        input_json: Option<String>,
    },

    /// Parse and lint a workflow definition.
    Validate {
        /// Definition file (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Check that the agent service is reachable.
    Check,
}
