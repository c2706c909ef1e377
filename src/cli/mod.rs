//! CLI argument parsing using clap.
//!
//! This module defines the command-line interface for the automation
//! engine and the configuration it loads.

mod config;

pub use config::{AccountSpec, ConfigError, EngineConfig, EngineFile, SignerSpec};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::strategy::TemplateCategory;

/// Autopilot - delegated DeFi automation engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "AUTOPILOT_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine against a snapshot file with paper execution
    Run {
        /// Deployment file: engine settings, accounts and strategies
        #[arg(long, env = "AUTOPILOT_CONFIG")]
        config: PathBuf,
        /// Snapshot JSON file, re-read every cycle
        #[arg(long, env = "AUTOPILOT_SNAPSHOT")]
        snapshot: PathBuf,
        /// Stop after this many cycles (runs until Ctrl-C when absent)
        #[arg(long)]
        cycles: Option<u64>,
        /// Serve /health and /metrics on this port (overrides the file)
        #[arg(long, env = "AUTOPILOT_HEALTH_PORT")]
        health_port: Option<u16>,
        /// Mirror ledger records to this CSV file (overrides the file)
        #[arg(long)]
        ledger_csv: Option<PathBuf>,
    },

    /// Project every configured strategy against a snapshot without executing
    Simulate {
        /// Deployment file: engine settings, accounts and strategies
        #[arg(long, env = "AUTOPILOT_CONFIG")]
        config: PathBuf,
        /// Snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        /// Only simulate the strategy with this name or id
        #[arg(long)]
        strategy: Option<String>,
    },

    /// List the built-in strategy templates
    Templates {
        /// Only show one difficulty tier
        #[arg(long, value_enum)]
        category: Option<TemplateCategory>,
        /// Print full template definitions as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Instantiate this template as a strategy entry for the deployment file
        #[arg(long, requires = "account")]
        instantiate: Option<String>,
        /// Owning delegation account for `--instantiate`
        #[arg(long)]
        account: Option<String>,
    },
}
