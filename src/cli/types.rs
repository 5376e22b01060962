//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::config::ConfigArgs;
use super::commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Cadence - bounded round-based research and refinement runs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .cadence/config.yaml + .cadence/local.yaml)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine on a topic and store the artifact
    Run(RunArgs),

    /// Inspect the layered configuration
    Config(ConfigArgs),
}
