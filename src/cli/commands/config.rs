//! Implementation of the `cadence config` command.

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration after all layers are merged
    Show,
    /// Load and validate the configuration without running anything
    Validate,
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    #[serde(flatten)]
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("Failed to render configuration: {e}"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigValidateOutput {
    pub success: bool,
    pub message: String,
    pub mode: String,
    pub budgets: Vec<String>,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        lines.push(format!("Mode: {}", self.mode));
        if !self.budgets.is_empty() {
            lines.push(format!("Budgets: {}", self.budgets.join(", ")));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn execute(args: ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    // Loading validates; a failure propagates with the offending field.
    let config = load_config(config_path).context("Configuration is invalid")?;

    match args.command {
        ConfigCommands::Show => output(&ConfigShowOutput { config }, json_mode),
        ConfigCommands::Validate => {
            let budgets = config
                .budgets
                .iter()
                .map(|(name, cap)| format!("{name}={cap}"))
                .collect();
            output(
                &ConfigValidateOutput {
                    success: true,
                    message: "Configuration is valid".to_string(),
                    mode: config.mode.to_string(),
                    budgets,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
