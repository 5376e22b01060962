//! Cadence CLI entry point.

use clap::Parser;

use cadence::cli::{load_config, Cli, Commands};
use cadence::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config is reported by the command itself; log with defaults.
    let log_config = load_config(cli.config.as_deref())
        .ok()
        .and_then(|config| LogConfig::try_from(&config.logging).ok())
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Run(args) => {
            cadence::cli::commands::run::execute(args, cli.config.as_deref(), cli.json).await
        }
        Commands::Config(args) => {
            cadence::cli::commands::config::execute(args, cli.config.as_deref(), cli.json)
        }
    };

    if let Err(err) = result {
        cadence::cli::handle_error(err, cli.json);
    }
}
