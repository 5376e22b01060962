use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(usize),

    #[error("Invalid units_per_round: {0}. Must be at least 1")]
    InvalidUnitsPerRound(usize),

    #[error("Invalid {name}: {value}. Must be in (0, 1]")]
    InvalidNoveltyThreshold { name: &'static str, value: f64 },

    #[error("Invalid success_threshold: {threshold}. Must be in [0, {scale}]")]
    InvalidSuccessThreshold { threshold: f64, scale: f64 },

    #[error("Invalid score_scale: {0}. Must be positive")]
    InvalidScoreScale(f64),

    #[error("Invalid max_selection_attempts: {0}. Must be at least 1")]
    InvalidSelectionAttempts(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid timeout: {0} must be greater than 0")]
    InvalidTimeout(&'static str),

    #[error("Missing budget for resource '{0}' required by {1} mode")]
    MissingBudget(String, String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .cadence/config.yaml (project config)
    /// 3. .cadence/local.yaml (local overrides, optional)
    /// 4. Environment variables (CADENCE_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same layering as [`ConfigLoader::load`], rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let base = dir.as_ref().join(".cadence");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base.join("config.yaml")))
            .merge(Yaml::file(base.join("local.yaml")))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment variables still
    /// override the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.dispatch.max_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }
        if config.dispatch.unit_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("unit_timeout_ms"));
        }
        if config.dispatch.round_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout("round_timeout_ms"));
        }

        let research = &config.research;
        if research.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(0));
        }
        if research.units_per_round == 0 {
            return Err(ConfigError::InvalidUnitsPerRound(0));
        }
        if research.max_selection_attempts == 0 {
            return Err(ConfigError::InvalidSelectionAttempts(0));
        }
        for (name, value) in [
            ("label_novelty_threshold", research.label_novelty_threshold),
            ("query_novelty_threshold", research.query_novelty_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidNoveltyThreshold { name, value });
            }
        }

        let refinement = &config.refinement;
        if !(refinement.score_scale.is_finite() && refinement.score_scale > 0.0) {
            return Err(ConfigError::InvalidScoreScale(refinement.score_scale));
        }
        if !(0.0..=refinement.score_scale).contains(&refinement.success_threshold) {
            return Err(ConfigError::InvalidSuccessThreshold {
                threshold: refinement.success_threshold,
                scale: refinement.score_scale,
            });
        }
        if refinement.plateau_min_delta < 0.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "plateau_min_delta must not be negative, got {}",
                refinement.plateau_min_delta
            )));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        for resource in Config::required_resources(config.mode) {
            if !config.budgets.contains_key(&resource) {
                return Err(ConfigError::MissingBudget(resource, config.mode.to_string()));
            }
        }

        if config.collaborators.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "collaborators.base_url cannot be empty".to_string(),
            ));
        }
        if config.store.dir.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "store.dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
