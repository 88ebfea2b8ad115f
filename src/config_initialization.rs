//! Configuration initialization and hierarchy management

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::adapters::toml_config::{LogFormat, ServiceConfig, TomlConfigAdapter};
use crate::cli::Cli;
use crate::domain::model::{EncoderBackend, Environment};

/// Effective configuration and where it came from
#[derive(Debug)]
pub struct InitializedConfig {
    pub config: ServiceConfig,
    pub loaded_from: Option<PathBuf>,
    pub cli_overrides: usize,
}

impl InitializedConfig {
    /// Report the configuration source once logging is installed
    pub fn log_summary(&self) {
        match &self.loaded_from {
            Some(path) => info!("Configuration loaded from {}", path.display()),
            None => info!("No configuration file found, using defaults"),
        }
        if self.cli_overrides > 0 {
            debug!("Applied {} CLI configuration overrides", self.cli_overrides);
        }
    }
}

/// Initialize configuration hierarchy following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration(cli: &Cli) -> Result<InitializedConfig> {
    let mut adapter = TomlConfigAdapter::new();
    let mut config = adapter
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    let cli_overrides = apply_cli_overrides(&mut config, cli)?;
    config.validate().context("Invalid configuration")?;

    Ok(InitializedConfig {
        config,
        loaded_from: adapter.loaded_from().map(|p| p.to_path_buf()),
        cli_overrides,
    })
}

/// Apply CLI argument overrides to configuration
pub fn apply_cli_overrides(config: &mut ServiceConfig, cli: &Cli) -> Result<usize> {
    let mut applied = 0;

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
        applied += 1;
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = LogFormat::parse(format)?;
        applied += 1;
    }
    if let Some(backend) = &cli.backend {
        config.encoder.backend = EncoderBackend::parse(backend)?;
        applied += 1;
    }
    if let Some(path) = &cli.ffmpeg_path {
        config.encoder.ffmpeg_path = Some(path.clone());
        applied += 1;
    }
    if let Some(path) = &cli.ffprobe_path {
        config.encoder.ffprobe_path = Some(path.clone());
        applied += 1;
    }
    if let Some(environment) = &cli.environment {
        config.environment = Environment::parse(environment)?;
        applied += 1;
    }

    Ok(applied)
}
