// Tracing log adapter - Structured logging using tracing crate

use tracing_subscriber::EnvFilter;

use crate::adapters::toml_config::{LogFormat, LoggingConfig};
use crate::domain::errors::*;

/// Installs the global tracing subscriber
pub struct TracingLogAdapter;

impl TracingLogAdapter {
    /// Filter from `RUST_LOG` when set, otherwise from the configured level
    pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, DomainError> {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
                .map_err(|e| DomainError::BadArgs(format!("Invalid RUST_LOG: {}", e))),
            _ => EnvFilter::try_new(&config.level).map_err(|e| {
                DomainError::BadArgs(format!("Invalid log level '{}': {}", config.level, e))
            }),
        }
    }

    /// Initialize logging; output goes to stderr so stdout stays usable
    /// for command output. A second call is a no-op.
    pub fn init(config: &LoggingConfig) -> Result<(), DomainError> {
        let filter = Self::env_filter(config)?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let result = match config.format {
            LogFormat::Pretty => builder.try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().try_init(),
        };

        if let Err(e) = result {
            tracing::debug!("Tracing subscriber already installed: {}", e);
        }
        Ok(())
    }
}
