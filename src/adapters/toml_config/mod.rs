// TOML config adapter - Service configuration from file and environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::{StageTimeoutPolicy, ValidationPolicy};


/// Config files tried, in order, when none is given explicitly
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["previewkit.toml", "config/previewkit.toml"];

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "PREVIEWKIT_";

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub environment: Environment,
    pub encoder: EncoderConfig,
    pub limits: LimitsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    pub backend: EncoderBackend,
    /// Resolved from `PATH` when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Resolved from `PATH` when unset
    pub ffprobe_path: Option<PathBuf>,
    /// x264 preset used by the resize stages
    pub preset: Option<String>,
    /// Bound on version and diagnostic probes
    pub probe_timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: EncoderBackend::Native,
            ffmpeg_path: None,
            ffprobe_path: None,
            preset: None,
            probe_timeout_secs: 10,
        }
    }
}

impl EncoderConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_file_size_mib: u64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub allowed_extensions: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let policy = ValidationPolicy::default();
        Self {
            max_file_size_mib: policy.max_file_size_bytes / (1024 * 1024),
            min_duration_secs: policy.min_duration_secs,
            max_duration_secs: policy.max_duration_secs,
            allowed_extensions: policy.allowed_extensions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub max_concurrent_conversions: usize,
    pub stage_timeout_base_secs: u64,
    pub stage_timeout_per_mib_secs: u64,
    /// System temp directory when unset
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let timeouts = StageTimeoutPolicy::default();
        Self {
            max_concurrent_conversions: num_cpus::get(),
            stage_timeout_base_secs: timeouts.base.as_secs(),
            stage_timeout_per_mib_secs: timeouts.per_mib.as_secs(),
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid log format: {}. Valid formats: pretty, compact, json",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ServiceConfig {
    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            max_file_size_bytes: self.limits.max_file_size_mib.saturating_mul(1024 * 1024),
            min_duration_secs: self.limits.min_duration_secs,
            max_duration_secs: self.limits.max_duration_secs,
            allowed_extensions: self
                .limits
                .allowed_extensions
                .iter()
                .map(|ext| {
                    let ext = ext.trim().to_lowercase();
                    if ext.starts_with('.') {
                        ext
                    } else {
                        format!(".{}", ext)
                    }
                })
                .collect(),
        }
    }

    pub fn stage_timeout_policy(&self) -> StageTimeoutPolicy {
        StageTimeoutPolicy {
            base: Duration::from_secs(self.pipeline.stage_timeout_base_secs),
            per_mib: Duration::from_secs(self.pipeline.stage_timeout_per_mib_secs),
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.pipeline
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<(), DomainError> {
        let limits = &self.limits;
        if !(limits.min_duration_secs.is_finite() && limits.max_duration_secs.is_finite()) {
            return Err(DomainError::BadArgs(
                "Duration limits must be finite".to_string(),
            ));
        }
        if limits.min_duration_secs < 0.0 || limits.min_duration_secs >= limits.max_duration_secs {
            return Err(DomainError::BadArgs(format!(
                "limits.min_duration_secs ({}) must be non-negative and below limits.max_duration_secs ({})",
                limits.min_duration_secs, limits.max_duration_secs
            )));
        }
        if limits.max_file_size_mib == 0 {
            return Err(DomainError::BadArgs(
                "limits.max_file_size_mib must be greater than 0".to_string(),
            ));
        }
        if limits.allowed_extensions.is_empty() {
            return Err(DomainError::BadArgs(
                "limits.allowed_extensions must not be empty".to_string(),
            ));
        }
        if self.pipeline.max_concurrent_conversions == 0 {
            return Err(DomainError::BadArgs(
                "pipeline.max_concurrent_conversions must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.stage_timeout_base_secs == 0 {
            return Err(DomainError::BadArgs(
                "pipeline.stage_timeout_base_secs must be greater than 0".to_string(),
            ));
        }
        if self.encoder.probe_timeout_secs == 0 {
            return Err(DomainError::BadArgs(
                "encoder.probe_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(preset) = &self.encoder.preset {
            if preset.trim().is_empty() {
                return Err(DomainError::BadArgs(
                    "encoder.preset must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Loads [`ServiceConfig`] from TOML files and `PREVIEWKIT_*` variables
#[derive(Debug, Default)]
pub struct TomlConfigAdapter {
    loaded_from: Option<PathBuf>,
}

impl TomlConfigAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// File the last successful [`TomlConfigAdapter::load`] read, if any
    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }

    /// Defaults, overlaid with the config file (explicit path or first
    /// default path found), overlaid with the process environment
    pub fn load(&mut self, explicit: Option<&Path>) -> Result<ServiceConfig, DomainError> {
        let mut config = match Self::discover(explicit)? {
            Some(path) => {
                let config = Self::load_file(&path)?;
                self.loaded_from = Some(path);
                config
            }
            None => {
                debug!("No configuration file found, using defaults");
                ServiceConfig::default()
            }
        };

        let overrides = Self::apply_env(&mut config, |key| std::env::var(key).ok())?;
        if overrides > 0 {
            info!("Applied {} environment variable overrides", overrides);
        }
        Ok(config)
    }

    /// An explicit path must exist; otherwise the default paths are searched
    pub fn discover(explicit: Option<&Path>) -> Result<Option<PathBuf>, DomainError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(DomainError::FsFail(format!(
                    "Config file does not exist: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        Ok(DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }

    pub fn load_file(path: &Path) -> Result<ServiceConfig, DomainError> {
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| DomainError::FsFail(format!("Failed to read config file: {}", e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<ServiceConfig, DomainError> {
        toml::from_str(content)
            .map_err(|e| DomainError::BadArgs(format!("Failed to parse TOML config: {}", e)))
    }

    /// Apply `PREVIEWKIT_*` overrides read through `lookup`; returns how many
    /// were applied
    pub fn apply_env(
        config: &mut ServiceConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<usize, DomainError> {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
        };
        let mut applied = 0;

        if let Some(v) = get("ENVIRONMENT") {
            config.environment = Environment::parse(&v)?;
            applied += 1;
        }
        if let Some(v) = get("BACKEND") {
            config.encoder.backend = EncoderBackend::parse(&v)?;
            applied += 1;
        }
        if let Some(v) = get("FFMPEG_PATH") {
            config.encoder.ffmpeg_path = Some(PathBuf::from(v));
            applied += 1;
        }
        if let Some(v) = get("FFPROBE_PATH") {
            config.encoder.ffprobe_path = Some(PathBuf::from(v));
            applied += 1;
        }
        if let Some(v) = get("PRESET") {
            config.encoder.preset = Some(v);
            applied += 1;
        }
        if let Some(v) = get("MAX_FILE_SIZE_MIB") {
            config.limits.max_file_size_mib = parse_number("MAX_FILE_SIZE_MIB", &v)?;
            applied += 1;
        }
        if let Some(v) = get("MAX_CONCURRENT_CONVERSIONS") {
            config.pipeline.max_concurrent_conversions =
                parse_number("MAX_CONCURRENT_CONVERSIONS", &v)?;
            applied += 1;
        }
        if let Some(v) = get("STAGE_TIMEOUT_BASE_SECS") {
            config.pipeline.stage_timeout_base_secs = parse_number("STAGE_TIMEOUT_BASE_SECS", &v)?;
            applied += 1;
        }
        if let Some(v) = get("SCRATCH_DIR") {
            config.pipeline.scratch_dir = Some(PathBuf::from(v));
            applied += 1;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.logging.level = v;
            applied += 1;
        }
        if let Some(v) = get("LOG_FORMAT") {
            config.logging.format = LogFormat::parse(&v)?;
            applied += 1;
        }

        Ok(applied)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, DomainError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        DomainError::BadArgs(format!("Invalid value for {}{}: {}", ENV_PREFIX, name, e))
    })
}
