// Domain rules - Input acceptance and pipeline planning policies

use std::path::Path;
use std::time::Duration;

use crate::domain::model::*;

#[cfg(test)]
mod tests;

const MIB: u64 = 1024 * 1024;

/// Limits an upload must satisfy before the pipeline accepts it
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPolicy {
    pub max_file_size_bytes: u64,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    /// Lowercase extensions including the dot, e.g. `.mp4`
    pub allowed_extensions: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 500 * MIB,
            min_duration_secs: 15.0,
            max_duration_secs: 30.0,
            allowed_extensions: vec![".mp4".to_string()],
        }
    }
}

/// What is known about an upload before any work is done
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor<'a> {
    pub file_name: &'a str,
    pub size_bytes: u64,
    pub duration_secs: Option<f64>,
}

impl<'a> SourceDescriptor<'a> {
    pub fn from_request(request: &'a ConversionRequest) -> Self {
        Self {
            file_name: &request.file_name,
            size_bytes: request.size_bytes(),
            duration_secs: request.duration_secs,
        }
    }
}

/// Outcome of validating an upload; every problem is reported
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates uploads against a [`ValidationPolicy`]
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    policy: ValidationPolicy,
}

impl InputValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Check name, size and (when known) duration
    pub fn validate(&self, source: &SourceDescriptor<'_>) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !self.has_allowed_extension(source.file_name) {
            report.errors.push(format!(
                "File must be in {} format",
                self.policy.allowed_extensions.join(" or ")
            ));
        }

        if source.size_bytes == 0 {
            report.errors.push("File is empty".to_string());
        } else if source.size_bytes > self.policy.max_file_size_bytes {
            report.errors.push(format!(
                "File is too large ({:.1} MiB); the maximum is {} MiB",
                source.size_bytes as f64 / MIB as f64,
                self.policy.max_file_size_bytes / MIB
            ));
        }

        if let Some(duration) = source.duration_secs {
            if let Some(problem) = self.duration_problem(duration) {
                report.errors.push(problem);
            }
        }

        report
    }

    /// Message for a duration outside the accepted bounds, if any
    pub fn duration_problem(&self, duration_secs: f64) -> Option<String> {
        if !duration_secs.is_finite() || duration_secs < self.policy.min_duration_secs {
            Some(format!(
                "Video must be at least {} seconds long",
                self.policy.min_duration_secs
            ))
        } else if duration_secs > self.policy.max_duration_secs {
            Some(format!(
                "Video must not exceed {} seconds",
                self.policy.max_duration_secs
            ))
        } else {
            None
        }
    }

    fn has_allowed_extension(&self, file_name: &str) -> bool {
        let extension = match Path::new(file_name).extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
            None => return false,
        };
        self.policy
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    }
}

/// Ordered encoder stages for a request
pub struct StagePlan;

impl StagePlan {
    /// Stages that invoke the encoder, in execution order
    pub fn encoder_stages(add_silent_audio_track: bool) -> Vec<Stage> {
        if add_silent_audio_track {
            vec![Stage::Scaling, Stage::AddingAudio, Stage::Finalizing]
        } else {
            vec![Stage::Scaling, Stage::Finalizing]
        }
    }
}

/// Wall-clock budget for one encoder invocation, proportional to input size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTimeoutPolicy {
    pub base: Duration,
    pub per_mib: Duration,
}

impl Default for StageTimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(120),
            per_mib: Duration::from_secs(2),
        }
    }
}

impl StageTimeoutPolicy {
    pub fn timeout_for(&self, input_bytes: u64) -> Duration {
        let mib = input_bytes.div_ceil(MIB);
        self.base + self.per_mib.saturating_mul(mib.min(u32::MAX as u64) as u32)
    }
}
