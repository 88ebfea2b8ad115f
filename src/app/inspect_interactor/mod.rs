// Inspect interactor - Diagnostic probe of a clip against the platform profiles

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::app::encoder_service::EncoderService;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::*;
use crate::error::{PreviewError, PreviewResult};

/// Interactor for the inspect use case
pub struct InspectInteractor {
    encoder: Arc<EncoderService>,
    validator: InputValidator,
}

impl InspectInteractor {
    pub fn new(encoder: Arc<EncoderService>, validator: InputValidator) -> Self {
        Self { encoder, validator }
    }

    /// Probe a clip and compare it with the App Store preview requirements
    pub async fn execute(&self, request: InspectRequest) -> PreviewResult<InspectResponse> {
        info!("Inspecting {}", request.input_path.display());
        let report = self.probe(&request.input_path).await?;

        let matching_platform = Platform::ALL
            .into_iter()
            .find(|platform| report.matches_profile(platform.profile()));
        let duration_problem = match report.duration_secs {
            Some(duration) => self.validator.duration_problem(duration),
            None => Some("Unable to verify video duration".to_string()),
        };

        let response = InspectResponse {
            input_path: request.input_path,
            matching_platform,
            app_preview_frame_rate: report.has_frame_rate(FrameRate::APP_PREVIEW),
            duration_problem,
            report,
        };
        info!("Inspection finished: {}", response.report.summary());
        Ok(response)
    }

    /// Duration of the clip at `path`, for validation before conversion
    pub async fn measure_duration(&self, path: &Path) -> PreviewResult<f64> {
        let report = self.probe(path).await.map_err(|e| match e {
            PreviewError::EncoderUnavailable { .. } => e,
            other => {
                warn!("Duration probe failed: {}", other);
                unverified_duration()
            }
        })?;
        report.duration_secs.ok_or_else(unverified_duration)
    }

    async fn probe(&self, path: &Path) -> PreviewResult<ProbeReport> {
        if !path.is_file() {
            return Err(PreviewError::InvalidInput {
                problems: vec![format!("Input file does not exist: {}", path.display())],
            });
        }

        let encoder = self
            .encoder
            .ensure_available()
            .await
            .map_err(|e| PreviewError::EncoderUnavailable {
                reason: e.to_string(),
            })?;

        encoder.probe(path).await.map_err(|e| match e {
            DomainError::EncoderUnavailable(reason) => {
                self.encoder.reset();
                PreviewError::EncoderUnavailable { reason }
            }
            other => PreviewError::InvalidInput {
                problems: vec![format!("Unable to read video: {}", other)],
            },
        })
    }
}

fn unverified_duration() -> PreviewError {
    PreviewError::InvalidInput {
        problems: vec!["Unable to verify video duration".to_string()],
    }
}

/// Request for clip inspection
#[derive(Debug, Clone)]
pub struct InspectRequest {
    pub input_path: PathBuf,
}

impl InspectRequest {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
        }
    }
}

/// Result of clip inspection
#[derive(Debug, Clone, Serialize)]
pub struct InspectResponse {
    pub input_path: PathBuf,
    pub report: ProbeReport,
    /// Platform whose preview resolution the clip already has
    pub matching_platform: Option<Platform>,
    pub app_preview_frame_rate: bool,
    pub duration_problem: Option<String>,
}

impl InspectResponse {
    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DomainError::InternalError(format!("JSON serialization failed: {}", e)))
    }

    /// Human-readable report
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        output.push_str("Clip Information:\n");
        output.push_str(&format!("  File: {}\n", self.input_path.display()));
        output.push_str(&format!("  Streams: {}\n", self.report.summary()));
        if let Some(duration) = self.report.duration_secs {
            output.push_str(&format!("  Duration: {:.3}s\n", duration));
        }

        output.push_str("\nApp Store Preview:\n");
        match self.matching_platform {
            Some(platform) => output.push_str(&format!(
                "  Resolution: matches {} ({})\n",
                platform,
                platform.profile().resolution()
            )),
            None => output.push_str("  Resolution: matches no platform, conversion will rescale\n"),
        }
        output.push_str(&format!(
            "  Frame rate: {}\n",
            if self.app_preview_frame_rate {
                "30 fps"
            } else {
                "not 30 fps, conversion will re-time"
            }
        ));
        match &self.duration_problem {
            Some(problem) => output.push_str(&format!("  Duration: {}\n", problem)),
            None => output.push_str("  Duration: within limits\n"),
        }

        output
    }
}
