//! Error handling module for previewkit

use thiserror::Error;

use crate::domain::errors::DomainError;
use crate::domain::model::{Environment, Stage};

/// Caller-facing error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Precondition failed; safe to retry later
    EncoderUnavailable,
    /// The upload was rejected; the user must supply different input
    InvalidInput,
    /// An encoder stage failed
    ConversionFailed,
    /// The caller aborted the conversion
    Cancelled,
}

impl ErrorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::EncoderUnavailable => "encoder unavailable",
            ErrorCategory::InvalidInput => "invalid input",
            ErrorCategory::ConversionFailed => "conversion failed",
            ErrorCategory::Cancelled => "cancelled",
        }
    }

    /// Equivalent HTTP status for API front-ends
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::EncoderUnavailable => 503,
            ErrorCategory::InvalidInput => 400,
            ErrorCategory::ConversionFailed => 500,
            ErrorCategory::Cancelled => 499,
        }
    }

    /// Process exit code (sysexits) for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCategory::EncoderUnavailable => 69,
            ErrorCategory::InvalidInput => 65,
            ErrorCategory::ConversionFailed => 70,
            ErrorCategory::Cancelled => 130,
        }
    }

    fn generic_message(&self) -> &'static str {
        match self {
            ErrorCategory::EncoderUnavailable => {
                "The video encoder is currently unavailable. Please try again later."
            }
            ErrorCategory::InvalidInput => "The uploaded video does not meet the requirements.",
            ErrorCategory::ConversionFailed => "An error occurred during conversion",
            ErrorCategory::Cancelled => "The conversion was cancelled.",
        }
    }
}

/// Main error type for conversion requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreviewError {
    /// Encoder capability missing; the request never entered the pipeline
    #[error("Encoder unavailable: {reason}")]
    EncoderUnavailable { reason: String },

    /// Upload failed format, size or duration constraints
    #[error("Invalid input: {}", problems.join("; "))]
    InvalidInput { problems: Vec<String> },

    /// An encoder stage failed; scratch was released before this surfaced
    #[error("Conversion failed during {stage}: {message}")]
    StageFailed { stage: Stage, message: String },

    /// Scratch storage could not be allocated
    #[error("Scratch storage error: {message}")]
    Scratch { message: String },

    /// Cancelled by the caller
    #[error("Conversion cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PreviewError {
    pub fn stage_failed(stage: Stage, error: DomainError) -> Self {
        match error {
            DomainError::Cancelled => PreviewError::Cancelled { stage },
            other => PreviewError::StageFailed {
                stage,
                message: other.to_string(),
            },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PreviewError::EncoderUnavailable { .. } => ErrorCategory::EncoderUnavailable,
            PreviewError::InvalidInput { .. } => ErrorCategory::InvalidInput,
            PreviewError::StageFailed { .. } | PreviewError::Scratch { .. } => {
                ErrorCategory::ConversionFailed
            }
            PreviewError::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    /// Stage the failure belongs to, when it happened inside the pipeline
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PreviewError::StageFailed { stage, .. } | PreviewError::Cancelled { stage } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// Message safe to show the caller.
    ///
    /// Validation problems are always shown since the user has to act on
    /// them; encoder and host details only leave the process outside
    /// production.
    pub fn public_message(&self, environment: Environment) -> String {
        match (self, environment) {
            (PreviewError::InvalidInput { problems }, _) => problems.join("; "),
            (_, Environment::Development) => self.to_string(),
            (_, Environment::Production) => self.category().generic_message().to_string(),
        }
    }
}

/// Result type alias for conversion operations
pub type PreviewResult<T> = std::result::Result<T, PreviewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_distinguishable() {
        let unavailable = PreviewError::EncoderUnavailable {
            reason: "ffmpeg not found".to_string(),
        };
        let invalid = PreviewError::InvalidInput {
            problems: vec!["File must be in .mp4 format".to_string()],
        };
        let failed = PreviewError::StageFailed {
            stage: Stage::Scaling,
            message: "exit status 1".to_string(),
        };

        assert_eq!(unavailable.category().http_status(), 503);
        assert_eq!(invalid.category().http_status(), 400);
        assert_eq!(failed.category().http_status(), 500);
        assert_eq!(failed.stage(), Some(Stage::Scaling));
        assert_eq!(invalid.stage(), None);
    }

    #[test]
    fn test_cancellation_maps_to_cancelled() {
        let err = PreviewError::stage_failed(Stage::AddingAudio, DomainError::Cancelled);
        assert_eq!(err, PreviewError::Cancelled { stage: Stage::AddingAudio });
        assert_eq!(err.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_production_hides_encoder_detail() {
        let err = PreviewError::stage_failed(
            Stage::Finalizing,
            DomainError::ProcessingError("/tmp/secret/path: Permission denied".to_string()),
        );

        let dev = err.public_message(Environment::Development);
        assert!(dev.contains("/tmp/secret/path"));

        let prod = err.public_message(Environment::Production);
        assert_eq!(prod, "An error occurred during conversion");
    }

    #[test]
    fn test_validation_problems_always_shown() {
        let err = PreviewError::InvalidInput {
            problems: vec!["File must be in .mp4 format".to_string()],
        };
        assert_eq!(
            err.public_message(Environment::Production),
            "File must be in .mp4 format"
        );
    }
}
