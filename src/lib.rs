//! previewkit library
//!
//! Converts short MP4 screen recordings into App Store preview videos: a
//! Lanczos rescale to the platform resolution, an optional silent stereo
//! track and a final re-time to 30 fps, driven through either the `ffmpeg`
//! executable or the in-process libav bindings.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use app::{ConversionTask, ConvertInteractor, EncoderService};
pub use domain::errors::DomainError;
pub use domain::model::{
    ConversionRequest, ConversionResult, Platform, ProgressEvent, Stage, PLATFORM_PROFILES,
};
pub use error::{ErrorCategory, PreviewError, PreviewResult};
