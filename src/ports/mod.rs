// Ports - Interface definitions (contracts)

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Receives fractional progress (0.0..=1.0) of a single encoder invocation
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64);
}

/// Sink that drops every report
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _fraction: f64) {}
}

/// One encoder invocation: read `input`, write `output`
pub struct EncodeJob<'a> {
    pub input: &'a ScratchSlot,
    pub output: &'a ScratchSlot,
    /// Duration of the source, used to turn encoder timestamps into a fraction
    pub source_duration_secs: Option<f64>,
    pub progress: &'a dyn ProgressSink,
    /// Cancelling this token must stop the invocation promptly
    pub cancel: CancellationToken,
}

/// Port for the media encoder that performs every pipeline stage
#[async_trait]
pub trait EncoderPort: Send + Sync {
    /// Backend implementing this port
    fn backend(&self) -> EncoderBackend;

    /// Version string; fails when the encoder cannot actually run
    async fn version(&self) -> Result<String, DomainError>;

    /// Read stream geometry, frame rate, duration and audio layout
    async fn probe(&self, path: &Path) -> Result<ProbeReport, DomainError>;

    /// Resize to the filter's geometry and drop every audio stream
    async fn scale_and_strip_audio(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError>;

    /// Copy the video stream and pair it with a generated silent track,
    /// truncated to the shorter of the two
    async fn mux_silent_audio(
        &self,
        job: &EncodeJob<'_>,
        audio: &SilentAudioSpec,
    ) -> Result<(), DomainError>;

    /// Resize to the filter's geometry and keep existing audio untouched
    async fn scale_with_audio_preserved(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError>;

    /// Re-time the video to exactly `rate` frames per second
    async fn normalize_frame_rate(
        &self,
        job: &EncodeJob<'_>,
        rate: FrameRate,
    ) -> Result<(), DomainError>;
}

/// Loads an encoder. Called at most once per successful initialization.
#[async_trait]
pub trait EncoderLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn EncoderPort>, DomainError>;
}

/// Port for per-request scratch storage
#[async_trait]
pub trait ScratchPort: Send + Sync {
    /// Reserve the four slots for a request. Nothing exists on disk yet.
    async fn allocate(&self, request_id: Uuid) -> Result<ScratchHandle, DomainError>;

    async fn write(&self, slot: &ScratchSlot, bytes: &[u8]) -> Result<(), DomainError>;

    async fn read(&self, slot: &ScratchSlot) -> Result<Vec<u8>, DomainError>;

    /// Remove every slot of the handle. Idempotent; missing slots are not an
    /// error and removal failures are logged, never raised.
    async fn release(&self, handle: &ScratchHandle);
}
