// Convert interactor - Orchestrates the App Store preview conversion

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::encoder_service::EncoderService;
use crate::app::progress::ProgressEmitter;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::*;
use crate::error::{PreviewError, PreviewResult};
use crate::ports::*;


/// A conversion running on its own task
pub struct ConversionTask {
    /// Stage events; closes when the conversion ends
    pub events: UnboundedReceiver<ProgressEvent>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<PreviewResult<ConversionResult>>,
}

/// Encoder operation behind one stage
enum StageOp {
    ScaleAndStrip(ScaleFilter),
    ScaleKeepingAudio(ScaleFilter),
    MuxSilentAudio(SilentAudioSpec),
    NormalizeFrameRate(FrameRate),
}

impl StageOp {
    async fn invoke(&self, encoder: &dyn EncoderPort, job: &EncodeJob<'_>) -> Result<(), DomainError> {
        match self {
            StageOp::ScaleAndStrip(filter) => encoder.scale_and_strip_audio(job, filter).await,
            StageOp::ScaleKeepingAudio(filter) => {
                encoder.scale_with_audio_preserved(job, filter).await
            }
            StageOp::MuxSilentAudio(audio) => encoder.mux_silent_audio(job, audio).await,
            StageOp::NormalizeFrameRate(rate) => encoder.normalize_frame_rate(job, *rate).await,
        }
    }
}

/// Scratch allocation owned by one conversion.
///
/// If the conversion future is dropped before [`ScratchLease::release`]
/// completes, the drop hands the handle to a background release on the
/// current runtime.
struct ScratchLease {
    scratch: Arc<dyn ScratchPort>,
    handle: ScratchHandle,
    released: bool,
}

impl ScratchLease {
    fn new(scratch: Arc<dyn ScratchPort>, handle: ScratchHandle) -> Self {
        Self {
            scratch,
            handle,
            released: false,
        }
    }

    async fn release(mut self) {
        self.scratch.release(&self.handle).await;
        self.released = true;
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let request_id = self.handle.request_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(request_id = %request_id, "Conversion abandoned, releasing scratch");
                let scratch = Arc::clone(&self.scratch);
                let handle = self.handle.clone();
                runtime.spawn(async move { scratch.release(&handle).await });
            }
            Err(_) => warn!(
                request_id = %request_id,
                "Conversion abandoned outside a runtime, scratch left to the adapter"
            ),
        }
    }
}

/// Interactor for the conversion use case
pub struct ConvertInteractor {
    encoder: Arc<EncoderService>,
    scratch: Arc<dyn ScratchPort>,
    validator: InputValidator,
    timeouts: StageTimeoutPolicy,
    admission: Arc<Semaphore>,
    silent_audio: SilentAudioSpec,
}

impl ConvertInteractor {
    pub fn new(
        encoder: Arc<EncoderService>,
        scratch: Arc<dyn ScratchPort>,
        validator: InputValidator,
        timeouts: StageTimeoutPolicy,
        max_concurrent_conversions: usize,
    ) -> Self {
        Self {
            encoder,
            scratch,
            validator,
            timeouts,
            admission: Arc::new(Semaphore::new(max_concurrent_conversions.max(1))),
            silent_audio: SilentAudioSpec::default(),
        }
    }

    pub fn encoder_service(&self) -> &Arc<EncoderService> {
        &self.encoder
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    /// Run a conversion on a new task
    pub fn spawn(self: &Arc<Self>, request: ConversionRequest) -> ConversionTask {
        let (tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.convert(request, Some(tx), token).await });

        ConversionTask {
            events,
            cancel,
            handle,
        }
    }

    /// Convert an uploaded clip into an App Store preview.
    ///
    /// Emits exactly one terminal event. Scratch storage is released before
    /// this returns, whatever the outcome. Dropping the future mid-flight
    /// schedules the release on the runtime instead.
    pub async fn convert(
        &self,
        request: ConversionRequest,
        progress: Option<UnboundedSender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> PreviewResult<ConversionResult> {
        let emitter = ProgressEmitter::new(progress);
        let result = self.run(&request, &emitter, &cancel).await;

        match &result {
            Ok(output) => {
                info!(
                    bytes = output.output_bytes.len(),
                    filename = %output.suggested_filename,
                    "Conversion complete"
                );
                emitter.emit(Stage::Complete, 100);
            }
            Err(e) => {
                warn!(category = e.category().label(), "Conversion failed: {}", e);
                emitter.emit(Stage::Failed, 0);
            }
        }
        result
    }

    async fn run(
        &self,
        request: &ConversionRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> PreviewResult<ConversionResult> {
        let report = self.validator.validate(&SourceDescriptor::from_request(request));
        if !report.is_valid() {
            return Err(PreviewError::InvalidInput {
                problems: report.errors,
            });
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PreviewError::Cancelled { stage: Stage::Loading }),
            permit = Arc::clone(&self.admission).acquire_owned() => permit.map_err(|_| {
                PreviewError::EncoderUnavailable { reason: "conversion queue is closed".to_string() }
            })?,
        };

        emitter.emit(Stage::Loading, 0);
        let encoder = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PreviewError::Cancelled { stage: Stage::Loading }),
            loaded = self.encoder.ensure_available() => loaded.map_err(|e| {
                PreviewError::EncoderUnavailable { reason: e.to_string() }
            })?,
        };
        emitter.emit(Stage::Loading, 100);

        let request_id = Uuid::new_v4();
        let span = info_span!(
            "conversion",
            request_id = %request_id,
            platform = %request.platform,
            silent_audio = request.add_silent_audio_track
        );

        async {
            let handle = self
                .scratch
                .allocate(request_id)
                .await
                .map_err(|e| PreviewError::Scratch {
                    message: e.to_string(),
                })?;
            let lease = ScratchLease::new(Arc::clone(&self.scratch), handle);

            let outcome = self
                .run_stages(encoder.as_ref(), &lease.handle, request, emitter, cancel)
                .await;
            lease.release().await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        encoder: &dyn EncoderPort,
        handle: &ScratchHandle,
        request: &ConversionRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> PreviewResult<ConversionResult> {
        let profile = request.platform.profile();
        let filter = profile.scale_filter();
        let timeout = self.timeouts.timeout_for(request.size_bytes());

        emitter.emit(Stage::Scaling, 0);
        self.scratch
            .write(&handle.input, &request.source)
            .await
            .map_err(|e| PreviewError::stage_failed(Stage::Scaling, e))?;

        let source_probe = self.diagnose(encoder, &handle.input, cancel).await;
        let duration = request
            .duration_secs
            .or_else(|| source_probe.as_ref().and_then(|p| p.duration_secs));

        for stage in StagePlan::encoder_stages(request.add_silent_audio_track) {
            let (op, input, output) = match stage {
                Stage::Scaling if request.add_silent_audio_track => {
                    (StageOp::ScaleAndStrip(filter), &handle.input, &handle.intermediate)
                }
                Stage::Scaling => (StageOp::ScaleKeepingAudio(filter), &handle.input, &handle.output),
                Stage::AddingAudio => (
                    StageOp::MuxSilentAudio(self.silent_audio.clone()),
                    &handle.intermediate,
                    &handle.output,
                ),
                _ => (
                    StageOp::NormalizeFrameRate(FrameRate::APP_PREVIEW),
                    &handle.output,
                    &handle.finalized,
                ),
            };

            emitter.emit(stage, 0);
            self.run_stage(stage, op, encoder, input, output, duration, timeout, emitter, cancel)
                .await?;
        }

        let output_bytes = self
            .scratch
            .read(&handle.finalized)
            .await
            .map_err(|e| PreviewError::stage_failed(Stage::Finalizing, e))?;
        if output_bytes.is_empty() {
            return Err(PreviewError::StageFailed {
                stage: Stage::Finalizing,
                message: "encoder produced an empty or malformed file".to_string(),
            });
        }

        if let Some(report) = self.diagnose(encoder, &handle.finalized, cancel).await {
            if !report.matches_profile(profile) {
                warn!(
                    expected = %profile.resolution(),
                    actual = %report.summary(),
                    "Output does not match the platform resolution"
                );
            }
            if !report.has_frame_rate(FrameRate::APP_PREVIEW) {
                warn!(actual = %report.summary(), "Output frame rate is not 30 fps");
            }
            if request.add_silent_audio_track && report.audio.is_none() {
                warn!("Output is missing the silent audio track");
            }
        }

        Ok(ConversionResult {
            output_bytes,
            suggested_filename: request.suggested_filename(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stage(
        &self,
        stage: Stage,
        op: StageOp,
        encoder: &dyn EncoderPort,
        input: &ScratchSlot,
        output: &ScratchSlot,
        source_duration_secs: Option<f64>,
        timeout: Duration,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> PreviewResult<()> {
        if cancel.is_cancelled() {
            return Err(PreviewError::Cancelled { stage });
        }

        let stage_cancel = cancel.child_token();
        let sink = emitter.stage_sink(stage);
        let job = EncodeJob {
            input,
            output,
            source_duration_secs,
            progress: &sink,
            cancel: stage_cancel.clone(),
        };

        debug!(stage = %stage, input = %input.name, output = %output.name, "Stage started");
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DomainError::Cancelled),
            finished = tokio::time::timeout(timeout, op.invoke(encoder, &job)) => match finished {
                Ok(result) => result,
                Err(_) => {
                    stage_cancel.cancel();
                    Err(DomainError::TimedOut(format!("{} timed out after {:?}", stage, timeout)))
                }
            },
        };

        if let Err(e) = result {
            stage_cancel.cancel();
            return Err(PreviewError::stage_failed(stage, e));
        }

        info!(stage = %stage, elapsed = ?started.elapsed(), "Stage finished");
        emitter.emit(stage, 100);
        Ok(())
    }

    /// Advisory probe; failures are logged and otherwise ignored
    async fn diagnose(
        &self,
        encoder: &dyn EncoderPort,
        slot: &ScratchSlot,
        cancel: &CancellationToken,
    ) -> Option<ProbeReport> {
        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            probed = encoder.probe(&slot.path) => probed,
        };

        match probed {
            Ok(report) => {
                info!(slot = %slot.name, "Probe: {}", report.summary());
                Some(report)
            }
            Err(e) => {
                warn!(slot = %slot.name, "Probe failed: {}", e);
                None
            }
        }
    }
}
