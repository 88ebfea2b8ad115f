//! Conversion pipeline tests against a scripted encoder
//!
//! The encoder copies its input slot to its output slot and appends a marker
//! per operation, so the final bytes record which operations ran and in what
//! order. Scratch calls are counted to check allocate/release balance.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use previewkit::adapters::fs_scratch::FsScratchAdapter;
use previewkit::adapters::toml_config::ServiceConfig;
use previewkit::app::{AppContainer, ConvertInteractor, DefaultAppContainer, EncoderStatus};
use previewkit::domain::errors::DomainError;
use previewkit::domain::model::*;
use previewkit::error::{ErrorCategory, PreviewError};
use previewkit::ports::*;

const MIB: usize = 1024 * 1024;

/// What the encoder was asked to do
#[derive(Debug, Clone, PartialEq)]
enum Call {
    ScaleAndStrip { input: String, output: String, filter: ScaleFilter },
    Mux { input: String, output: String, audio: SilentAudioSpec },
    ScaleKeepingAudio { input: String, output: String, filter: ScaleFilter },
    Normalize { input: String, output: String, rate: FrameRate },
}

#[derive(Default)]
struct ScriptedEncoder {
    calls: Mutex<Vec<Call>>,
    probes: AtomicUsize,
    fail_version: bool,
    fail_probe: bool,
    /// Probe tool is missing from the host
    probe_tool_missing: bool,
    /// Operation marker that fails instead of writing output
    fail_on: Option<&'static str>,
    /// Operation marker that hangs until cancelled
    hang_on: Option<&'static str>,
    /// Operation marker that writes nothing and succeeds
    empty_on: Option<&'static str>,
}

impl ScriptedEncoder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    async fn apply(&self, marker: &'static str, job: &EncodeJob<'_>, call: Call) -> Result<(), DomainError> {
        self.calls.lock().unwrap().push(call);

        if self.hang_on == Some(marker) {
            job.cancel.cancelled().await;
            return Err(DomainError::Cancelled);
        }
        if self.fail_on == Some(marker) {
            // Leave a partial file behind like a crashed encoder would
            tokio::fs::write(&job.output.path, b"partial").await.unwrap();
            return Err(DomainError::ProcessingError(
                "Invalid data found when processing input".to_string(),
            ));
        }
        if self.empty_on == Some(marker) {
            tokio::fs::write(&job.output.path, b"").await.unwrap();
            return Ok(());
        }

        let mut bytes = tokio::fs::read(&job.input.path)
            .await
            .map_err(|e| DomainError::FsFail(e.to_string()))?;
        job.progress.report(0.5);
        bytes.extend_from_slice(format!("|{}", marker).as_bytes());
        tokio::fs::write(&job.output.path, bytes)
            .await
            .map_err(|e| DomainError::FsFail(e.to_string()))?;
        job.progress.report(1.0);
        Ok(())
    }
}

#[async_trait]
impl EncoderPort for ScriptedEncoder {
    fn backend(&self) -> EncoderBackend {
        EncoderBackend::Native
    }

    async fn version(&self) -> Result<String, DomainError> {
        if self.fail_version {
            Err(DomainError::ProcessingError("exit status 127".to_string()))
        } else {
            Ok("ffmpeg version 6.1-scripted".to_string())
        }
    }

    async fn probe(&self, _path: &Path) -> Result<ProbeReport, DomainError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_tool_missing {
            return Err(DomainError::EncoderUnavailable(
                "ffprobe: failed to spawn: No such file or directory".to_string(),
            ));
        }
        if self.fail_probe {
            return Err(DomainError::ProbeFailed("moov atom not found".to_string()));
        }
        Ok(ProbeReport {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(60.0),
            duration_secs: Some(20.0),
            audio: None,
        })
    }

    async fn scale_and_strip_audio(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError> {
        let call = Call::ScaleAndStrip {
            input: job.input.name.clone(),
            output: job.output.name.clone(),
            filter: *filter,
        };
        self.apply("scale-an", job, call).await
    }

    async fn mux_silent_audio(
        &self,
        job: &EncodeJob<'_>,
        audio: &SilentAudioSpec,
    ) -> Result<(), DomainError> {
        let call = Call::Mux {
            input: job.input.name.clone(),
            output: job.output.name.clone(),
            audio: audio.clone(),
        };
        self.apply("mux", job, call).await
    }

    async fn scale_with_audio_preserved(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError> {
        let call = Call::ScaleKeepingAudio {
            input: job.input.name.clone(),
            output: job.output.name.clone(),
            filter: *filter,
        };
        self.apply("scale", job, call).await
    }

    async fn normalize_frame_rate(
        &self,
        job: &EncodeJob<'_>,
        rate: FrameRate,
    ) -> Result<(), DomainError> {
        let call = Call::Normalize {
            input: job.input.name.clone(),
            output: job.output.name.clone(),
            rate,
        };
        self.apply("fps", job, call).await
    }
}

struct ScriptedLoader {
    encoder: Arc<ScriptedEncoder>,
    loads: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl EncoderLoader for ScriptedLoader {
    async fn load(&self) -> Result<Arc<dyn EncoderPort>, DomainError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DomainError::EncoderUnavailable("ffmpeg not found on PATH".to_string()));
        }
        Ok(self.encoder.clone() as Arc<dyn EncoderPort>)
    }
}

/// Filesystem scratch that counts calls and remembers every handle
struct RecordingScratch {
    inner: FsScratchAdapter,
    allocated: AtomicUsize,
    released: AtomicUsize,
    handles: Mutex<Vec<ScratchHandle>>,
}

#[async_trait]
impl ScratchPort for RecordingScratch {
    async fn allocate(&self, request_id: Uuid) -> Result<ScratchHandle, DomainError> {
        let handle = self.inner.allocate(request_id).await?;
        self.allocated.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn write(&self, slot: &ScratchSlot, bytes: &[u8]) -> Result<(), DomainError> {
        self.inner.write(slot, bytes).await
    }

    async fn read(&self, slot: &ScratchSlot) -> Result<Vec<u8>, DomainError> {
        self.inner.read(slot).await
    }

    async fn release(&self, handle: &ScratchHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release(handle).await
    }
}

struct Harness {
    interactor: Arc<ConvertInteractor>,
    container: DefaultAppContainer,
    encoder: Arc<ScriptedEncoder>,
    loader: Arc<ScriptedLoader>,
    scratch: Arc<RecordingScratch>,
    _root: tempfile::TempDir,
}

impl Harness {
    fn new(encoder: ScriptedEncoder) -> Self {
        Self::build(encoder, false, ServiceConfig::default())
    }

    fn build(encoder: ScriptedEncoder, fail_load: bool, config: ServiceConfig) -> Self {
        let root = tempfile::tempdir().unwrap();
        let encoder = Arc::new(encoder);
        let loader = Arc::new(ScriptedLoader {
            encoder: encoder.clone(),
            loads: AtomicUsize::new(0),
            fail: fail_load,
        });
        let scratch = Arc::new(RecordingScratch {
            inner: FsScratchAdapter::new(root.path()).unwrap(),
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        });

        let container = DefaultAppContainer::with_ports(&config, loader.clone(), scratch.clone());
        Self {
            interactor: container.convert_interactor(),
            container,
            encoder,
            loader,
            scratch,
            _root: root,
        }
    }

    async fn wait_for_encoder_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.encoder.calls().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Wait for background releases scheduled by abandoned conversions
    async fn wait_for_release(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.scratch.released.load(Ordering::SeqCst)
                < self.scratch.allocated.load(Ordering::SeqCst)
                || self.scratch.inner.live_count() > 0
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn assert_scratch_balanced(&self) {
        assert_eq!(
            self.scratch.allocated.load(Ordering::SeqCst),
            self.scratch.released.load(Ordering::SeqCst)
        );
        assert_eq!(self.scratch.inner.live_count(), 0);
        for handle in self.scratch.handles.lock().unwrap().iter() {
            for slot in handle.slots() {
                assert!(!slot.path.exists(), "{} left behind", slot.name);
            }
        }
    }
}

fn request(platform: Platform, silent_audio: bool) -> ConversionRequest {
    ConversionRequest::new(b"source".to_vec(), "recording.mp4", platform, silent_audio)
        .with_duration(20.0)
}

async fn convert_collecting(
    interactor: &ConvertInteractor,
    request: ConversionRequest,
) -> (Result<ConversionResult, PreviewError>, Vec<ProgressEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = interactor
        .convert(request, Some(tx), CancellationToken::new())
        .await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

fn assert_well_ordered(events: &[ProgressEvent]) {
    let terminal = events.iter().filter(|e| e.stage.is_terminal()).count();
    assert_eq!(terminal, 1, "{:?}", events);
    assert!(events.last().unwrap().stage.is_terminal(), "{:?}", events);

    for pair in events.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(
            b.stage > a.stage || (b.stage == a.stage && b.percent > a.percent),
            "{:?} followed by {:?}",
            a,
            b
        );
    }
}

// Scenario A
#[tokio::test]
async fn test_macos_with_silent_audio() {
    let harness = Harness::new(ScriptedEncoder::default());

    let (result, events) =
        convert_collecting(&harness.interactor, request(Platform::MacOs, true)).await;
    let result = result.unwrap();

    assert_eq!(result.output_bytes, b"source|scale-an|mux|fps");
    assert_eq!(result.suggested_filename, "macOS_Preview_with_silent_audio.mp4");

    let calls = harness.encoder.calls();
    assert_eq!(calls.len(), 3);
    match &calls[0] {
        Call::ScaleAndStrip { input, output, filter } => {
            assert!(input.starts_with("input-"));
            assert!(output.starts_with("temp-"));
            assert_eq!(filter.to_filter_spec(), "scale=1920:1080:flags=lanczos,setsar=1");
        }
        other => panic!("unexpected first call: {:?}", other),
    }
    match &calls[1] {
        Call::Mux { input, output, audio } => {
            assert!(input.starts_with("temp-"));
            assert!(output.starts_with("output-"));
            assert_eq!(audio.channels, 2);
            assert_eq!(audio.sample_rate, 48_000);
            assert_eq!(audio.codec, "aac");
            assert_eq!(audio.bitrate_kbps, 128);
        }
        other => panic!("unexpected second call: {:?}", other),
    }
    match &calls[2] {
        Call::Normalize { input, output, rate } => {
            assert!(input.starts_with("output-"));
            assert!(output.starts_with("final-"));
            assert_eq!(*rate, FrameRate(30));
        }
        other => panic!("unexpected third call: {:?}", other),
    }

    let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
    assert!(stages.contains(&Stage::AddingAudio));
    assert_eq!(events.last(), Some(&ProgressEvent::new(Stage::Complete, 100)));
    assert_well_ordered(&events);
    harness.assert_scratch_balanced();
}

// Scenario B
#[tokio::test]
async fn test_ios_keeping_audio() {
    let harness = Harness::new(ScriptedEncoder::default());
    let request = ConversionRequest::new(b"source".to_vec(), "recording.MP4", Platform::Ios, false)
        .with_duration(18.0);

    let (result, events) = convert_collecting(&harness.interactor, request).await;
    let result = result.unwrap();

    assert_eq!(result.output_bytes, b"source|scale|fps");
    assert_eq!(result.suggested_filename, "iOS_Preview.mp4");

    let calls = harness.encoder.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(
        &calls[0],
        Call::ScaleKeepingAudio { filter, .. } if filter.width == 886 && filter.height == 1920
    ));
    assert!(matches!(&calls[1], Call::Normalize { rate: FrameRate(30), .. }));
    assert!(!events.iter().any(|e| e.stage == Stage::AddingAudio));
    assert_well_ordered(&events);
    harness.assert_scratch_balanced();
}

// Scenario C
#[tokio::test]
async fn test_mov_rejected_before_the_pipeline() {
    let harness = Harness::new(ScriptedEncoder::default());
    let request = ConversionRequest::new(b"source".to_vec(), "clip.mov", Platform::MacOs, false);

    let (result, events) = convert_collecting(&harness.interactor, request).await;
    let err = result.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::InvalidInput);
    assert!(err.to_string().contains(".mp4"), "{}", err);
    assert_eq!(events, vec![ProgressEvent::new(Stage::Failed, 0)]);
    assert_eq!(harness.loader.loads.load(Ordering::SeqCst), 0);
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 0);
}

// Scenario D, with the cap lowered so the test does not need 600 MiB
#[tokio::test]
async fn test_oversized_upload_rejected_before_allocation() {
    let mut config = ServiceConfig::default();
    config.limits.max_file_size_mib = 1;
    let harness = Harness::build(ScriptedEncoder::default(), false, config);
    let request = ConversionRequest::new(vec![0u8; 2 * MIB], "big.mp4", Platform::MacOs, true);

    let (result, _events) = convert_collecting(&harness.interactor, request).await;
    let err = result.unwrap_err();

    match &err {
        PreviewError::InvalidInput { problems } => {
            assert_eq!(problems.len(), 1);
            assert!(problems[0].contains("the maximum is 1 MiB"), "{}", problems[0]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.category().http_status(), 400);
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 0);
    assert!(harness.encoder.calls().is_empty());
}

#[tokio::test]
async fn test_duration_outside_bounds_is_rejected() {
    let harness = Harness::new(ScriptedEncoder::default());

    let short = ConversionRequest::new(b"x".to_vec(), "a.mp4", Platform::MacOs, false).with_duration(9.5);
    let long = ConversionRequest::new(b"x".to_vec(), "a.mp4", Platform::MacOs, false).with_duration(31.0);

    let err = harness.interactor.convert(short, None, CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("at least 15 seconds"), "{}", err);
    let err = harness.interactor.convert(long, None, CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("exceed 30 seconds"), "{}", err);
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 0);
}

// Scenario E
#[tokio::test]
async fn test_version_probe_failure_is_a_precondition_error() {
    let harness = Harness::new(ScriptedEncoder {
        fail_version: true,
        ..ScriptedEncoder::default()
    });

    let (result, events) =
        convert_collecting(&harness.interactor, request(Platform::MacOs, true)).await;
    let err = result.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::EncoderUnavailable);
    assert_eq!(err.category().http_status(), 503);
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 0);
    assert!(harness.encoder.calls().is_empty());
    assert_eq!(events.last().map(|e| e.stage), Some(Stage::Failed));
    assert_well_ordered(&events);
    assert!(!harness.container.encoder_service().check_encoder_available().await);
}

#[tokio::test]
async fn test_load_failure_is_retried_on_next_request() {
    let harness = Harness::build(ScriptedEncoder::default(), true, ServiceConfig::default());

    for _ in 0..2 {
        let err = harness
            .interactor
            .convert(request(Platform::MacOs, false), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::EncoderUnavailable { .. }));
    }

    assert_eq!(harness.loader.loads.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.container.encoder_service().status(),
        EncoderStatus::Uninitialized
    );
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 0);
}

// Scenario F
#[tokio::test]
async fn test_scaling_failure_releases_scratch() {
    let harness = Harness::new(ScriptedEncoder {
        fail_on: Some("scale-an"),
        ..ScriptedEncoder::default()
    });

    let (result, events) =
        convert_collecting(&harness.interactor, request(Platform::MacOs, true)).await;
    let err = result.unwrap_err();

    match &err {
        PreviewError::StageFailed { stage, message } => {
            assert_eq!(*stage, Stage::Scaling);
            assert!(message.contains("Invalid data found"), "{}", message);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.category().http_status(), 500);
    assert_eq!(harness.encoder.calls().len(), 1);
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 1);
    assert_eq!(events.last(), Some(&ProgressEvent::new(Stage::Failed, 0)));
    assert_well_ordered(&events);
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_mux_failure_never_reaches_finalizing() {
    let harness = Harness::new(ScriptedEncoder {
        fail_on: Some("mux"),
        ..ScriptedEncoder::default()
    });

    let err = harness
        .interactor
        .convert(request(Platform::Ios, true), None, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::AddingAudio));
    assert_eq!(harness.encoder.calls().len(), 2);
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_frame_rate_failure_is_a_stage_error() {
    let harness = Harness::new(ScriptedEncoder {
        fail_on: Some("fps"),
        ..ScriptedEncoder::default()
    });

    let err = harness
        .interactor
        .convert(request(Platform::MacOs, false), None, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Finalizing));
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_empty_final_output_is_rejected() {
    let harness = Harness::new(ScriptedEncoder {
        empty_on: Some("fps"),
        ..ScriptedEncoder::default()
    });

    let err = harness
        .interactor
        .convert(request(Platform::MacOs, false), None, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Finalizing));
    assert!(err.to_string().contains("empty"), "{}", err);
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_probe_failures_are_advisory() {
    let harness = Harness::new(ScriptedEncoder {
        fail_probe: true,
        ..ScriptedEncoder::default()
    });

    let result = harness
        .interactor
        .convert(request(Platform::MacOs, true), None, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.output_bytes, b"source|scale-an|mux|fps");
    // One probe of the input, one of the finalized output
    assert_eq!(harness.encoder.probes.load(Ordering::SeqCst), 2);
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_duration_probe_without_probe_tool_is_unavailable() {
    let harness = Harness::new(ScriptedEncoder {
        probe_tool_missing: true,
        ..ScriptedEncoder::default()
    });
    let clip = harness._root.path().join("clip.mp4");
    std::fs::write(&clip, b"source").unwrap();

    let err = harness
        .container
        .inspect_interactor()
        .measure_duration(&clip)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::EncoderUnavailable);
    assert_eq!(err.category().exit_code(), 69);
    assert_eq!(harness.container.encoder_service().status(), EncoderStatus::Uninitialized);
}

#[tokio::test]
async fn test_unreadable_clip_is_invalid_input() {
    let harness = Harness::new(ScriptedEncoder {
        fail_probe: true,
        ..ScriptedEncoder::default()
    });
    let clip = harness._root.path().join("clip.mp4");
    std::fs::write(&clip, b"not a movie").unwrap();

    let err = harness
        .container
        .inspect_interactor()
        .measure_duration(&clip)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PreviewError::InvalidInput {
            problems: vec!["Unable to verify video duration".to_string()]
        }
    );
}

#[tokio::test]
async fn test_cancellation_mid_stage() {
    let harness = Harness::new(ScriptedEncoder {
        hang_on: Some("mux"),
        ..ScriptedEncoder::default()
    });

    let mut task = harness.interactor.spawn(request(Platform::MacOs, true));
    let mut events = Vec::new();
    while let Some(event) = task.events.recv().await {
        events.push(event);
        if event.stage == Stage::AddingAudio {
            task.cancel.cancel();
        }
    }
    let err = tokio::time::timeout(Duration::from_secs(5), task.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();

    assert_eq!(err, PreviewError::Cancelled { stage: Stage::AddingAudio });
    assert_eq!(err.category().exit_code(), 130);
    assert_eq!(events.last(), Some(&ProgressEvent::new(Stage::Failed, 0)));
    assert_well_ordered(&events);
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_aborted_task_releases_scratch() {
    let harness = Harness::new(ScriptedEncoder {
        hang_on: Some("scale"),
        ..ScriptedEncoder::default()
    });

    let mut task = harness.interactor.spawn(request(Platform::Ios, false));
    while let Some(event) = task.events.recv().await {
        if event.stage == Stage::Scaling {
            break;
        }
    }
    harness.wait_for_encoder_calls(1).await;

    task.handle.abort();
    assert!(task.handle.await.unwrap_err().is_cancelled());

    harness.wait_for_release().await;
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_dropped_conversion_releases_scratch() {
    let harness = Harness::new(ScriptedEncoder {
        hang_on: Some("scale"),
        ..ScriptedEncoder::default()
    });

    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        harness.interactor.convert(
            request(Platform::MacOs, false),
            None,
            CancellationToken::new(),
        ),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 1);

    harness.wait_for_release().await;
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let harness = Harness::new(ScriptedEncoder::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .interactor
        .convert(request(Platform::MacOs, false), None, cancel)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Cancelled);
    assert!(harness.encoder.calls().is_empty());
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_admission_is_bounded() {
    let mut config = ServiceConfig::default();
    config.pipeline.max_concurrent_conversions = 1;
    let harness = Harness::build(
        ScriptedEncoder {
            hang_on: Some("scale"),
            ..ScriptedEncoder::default()
        },
        false,
        config,
    );

    let first = harness.interactor.spawn(request(Platform::MacOs, false));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = harness.interactor.spawn(request(Platform::Ios, false));

    // The first conversion holds the only permit while its scale stage hangs
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.encoder.calls().len(), 1);
    assert_eq!(harness.scratch.allocated.load(Ordering::SeqCst), 1);

    first.cancel.cancel();
    assert!(first.handle.await.unwrap().is_err());

    // Now the second one is admitted and hangs in its own scale stage
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.encoder.calls().len(), 2);

    second.cancel.cancel();
    assert!(second.handle.await.unwrap().is_err());
    harness.assert_scratch_balanced();
}

#[tokio::test]
async fn test_concurrent_requests_use_distinct_slots() {
    let harness = Harness::new(ScriptedEncoder::default());

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let platform = if i % 2 == 0 { Platform::MacOs } else { Platform::Ios };
            harness.interactor.spawn(request(platform, i % 2 == 0))
        })
        .collect();
    for task in tasks {
        assert!(task.handle.await.unwrap().is_ok());
    }

    let handles = harness.scratch.handles.lock().unwrap().clone();
    let mut names: Vec<String> = handles
        .iter()
        .flat_map(|h| h.slots().into_iter().map(|s| s.name.clone()))
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 16);
    assert_eq!(harness.loader.loads.load(Ordering::SeqCst), 1);
    harness.assert_scratch_balanced();
}

#[test]
fn test_public_messages_hide_detail_in_production() {
    let err = PreviewError::StageFailed {
        stage: Stage::Scaling,
        message: "/tmp/previewkit-1/input.mp4: Invalid data".to_string(),
    };
    assert!(err.public_message(Environment::Development).contains("/tmp/previewkit-1"));
    assert_eq!(
        err.public_message(Environment::Production),
        "An error occurred during conversion"
    );
}
