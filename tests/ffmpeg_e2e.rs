//! Full conversions through a real `ffmpeg`; skipped when none is installed

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio_util::sync::CancellationToken;

use previewkit::adapters::toml_config::ServiceConfig;
use previewkit::adapters::FfmpegLoader;
use previewkit::app::{AppContainer, DefaultAppContainer};
use previewkit::domain::model::*;
use previewkit::ports::{EncoderLoader, EncoderPort};

fn encoder_tools() -> Option<(PathBuf, PathBuf)> {
    let ffmpeg = which::which("ffmpeg").ok()?;
    let ffprobe = which::which("ffprobe").ok()?;
    Some((ffmpeg, ffprobe))
}

/// Short synthetic clip: 1280x720 test pattern at 24 fps with a tone
fn make_clip(ffmpeg: &Path, path: &Path, seconds: u32) {
    let status = Command::new(ffmpeg)
        .args(["-y", "-hide_banner", "-loglevel", "error"])
        .args(["-f", "lavfi", "-i", &format!("testsrc=size=1280x720:rate=24:duration={}", seconds)])
        .args(["-f", "lavfi", "-i", &format!("sine=frequency=440:sample_rate=44100:duration={}", seconds)])
        .args(["-c:a", "aac", "-shortest"])
        .arg(path)
        .status()
        .unwrap();
    assert!(status.success());
}

fn config(dir: &Path, ffmpeg: PathBuf, ffprobe: PathBuf) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.encoder.ffmpeg_path = Some(ffmpeg);
    config.encoder.ffprobe_path = Some(ffprobe);
    config.encoder.preset = Some("ultrafast".to_string());
    config.pipeline.scratch_dir = Some(dir.join("scratch"));
    config
}

async fn convert_and_probe(platform: Platform, silent_audio: bool) -> Option<ProbeReport> {
    let (ffmpeg, ffprobe) = encoder_tools()?;
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("clip.mp4");
    make_clip(&ffmpeg, &clip, 16);

    let config = config(dir.path(), ffmpeg, ffprobe);
    let container = DefaultAppContainer::from_config(&config).unwrap();
    assert!(container.encoder_service().check_encoder_available().await);

    let request = ConversionRequest::new(std::fs::read(&clip).unwrap(), "clip.mp4", platform, silent_audio)
        .with_duration(16.0);
    let result = container
        .convert_interactor()
        .convert(request, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.suggested_filename, suggested_filename(platform, silent_audio));

    let output = dir.path().join(&result.suggested_filename);
    std::fs::write(&output, &result.output_bytes).unwrap();

    let encoder = FfmpegLoader::from_config(&config.encoder).load().await.unwrap();
    let report = encoder.probe(&output).await.unwrap();

    // Nothing left in the scratch root
    let leftovers = std::fs::read_dir(dir.path().join("scratch")).unwrap().count();
    assert_eq!(leftovers, 0);
    Some(report)
}

#[tokio::test]
async fn test_macos_preview_with_silent_audio() {
    let Some(report) = convert_and_probe(Platform::MacOs, true).await else {
        eprintln!("ffmpeg not installed, skipping");
        return;
    };

    assert_eq!((report.width, report.height), (Some(1920), Some(1080)));
    assert!(report.has_frame_rate(FrameRate::APP_PREVIEW), "{}", report.summary());
    let audio = report.audio.expect("silent track");
    assert_eq!(audio.codec, "aac");
    assert_eq!(audio.sample_rate, Some(48_000));
    assert_eq!(audio.channels, Some(2));
}

#[tokio::test]
async fn test_ios_preview_keeps_source_audio() {
    let Some(report) = convert_and_probe(Platform::Ios, false).await else {
        eprintln!("ffmpeg not installed, skipping");
        return;
    };

    assert_eq!((report.width, report.height), (Some(886), Some(1920)));
    assert!(report.has_frame_rate(FrameRate::APP_PREVIEW), "{}", report.summary());
    let audio = report.audio.expect("source audio");
    assert_eq!(audio.sample_rate, Some(44_100));
}
