//! FFmpeg execution adapter
//!
//! Runs every pipeline stage as an external `ffmpeg` process and probes with
//! `ffprobe`. Progress is read from `-progress pipe:1`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::adapters::toml_config::EncoderConfig;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

pub mod command;
pub mod probe;


use command::ToolCommand;

/// Flags shared by every stage invocation
const COMMON_ARGS: [&str; 9] = [
    "-y",
    "-hide_banner",
    "-nostdin",
    "-loglevel",
    "error",
    "-progress",
    "pipe:1",
    "-nostats",
    "-i",
];

/// FFmpeg-based encoder
#[derive(Debug, Clone)]
pub struct FfmpegAdapter {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    preset: Option<String>,
    probe_timeout: Duration,
}

impl FfmpegAdapter {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            preset: None,
            probe_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_preset(mut self, preset: Option<String>) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    async fn run(&self, job: &EncodeJob<'_>, args: Vec<String>) -> Result<(), DomainError> {
        let mut cmd = ToolCommand::new(&self.ffmpeg_path);
        cmd.args(args);
        info!(
            input = %job.input.name,
            output = %job.output.name,
            "Executing ffmpeg {}",
            cmd.get_args().join(" ")
        );
        cmd.run_with_progress(job.source_duration_secs, job.progress, &job.cancel)
            .await
    }
}

/// `-i {input} -vf {filter} [-preset p] [-an] {output}`
pub fn scale_args(
    input: &Path,
    output: &Path,
    filter: &ScaleFilter,
    preset: Option<&str>,
    strip_audio: bool,
) -> Vec<String> {
    let mut args: Vec<String> = COMMON_ARGS.iter().map(|s| s.to_string()).collect();
    args.push(path_arg(input));
    args.push("-vf".to_string());
    args.push(filter.to_filter_spec());
    if let Some(preset) = preset {
        args.push("-preset".to_string());
        args.push(preset.to_string());
    }
    if strip_audio {
        args.push("-an".to_string());
    }
    args.push(path_arg(output));
    args
}

/// Silent source as input 0, video as input 1; video copied, audio encoded,
/// cut to the shorter stream
pub fn mux_silent_audio_args(input: &Path, output: &Path, audio: &SilentAudioSpec) -> Vec<String> {
    let mut args: Vec<String> = COMMON_ARGS[..COMMON_ARGS.len() - 1]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(
        [
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            audio.lavfi_source(),
            "-i".to_string(),
            path_arg(input),
            "-map".to_string(),
            "1:v:0".to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            audio.codec.to_string(),
            "-b:a".to_string(),
            audio.bitrate_arg(),
            "-ac".to_string(),
            audio.channels.to_string(),
            "-shortest".to_string(),
            path_arg(output),
        ],
    );
    args
}

/// `-i {input} -r {fps} {output}`
pub fn frame_rate_args(input: &Path, output: &Path, rate: FrameRate) -> Vec<String> {
    let mut args: Vec<String> = COMMON_ARGS.iter().map(|s| s.to_string()).collect();
    args.push(path_arg(input));
    args.push("-r".to_string());
    args.push(rate.fps().to_string());
    args.push(path_arg(output));
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[async_trait]
impl EncoderPort for FfmpegAdapter {
    fn backend(&self) -> EncoderBackend {
        EncoderBackend::Native
    }

    async fn version(&self) -> Result<String, DomainError> {
        let mut cmd = ToolCommand::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-version"]).timeout(self.probe_timeout);
        let output = cmd
            .output()
            .await
            .map_err(|e| DomainError::EncoderUnavailable(e.to_string()))?;

        output
            .stdout
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| {
                DomainError::EncoderUnavailable("ffmpeg -version printed nothing".to_string())
            })
    }

    async fn probe(&self, path: &Path) -> Result<ProbeReport, DomainError> {
        let mut cmd = ToolCommand::new(&self.ffprobe_path);
        cmd.args(probe::PROBE_ARGS)
            .arg(path_arg(path))
            .timeout(self.probe_timeout);
        let output = cmd.output().await.map_err(|e| match e {
            DomainError::EncoderUnavailable(_) => e,
            other => DomainError::ProbeFailed(other.to_string()),
        })?;
        probe::parse_probe_output(&output.stdout)
    }

    async fn scale_and_strip_audio(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError> {
        let args = scale_args(
            &job.input.path,
            &job.output.path,
            filter,
            self.preset.as_deref(),
            true,
        );
        self.run(job, args).await
    }

    async fn mux_silent_audio(
        &self,
        job: &EncodeJob<'_>,
        audio: &SilentAudioSpec,
    ) -> Result<(), DomainError> {
        let args = mux_silent_audio_args(&job.input.path, &job.output.path, audio);
        self.run(job, args).await
    }

    async fn scale_with_audio_preserved(
        &self,
        job: &EncodeJob<'_>,
        filter: &ScaleFilter,
    ) -> Result<(), DomainError> {
        let args = scale_args(
            &job.input.path,
            &job.output.path,
            filter,
            self.preset.as_deref(),
            false,
        );
        self.run(job, args).await
    }

    async fn normalize_frame_rate(
        &self,
        job: &EncodeJob<'_>,
        rate: FrameRate,
    ) -> Result<(), DomainError> {
        let args = frame_rate_args(&job.input.path, &job.output.path, rate);
        self.run(job, args).await
    }
}

/// Locates ffmpeg and ffprobe and builds an [`FfmpegAdapter`]
#[derive(Debug, Clone, Default)]
pub struct FfmpegLoader {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub preset: Option<String>,
    pub probe_timeout: Option<Duration>,
}

impl FfmpegLoader {
    pub fn from_config(config: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            preset: config.preset.clone(),
            probe_timeout: Some(config.probe_timeout()),
        }
    }

    fn resolve(configured: Option<&PathBuf>, tool: &str) -> Result<PathBuf, DomainError> {
        match configured {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(DomainError::EncoderUnavailable(format!(
                "{} not found at {}",
                tool,
                path.display()
            ))),
            None => which::which(tool).map_err(|e| {
                DomainError::EncoderUnavailable(format!("{} not found on PATH: {}", tool, e))
            }),
        }
    }
}

#[async_trait]
impl EncoderLoader for FfmpegLoader {
    async fn load(&self) -> Result<Arc<dyn EncoderPort>, DomainError> {
        let ffmpeg = Self::resolve(self.ffmpeg_path.as_ref(), "ffmpeg")?;
        let ffprobe = match &self.ffprobe_path {
            Some(_) => Self::resolve(self.ffprobe_path.as_ref(), "ffprobe")?,
            // Not configured: PATH, then next to ffmpeg. A missing ffprobe
            // surfaces as unavailable on the first probe.
            None => Self::resolve(None, "ffprobe").unwrap_or_else(|e| {
                let sibling = ffmpeg.with_file_name("ffprobe");
                if !sibling.is_file() {
                    warn!("{}; probes will fail", e);
                }
                sibling
            }),
        };

        debug!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Resolved encoder tools");

        let mut adapter = FfmpegAdapter::new(ffmpeg, ffprobe).with_preset(self.preset.clone());
        if let Some(timeout) = self.probe_timeout {
            adapter = adapter.with_probe_timeout(timeout);
        }
        Ok(Arc::new(adapter))
    }
}
