// Domain models - Core types and data structures

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;


/// Apple submission surface a preview is produced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    #[serde(rename = "macOS")]
    MacOs,
    #[serde(rename = "iOS")]
    Ios,
}

impl Platform {
    /// Every supported platform, default first
    pub const ALL: [Platform; 2] = [Platform::MacOs, Platform::Ios];

    /// Canonical name, as used in output filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::MacOs => "macOS",
            Platform::Ios => "iOS",
        }
    }

    /// Parse platform from user input (case-insensitive)
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "macos" | "mac" | "osx" => Ok(Platform::MacOs),
            "ios" | "iphone" => Ok(Platform::Ios),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid platform: {}. Valid platforms: macOS, iOS",
                value
            ))),
        }
    }

    /// Output profile for this platform
    pub fn profile(&self) -> &'static PlatformProfile {
        match self {
            Platform::MacOs => &PLATFORM_PROFILES[0],
            Platform::Ios => &PLATFORM_PROFILES[1],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::parse(s)
    }
}

/// Required output geometry for one platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub target_width: u32,
    pub target_height: u32,
}

/// Platform → resolution table. Must stay in sync with the upload validator.
pub static PLATFORM_PROFILES: [PlatformProfile; 2] = [
    PlatformProfile {
        platform: Platform::MacOs,
        target_width: 1920,
        target_height: 1080,
    },
    PlatformProfile {
        platform: Platform::Ios,
        target_width: 886,
        target_height: 1920,
    },
];

impl PlatformProfile {
    /// Resolution as `W:H`
    pub fn resolution(&self) -> String {
        format!("{}:{}", self.target_width, self.target_height)
    }

    /// Resize filter producing this profile's geometry
    pub fn scale_filter(&self) -> ScaleFilter {
        ScaleFilter {
            width: self.target_width,
            height: self.target_height,
        }
    }
}

/// Lanczos resize followed by a forced 1:1 sample aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFilter {
    pub width: u32,
    pub height: u32,
}

impl ScaleFilter {
    /// Filter graph description understood by the encoder
    pub fn to_filter_spec(&self) -> String {
        format!(
            "scale={}:{}:flags=lanczos,setsar=1",
            self.width, self.height
        )
    }
}

impl fmt::Display for ScaleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filter_spec())
    }
}

/// Output frame rate in whole frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate(pub u32);

impl FrameRate {
    /// App Store ingestion requires exactly 30 fps
    pub const APP_PREVIEW: FrameRate = FrameRate(30);

    pub fn fps(&self) -> u32 {
        self.0
    }
}

/// Synthetic silent track added for platforms that reject video-only files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilentAudioSpec {
    pub channel_layout: &'static str,
    pub channels: u16,
    pub sample_rate: u32,
    pub codec: &'static str,
    pub bitrate_kbps: u32,
}

impl Default for SilentAudioSpec {
    fn default() -> Self {
        Self {
            channel_layout: "stereo",
            channels: 2,
            sample_rate: 48_000,
            codec: "aac",
            bitrate_kbps: 128,
        }
    }
}

impl SilentAudioSpec {
    /// `anullsrc` source description for the lavfi input device
    pub fn lavfi_source(&self) -> String {
        format!(
            "anullsrc=channel_layout={}:sample_rate={}",
            self.channel_layout, self.sample_rate
        )
    }

    /// Bitrate argument, e.g. `128k`
    pub fn bitrate_arg(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }
}

/// Which encoder implementation backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    /// External ffmpeg/ffprobe processes
    #[default]
    Native,
    /// libav linked into this process
    Libav,
}

impl EncoderBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderBackend::Native => "native",
            EncoderBackend::Libav => "libav",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "native" | "process" | "ffmpeg" => Ok(EncoderBackend::Native),
            "libav" | "in-process" | "inprocess" => Ok(EncoderBackend::Libav),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid encoder backend: {}. Valid backends: native, libav",
                value
            ))),
        }
    }
}

impl fmt::Display for EncoderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment; controls how much error detail reaches callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(DomainError::BadArgs(format!(
                "Invalid environment: {}. Valid environments: development, production",
                value
            ))),
        }
    }
}

/// A single conversion request. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Uploaded MP4 bytes
    pub source: Vec<u8>,
    /// Name the file was uploaded under
    pub file_name: String,
    pub platform: Platform,
    pub add_silent_audio_track: bool,
    /// Duration measured by the caller, when known
    pub duration_secs: Option<f64>,
}

impl ConversionRequest {
    pub fn new(
        source: Vec<u8>,
        file_name: impl Into<String>,
        platform: Platform,
        add_silent_audio_track: bool,
    ) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            platform,
            add_silent_audio_track,
            duration_secs: None,
        }
    }

    /// Attach a measured duration so it can be validated
    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.source.len() as u64
    }

    pub fn suggested_filename(&self) -> String {
        suggested_filename(self.platform, self.add_silent_audio_track)
    }
}

/// `{platform}_Preview[_with_silent_audio].mp4`
pub fn suggested_filename(platform: Platform, add_silent_audio_track: bool) -> String {
    format!(
        "{}_Preview{}.mp4",
        platform.as_str(),
        if add_silent_audio_track {
            "_with_silent_audio"
        } else {
            ""
        }
    )
}

/// Finished preview handed back to the caller
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub output_bytes: Vec<u8>,
    pub suggested_filename: String,
}

/// Pipeline stage, ordered as the pipeline advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Loading,
    Scaling,
    AddingAudio,
    Finalizing,
    Complete,
    Failed,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Scaling => "scaling",
            Stage::AddingAudio => "addingAudio",
            Stage::Finalizing => "finalizing",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stage-relative progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0..=100, relative to the current stage
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
        }
    }
}

/// One uniquely named scratch location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchSlot {
    pub name: String,
    pub path: PathBuf,
}

/// All scratch slots belonging to one conversion request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchHandle {
    pub request_id: Uuid,
    pub input: ScratchSlot,
    /// Scaled, audio-stripped video; only written when silent audio is requested
    pub intermediate: ScratchSlot,
    /// Pre frame-rate-normalization output
    pub output: ScratchSlot,
    pub finalized: ScratchSlot,
}

impl ScratchHandle {
    /// Slot names for a request id
    pub fn slot_names(request_id: &Uuid) -> [String; 4] {
        [
            format!("input-{}.mp4", request_id),
            format!("temp-{}.mp4", request_id),
            format!("output-{}.mp4", request_id),
            format!("final-{}.mp4", request_id),
        ]
    }

    /// Build a handle whose slots live under `dir`
    pub fn in_directory(request_id: Uuid, dir: &std::path::Path) -> Self {
        let [input, intermediate, output, finalized] = Self::slot_names(&request_id);
        let slot = |name: String| ScratchSlot {
            path: dir.join(&name),
            name,
        };
        Self {
            request_id,
            input: slot(input),
            intermediate: slot(intermediate),
            output: slot(output),
            finalized: slot(finalized),
        }
    }

    pub fn slots(&self) -> [&ScratchSlot; 4] {
        [&self.input, &self.intermediate, &self.output, &self.finalized]
    }
}

/// Audio stream properties reported by a probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioProbe {
    pub codec: String,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Diagnostic stream information. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeReport {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub duration_secs: Option<f64>,
    pub audio: Option<AudioProbe>,
}

impl ProbeReport {
    /// True when the reported geometry equals the profile's
    pub fn matches_profile(&self, profile: &PlatformProfile) -> bool {
        self.width == Some(profile.target_width) && self.height == Some(profile.target_height)
    }

    /// True when the reported frame rate is within rounding of `rate`
    pub fn has_frame_rate(&self, rate: FrameRate) -> bool {
        self.frame_rate
            .map(|fps| (fps - rate.fps() as f64).abs() < 0.01)
            .unwrap_or(false)
    }

    /// `WxH @ fps` summary for logs
    pub fn summary(&self) -> String {
        let dims = match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "unknown size".to_string(),
        };
        let fps = self
            .frame_rate
            .map(|f| format!("{:.2} fps", f))
            .unwrap_or_else(|| "unknown fps".to_string());
        let audio = match &self.audio {
            Some(a) => format!(
                "audio {} {} Hz {} ch",
                a.codec,
                a.sample_rate.unwrap_or(0),
                a.channels.unwrap_or(0)
            ),
            None => "no audio".to_string(),
        };
        format!("{} @ {}, {}", dims, fps, audio)
    }
}
