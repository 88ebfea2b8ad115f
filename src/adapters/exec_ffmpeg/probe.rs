//! ffprobe JSON output mapping

use serde::Deserialize;

use crate::domain::errors::DomainError;
use crate::domain::model::{AudioProbe, ProbeReport};

/// Arguments preceding the probed path
pub const PROBE_ARGS: [&str; 6] = [
    "-v",
    "error",
    "-show_entries",
    "stream=codec_type,codec_name,width,height,r_frame_rate,sample_rate,channels:format=duration",
    "-of",
    "json",
];

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

/// Map ffprobe's JSON document onto a [`ProbeReport`]. The first video and
/// first audio stream are used.
pub fn parse_probe_output(json: &str) -> Result<ProbeReport, DomainError> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| DomainError::ProbeFailed(format!("ffprobe JSON parse error: {}", e)))?;

    let mut report = ProbeReport {
        duration_secs: output
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok()),
        ..ProbeReport::default()
    };

    for stream in output.streams {
        match stream.codec_type.as_deref() {
            Some("video") if report.width.is_none() => {
                report.width = stream.width;
                report.height = stream.height;
                report.frame_rate = stream.r_frame_rate.as_deref().and_then(parse_frame_rate);
            }
            Some("audio") if report.audio.is_none() => {
                report.audio = Some(AudioProbe {
                    codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
                    sample_rate: stream.sample_rate.and_then(|s| s.parse().ok()),
                    channels: stream.channels,
                });
            }
            _ => {}
        }
    }

    Ok(report)
}

/// Parse `num/den` (e.g. `30000/1001`) or a plain number
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => s.trim().parse().ok(),
    }
}
