//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

/// Arguments for the convert command
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Input MP4 file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Target platform (macos, ios)
    #[arg(short, long, default_value = "macos")]
    pub platform: String,

    /// Replace the audio with a silent stereo track
    #[arg(long)]
    pub silent_audio: bool,

    /// Output file path (default: suggested name in the current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the platforms command
#[derive(Args, Debug)]
pub struct PlatformsArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
