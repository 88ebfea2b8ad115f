//! CLI module for previewkit
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

/// previewkit - App Store preview converter
///
/// Rescales a 15 to 30 second MP4 clip to the macOS or iOS preview
/// resolution, re-times it to 30 fps and optionally adds a silent audio track.
#[derive(Parser, Debug)]
#[command(name = "previewkit")]
#[command(about = "previewkit - Convert screen recordings into App Store preview videos")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Configuration file (default: previewkit.toml or config/previewkit.toml)
    #[arg(long, env = "PREVIEWKIT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level or filter directives
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Encoder backend (native, libav)
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Path to the ffmpeg executable
    #[arg(long, global = true)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe executable
    #[arg(long, global = true)]
    pub ffprobe_path: Option<PathBuf>,

    /// Deployment environment (development, production)
    #[arg(long, global = true)]
    pub environment: Option<String>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a clip into an App Store preview
    Convert(args::ConvertArgs),
    /// Check that the encoder is installed and runs
    Check,
    /// Probe a clip and compare it with the preview requirements
    Inspect(args::InspectArgs),
    /// List the supported platforms and their resolutions
    Platforms(args::PlatformsArgs),
}
