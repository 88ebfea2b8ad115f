// Adapters - External system implementations

pub mod exec_ffmpeg;
#[cfg(feature = "libav")]
pub mod exec_libav;
pub mod fs_scratch;
pub mod toml_config;
pub mod tracing_log;

// Re-export adapters
pub use exec_ffmpeg::{FfmpegAdapter, FfmpegLoader};
#[cfg(feature = "libav")]
pub use exec_libav::{LibavAdapter, LibavLoader};
pub use fs_scratch::FsScratchAdapter;
pub use toml_config::{ServiceConfig, TomlConfigAdapter};
pub use tracing_log::TracingLogAdapter;
