//! Command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::app::{AppContainer, InspectRequest};
use crate::cli::args::{ConvertArgs, InspectArgs, PlatformsArgs};
use crate::domain::model::{ConversionRequest, Platform, ProgressEvent, PLATFORM_PROFILES};
use crate::domain::rules::SourceDescriptor;
use crate::error::PreviewError;

/// Execute the convert command
pub async fn convert(container: &dyn AppContainer, args: ConvertArgs) -> Result<()> {
    let platform = Platform::parse(&args.platform).map_err(|e| PreviewError::InvalidInput {
        problems: vec![e.to_string()],
    })?;
    let file_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    info!("Starting convert operation");
    info!("Input: {}", args.input.display());
    info!("Platform: {}", platform);

    let interactor = container.convert_interactor();

    // Name and size first, so an obviously wrong upload never reaches the encoder
    let size_bytes = tokio::fs::metadata(&args.input)
        .await
        .map(|meta| meta.len())
        .map_err(|e| PreviewError::InvalidInput {
            problems: vec![format!("Unable to read {}: {}", args.input.display(), e)],
        })?;
    let report = interactor.validator().validate(&SourceDescriptor {
        file_name: &file_name,
        size_bytes,
        duration_secs: None,
    });
    if !report.is_valid() {
        return Err(PreviewError::InvalidInput {
            problems: report.errors,
        }
        .into());
    }

    let duration = container
        .inspect_interactor()
        .measure_duration(&args.input)
        .await?;
    info!("Duration: {:.3}s", duration);

    let source = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let request = ConversionRequest::new(source, file_name, platform, args.silent_audio)
        .with_duration(duration);
    let output_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(request.suggested_filename()));

    let mut task = interactor.spawn(request);
    let cancel = task.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling conversion");
            cancel.cancel();
        }
    });

    while let Some(event) = task.events.recv().await {
        display_progress(&event);
    }
    interrupt.abort();

    let result = task.handle.await.context("Conversion task aborted")??;

    write_output(&output_path, &result.output_bytes).await?;
    println!("{}", output_path.display());

    info!("Convert operation completed successfully");
    Ok(())
}

/// Execute the check command
pub async fn check(container: &dyn AppContainer) -> Result<()> {
    let service = container.encoder_service();
    if !service.check_encoder_available().await {
        return Err(PreviewError::EncoderUnavailable {
            reason: "the encoder failed its availability check".to_string(),
        }
        .into());
    }

    let encoder = service.acquire().await?;
    let version = encoder.version().await?;
    println!("Encoder available: {} ({})", encoder.backend(), version);
    Ok(())
}

/// Execute the inspect command
pub async fn inspect(container: &dyn AppContainer, args: InspectArgs) -> Result<()> {
    info!("Starting inspect operation");

    let response = container
        .inspect_interactor()
        .execute(InspectRequest::new(args.input))
        .await?;

    if args.json {
        println!("{}", response.to_json()?);
    } else {
        print!("{}", response.to_text());
    }

    info!("Inspect operation completed successfully");
    Ok(())
}

/// Execute the platforms command
pub fn platforms(args: PlatformsArgs) -> Result<()> {
    if args.json {
        let json = serde_json::to_string_pretty(&PLATFORM_PROFILES)
            .context("Failed to serialize platform table to JSON")?;
        println!("{}", json);
        return Ok(());
    }

    println!("Platforms");
    println!("=========");
    for profile in PLATFORM_PROFILES.iter() {
        let marker = if profile.platform == Platform::default() {
            " (default)"
        } else {
            ""
        };
        println!(
            "  {:<6} {}{}",
            profile.platform.as_str(),
            profile.resolution(),
            marker
        );
    }
    Ok(())
}

fn display_progress(event: &ProgressEvent) {
    eprintln!("[{:>11}] {:>3}%", event.stage.label(), event.percent);
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
