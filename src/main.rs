//! previewkit CLI
//!
//! Turns a 15 to 30 second MP4 into an App Store preview for macOS or iOS.
//!
//! # Usage
//!
//! ```bash
//! previewkit convert --input recording.mp4 --platform ios --silent-audio
//! previewkit inspect --input recording.mp4
//! previewkit check
//! previewkit platforms
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use previewkit::adapters::toml_config::ServiceConfig;
use previewkit::adapters::TracingLogAdapter;
use previewkit::app::DefaultAppContainer;
use previewkit::cli::{commands, Cli, Commands};
use previewkit::config_initialization::initialize_configuration;
use previewkit::domain::errors::DomainError;
use previewkit::domain::model::Environment;
use previewkit::error::PreviewError;

/// sysexits EX_CONFIG
const EXIT_CONFIG: i32 = 78;

/// Main entry point for the previewkit CLI application
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let initialized = match initialize_configuration(&cli) {
        Ok(initialized) => initialized,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };
    if let Err(e) = TracingLogAdapter::init(&initialized.config.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_CONFIG);
    }
    initialized.log_summary();

    let environment = initialized.config.environment;
    if let Err(e) = run(cli.command, &initialized.config).await {
        std::process::exit(report_error(&e, environment));
    }
}

/// Execute the requested command
async fn run(command: Commands, config: &ServiceConfig) -> Result<()> {
    if let Commands::Platforms(args) = command {
        return commands::platforms(args);
    }

    let container = DefaultAppContainer::from_config(config).map_err(|e| match e {
        DomainError::EncoderUnavailable(reason) => {
            anyhow::Error::new(PreviewError::EncoderUnavailable { reason })
        }
        other => anyhow::Error::new(other),
    })?;

    match command {
        Commands::Convert(args) => {
            info!("Executing convert command");
            commands::convert(&container, args).await
        }
        Commands::Check => {
            info!("Executing check command");
            commands::check(&container).await
        }
        Commands::Inspect(args) => {
            info!("Executing inspect command");
            commands::inspect(&container, args).await
        }
        Commands::Platforms(args) => commands::platforms(args),
    }
}

/// Print the error for the caller and pick the exit code
fn report_error(err: &anyhow::Error, environment: Environment) -> i32 {
    match err.downcast_ref::<PreviewError>() {
        Some(preview) => {
            let category = preview.category();
            error!(category = category.label(), "{}", preview);
            eprintln!("Error ({}): {}", category.label(), preview.public_message(environment));
            category.exit_code()
        }
        None => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            1
        }
    }
}
