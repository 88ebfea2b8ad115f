use std::sync::Arc;

use tracing::debug;

use crate::adapters::toml_config::ServiceConfig;
use crate::adapters::{FfmpegLoader, FsScratchAdapter};
use crate::app::{
    convert_interactor::ConvertInteractor, encoder_service::EncoderService,
    inspect_interactor::InspectInteractor,
};
use crate::domain::errors::DomainError;
use crate::domain::model::{EncoderBackend, Environment};
use crate::domain::rules::InputValidator;
use crate::ports::{EncoderLoader, ScratchPort};

pub trait AppContainer: Send + Sync {
    fn convert_interactor(&self) -> Arc<ConvertInteractor>;
    fn inspect_interactor(&self) -> Arc<InspectInteractor>;
    fn encoder_service(&self) -> Arc<EncoderService>;
    fn environment(&self) -> Environment;
}

pub struct DefaultAppContainer {
    convert_interactor: Arc<ConvertInteractor>,
    inspect_interactor: Arc<InspectInteractor>,
    encoder_service: Arc<EncoderService>,
    environment: Environment,
}

impl DefaultAppContainer {
    /// Wire the adapters selected by `config`
    pub fn from_config(config: &ServiceConfig) -> Result<Self, DomainError> {
        let loader = encoder_loader(config)?;
        let scratch = Arc::new(FsScratchAdapter::new(config.scratch_root())?);
        debug!(
            backend = %config.encoder.backend,
            scratch = %scratch.root().display(),
            "Wiring application container"
        );
        Ok(Self::with_ports(
            config,
            loader,
            scratch as Arc<dyn ScratchPort>,
        ))
    }

    /// Wire explicit ports; the configuration still supplies limits
    pub fn with_ports(
        config: &ServiceConfig,
        loader: Arc<dyn EncoderLoader>,
        scratch: Arc<dyn ScratchPort>,
    ) -> Self {
        let encoder_service = Arc::new(EncoderService::new(
            loader,
            config.encoder.probe_timeout(),
        ));

        let convert_interactor = Arc::new(ConvertInteractor::new(
            Arc::clone(&encoder_service),
            scratch,
            InputValidator::new(config.validation_policy()),
            config.stage_timeout_policy(),
            config.pipeline.max_concurrent_conversions,
        ));

        let inspect_interactor = Arc::new(InspectInteractor::new(
            Arc::clone(&encoder_service),
            InputValidator::new(config.validation_policy()),
        ));

        Self {
            convert_interactor,
            inspect_interactor,
            encoder_service,
            environment: config.environment,
        }
    }
}

fn encoder_loader(config: &ServiceConfig) -> Result<Arc<dyn EncoderLoader>, DomainError> {
    match config.encoder.backend {
        EncoderBackend::Native => Ok(Arc::new(FfmpegLoader::from_config(&config.encoder))),
        #[cfg(feature = "libav")]
        EncoderBackend::Libav => Ok(Arc::new(crate::adapters::LibavLoader {
            preset: config.encoder.preset.clone(),
        })),
        #[cfg(not(feature = "libav"))]
        EncoderBackend::Libav => Err(DomainError::EncoderUnavailable(
            "the libav backend requires a build with the `libav` feature".to_string(),
        )),
    }
}

impl AppContainer for DefaultAppContainer {
    fn convert_interactor(&self) -> Arc<ConvertInteractor> {
        Arc::clone(&self.convert_interactor)
    }

    fn inspect_interactor(&self) -> Arc<InspectInteractor> {
        Arc::clone(&self.inspect_interactor)
    }

    fn encoder_service(&self) -> Arc<EncoderService> {
        Arc::clone(&self.encoder_service)
    }

    fn environment(&self) -> Environment {
        self.environment
    }
}
