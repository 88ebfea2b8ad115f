// Application layer - Use case interactors

pub mod container;
pub mod convert_interactor;
pub mod encoder_service;
pub mod inspect_interactor;
pub mod progress;

// Re-export interactors
pub use container::{AppContainer, DefaultAppContainer};
pub use convert_interactor::{ConversionTask, ConvertInteractor};
pub use encoder_service::{EncoderService, EncoderStatus};
pub use inspect_interactor::{InspectInteractor, InspectRequest, InspectResponse};
pub use progress::ProgressEmitter;
