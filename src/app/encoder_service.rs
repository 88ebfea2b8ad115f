// Encoder service - Lazy, single-flight encoder initialization

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::domain::errors::*;
use crate::domain::model::EncoderBackend;
use crate::ports::*;

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<dyn EncoderPort>, DomainError>>>;

/// Observable lifecycle of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStatus {
    Uninitialized,
    Initializing,
    Ready(EncoderBackend),
}

enum EncoderState {
    Uninitialized,
    Initializing { generation: u64, load: LoadFuture },
    Ready(Arc<dyn EncoderPort>),
}

struct Inner {
    state: EncoderState,
    generation: u64,
}

/// Owns the process-wide encoder.
///
/// Concurrent callers that arrive while a load is in flight wait on the same
/// load instead of starting their own. A failed load puts the service back
/// to `Uninitialized`, so the next caller tries again.
pub struct EncoderService {
    loader: Arc<dyn EncoderLoader>,
    probe_timeout: Duration,
    inner: Mutex<Inner>,
}

impl EncoderService {
    pub fn new(loader: Arc<dyn EncoderLoader>, probe_timeout: Duration) -> Self {
        Self {
            loader,
            probe_timeout,
            inner: Mutex::new(Inner {
                state: EncoderState::Uninitialized,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> EncoderStatus {
        match &self.lock().state {
            EncoderState::Uninitialized => EncoderStatus::Uninitialized,
            EncoderState::Initializing { .. } => EncoderStatus::Initializing,
            EncoderState::Ready(encoder) => EncoderStatus::Ready(encoder.backend()),
        }
    }

    /// Drop the loaded encoder so the next caller loads it again
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = EncoderState::Uninitialized;
    }

    /// Loaded encoder, loading it first if needed
    pub async fn acquire(&self) -> Result<Arc<dyn EncoderPort>, DomainError> {
        let (generation, load) = {
            let mut inner = self.lock();
            match &inner.state {
                EncoderState::Ready(encoder) => return Ok(Arc::clone(encoder)),
                EncoderState::Initializing { generation, load } => (*generation, load.clone()),
                EncoderState::Uninitialized => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let loader = Arc::clone(&self.loader);
                    let load = async move { loader.load().await }.boxed().shared();
                    debug!(generation, "Loading encoder");
                    inner.state = EncoderState::Initializing {
                        generation,
                        load: load.clone(),
                    };
                    (generation, load)
                }
            }
        };

        let result = load.await;

        let mut inner = self.lock();
        let current = matches!(
            &inner.state,
            EncoderState::Initializing { generation: g, .. } if *g == generation
        );
        if current {
            inner.state = match &result {
                Ok(encoder) => {
                    info!(backend = %encoder.backend(), "Encoder loaded");
                    EncoderState::Ready(Arc::clone(encoder))
                }
                Err(e) => {
                    warn!("Encoder load failed: {}", e);
                    EncoderState::Uninitialized
                }
            };
        }
        result
    }

    /// Load the encoder and confirm it runs by asking for its version
    pub async fn ensure_available(&self) -> Result<Arc<dyn EncoderPort>, DomainError> {
        let encoder = self.acquire().await?;

        match tokio::time::timeout(self.probe_timeout, encoder.version()).await {
            Ok(Ok(version)) => {
                debug!(version = %version, "Encoder version probe succeeded");
                Ok(encoder)
            }
            Ok(Err(e)) => {
                self.reset();
                Err(DomainError::EncoderUnavailable(e.to_string()))
            }
            Err(_) => {
                self.reset();
                Err(DomainError::EncoderUnavailable(format!(
                    "version probe timed out after {:?}",
                    self.probe_timeout
                )))
            }
        }
    }

    /// Availability gate. Failures are logged and reported as `false`.
    pub async fn check_encoder_available(&self) -> bool {
        match self.ensure_available().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Encoder availability check failed: {}", e);
                false
            }
        }
    }
}
