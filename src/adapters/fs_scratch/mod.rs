// Scratch filesystem adapter - Per-request temporary directories

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;


/// Scratch storage backed by one `TempDir` per request.
///
/// Directories still registered when the adapter is dropped are removed by
/// `TempDir`'s own drop.
pub struct FsScratchAdapter {
    root: PathBuf,
    live: Mutex<HashMap<Uuid, TempDir>>,
}

impl FsScratchAdapter {
    /// Create an adapter rooted at `root`, creating it when missing
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            DomainError::FsFail(format!(
                "Failed to create scratch root {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self {
            root,
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Adapter rooted at the system temp directory
    pub fn in_system_temp() -> Result<Self, DomainError> {
        Self::new(std::env::temp_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of requests whose scratch has not been released
    pub fn live_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, TempDir>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ScratchPort for FsScratchAdapter {
    async fn allocate(&self, request_id: Uuid) -> Result<ScratchHandle, DomainError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("previewkit-{}-", request_id))
            .tempdir_in(&self.root)
            .map_err(|e| {
                DomainError::FsFail(format!("Failed to create scratch directory: {}", e))
            })?;

        let handle = ScratchHandle::in_directory(request_id, dir.path());
        debug!(
            request_id = %request_id,
            dir = %dir.path().display(),
            "Allocated scratch"
        );

        self.registry().insert(request_id, dir);
        Ok(handle)
    }

    async fn write(&self, slot: &ScratchSlot, bytes: &[u8]) -> Result<(), DomainError> {
        tokio::fs::write(&slot.path, bytes)
            .await
            .map_err(|e| DomainError::FsFail(format!("Failed to write {}: {}", slot.name, e)))
    }

    async fn read(&self, slot: &ScratchSlot) -> Result<Vec<u8>, DomainError> {
        tokio::fs::read(&slot.path)
            .await
            .map_err(|e| DomainError::FsFail(format!("Failed to read {}: {}", slot.name, e)))
    }

    async fn release(&self, handle: &ScratchHandle) {
        for slot in handle.slots() {
            match tokio::fs::remove_file(&slot.path).await {
                Ok(()) => debug!(slot = %slot.name, "Removed scratch slot"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    let err = DomainError::FsFail(format!(
                        "Failed to remove {}: {}",
                        slot.name, e
                    ));
                    warn!(request_id = %handle.request_id, "{}", err);
                }
            }
        }

        let dir = self.registry().remove(&handle.request_id);
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(
                    request_id = %handle.request_id,
                    dir = %path.display(),
                    "Failed to remove scratch directory: {}",
                    e
                );
            }
        }
    }
}
