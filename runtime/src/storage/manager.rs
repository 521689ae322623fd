use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use ts_rs::TS;

use super::{StorageLifecycle, StorageResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StoragesStatus {
    #[default]
    Created,
    Initialized,
    Finalized,
}

/// Initializes registered backends one after another and flushes them on shutdown.
#[derive(Default)]
pub struct StorageManager {
    status: StoragesStatus,
    storages: Vec<Arc<dyn StorageLifecycle>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StoragesStatus {
        self.status
    }

    pub fn register<T>(&mut self, storage: Arc<T>)
    where
        T: StorageLifecycle + 'static,
    {
        self.storages.push(storage);
    }

    pub async fn initialize_all(&mut self) -> StorageResult<()> {
        if self.status == StoragesStatus::Initialized {
            return Ok(());
        }

        for storage in &self.storages {
            storage.initialize().await?;
        }

        self.status = StoragesStatus::Initialized;
        Ok(())
    }

    /// Finalizes every backend even if one fails; the first error is returned.
    pub async fn finalize_all(&mut self) -> StorageResult<()> {
        let mut first_err = None;
        for storage in &self.storages {
            if let Err(err) = storage.finalize().await {
                warn!(error = %err, "failed to finalize storage");
                first_err.get_or_insert(err);
            }
        }
        self.status = StoragesStatus::Finalized;
        first_err.map_or(Ok(()), Err)
    }
}
