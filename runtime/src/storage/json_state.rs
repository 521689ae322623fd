use std::{
    marker::PhantomData,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::debug;

use super::io::{ensure_parent_dir, read_json_file, remove_file_if_exists, write_json_file};
use super::{StateStorage, StorageLifecycle};

#[derive(Clone, Debug)]
pub struct JsonStateConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
    pub workspace: Option<String>,
}

/// One JSON document on disk, cached in memory and written back when dirty.
pub struct JsonStateStorage<T> {
    final_namespace: String,
    file_path: PathBuf,
    data: RwLock<Option<T>>,
    dirty: AtomicBool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStateStorage<T> {
    pub fn new(config: JsonStateConfig) -> Self {
        let JsonStateConfig {
            working_dir,
            namespace,
            workspace,
        } = config;

        let (workspace_prefix, workspace_dir) = match workspace.as_deref() {
            Some(ws) if !ws.is_empty() => (ws.to_string(), working_dir.join(ws)),
            _ => ("_".to_string(), working_dir.clone()),
        };

        let final_namespace = format!("{}_{}", workspace_prefix, namespace);
        let file_path = workspace_dir.join(format!("state_{}.json", namespace));

        Self {
            final_namespace,
            file_path,
            data: RwLock::new(None),
            dirty: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    pub fn file_path(&self) -> &PathBuf {
        &self.file_path
    }
}

#[async_trait]
impl<T> StorageLifecycle for JsonStateStorage<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn initialize(&self) -> Result<()> {
        ensure_parent_dir(&self.file_path).await?;
        let loaded: Option<T> = read_json_file(&self.file_path)
            .await
            .with_context(|| format!("failed to load state {}", self.final_namespace))?;
        debug!(
            namespace = %self.final_namespace,
            found = loaded.is_some(),
            "state storage initialized"
        );
        *self.data.write().await = loaded;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        self.sync_if_dirty().await
    }
}

#[async_trait]
impl<T> StateStorage<T> for JsonStateStorage<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self) -> Result<Option<T>> {
        Ok(self.data.read().await.clone())
    }

    async fn set(&self, value: T) -> Result<()> {
        *self.data.write().await = Some(value);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_all(&self) -> Result<()> {
        *self.data.write().await = None;
        self.dirty.store(false, Ordering::SeqCst);
        remove_file_if_exists(&self.file_path)
            .await
            .with_context(|| format!("failed to drop state {}", self.final_namespace))
    }

    async fn sync_if_dirty(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot = self.data.read().await.clone();
        match snapshot {
            Some(value) => write_json_file(&self.file_path, &value)
                .await
                .with_context(|| format!("failed to write state {}", self.final_namespace)),
            None => Ok(()),
        }
    }
}
