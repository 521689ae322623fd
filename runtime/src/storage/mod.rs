use anyhow::Result;
use async_trait::async_trait;

pub mod io;
pub mod json_state;
pub mod manager;

pub use io::*;
pub use json_state::{JsonStateConfig, JsonStateStorage};
pub use manager::{StorageManager, StoragesStatus};

pub type StorageResult<T> = Result<T>;

/// Load/flush lifecycle shared by every backend.
#[async_trait]
pub trait StorageLifecycle: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;
}

/// A single persisted value (session snapshot, settings, ...).
#[async_trait]
pub trait StateStorage<T>: StorageLifecycle
where
    T: Send + Sync,
{
    async fn get(&self) -> StorageResult<Option<T>>;
    async fn set(&self, value: T) -> StorageResult<()>;
    async fn drop_all(&self) -> StorageResult<()>;

    /// Flush dirty state to disk if needed.
    async fn sync_if_dirty(&self) -> StorageResult<()>;
}
