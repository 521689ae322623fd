use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::StorageResult;

pub async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    Ok(())
}

pub async fn read_json_file<T>(path: &Path) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match fs::read(path).await {
        Ok(bytes) => {
            if bytes.is_empty() {
                Ok(None)
            } else {
                let value = serde_json::from_slice::<T>(&bytes)?;
                Ok(Some(value))
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Atomically write json to disk using a temp file + rename.
///
/// The write is fsync'd to ensure durability.
pub async fn write_json_file<T>(path: &Path, value: &T) -> StorageResult<()>
where
    T: Serialize,
{
    ensure_parent_dir(path).await?;

    let tmp_path = temp_path(path);

    let mut file = fs::File::create(&tmp_path).await?;
    let json = serde_json::to_vec_pretty(value)?;
    file.write_all(&json).await?;
    file.sync_all().await?;

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn remove_file_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|name| format!("{}.tmp", name.to_string_lossy()))
        .unwrap_or_else(|| "tmp.json".to_string());
    tmp.set_file_name(file_name);
    tmp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_leaves_no_temp_file() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested").join("value.json");

        write_json_file(&path, &vec!["a", "b"]).await?;
        let read: Option<Vec<String>> = read_json_file(&path).await?;
        assert_eq!(read, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!temp_path(&path).exists());

        remove_file_if_exists(&path).await?;
        remove_file_if_exists(&path).await?;
        assert!(read_json_file::<Vec<String>>(&path).await?.is_none());
        Ok(())
    }
}
