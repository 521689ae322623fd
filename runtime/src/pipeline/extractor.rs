use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Origin of the text (path, URL, ...); chunk provenance is derived from it.
    pub source_id: String,
    pub text: String,
}

/// Supplies already-flattened, whitespace-normalized document text.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn document(&self) -> Result<SourceDocument>;
}

#[derive(Debug, Clone)]
pub struct InlineTextSource {
    source_id: String,
    text: String,
}

impl InlineTextSource {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
impl TextSource for InlineTextSource {
    async fn document(&self) -> Result<SourceDocument> {
        Ok(SourceDocument {
            source_id: self.source_id.clone(),
            text: normalize_whitespace(&self.text),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileTextSource {
    path: PathBuf,
}

impl FileTextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TextSource for FileTextSource {
    async fn document(&self) -> Result<SourceDocument> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read file {}", self.path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("file content is empty"));
        }

        let text = String::from_utf8(bytes).map_err(|_| anyhow!("file is not valid UTF-8"))?;
        let text = normalize_whitespace(&text);
        if text.is_empty() {
            return Err(anyhow!("file contains only whitespace"));
        }

        Ok(SourceDocument {
            source_id: self.path.display().to_string(),
            text,
        })
    }
}

/// Collapses every whitespace run into a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
