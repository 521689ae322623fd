use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::GenerationError;

pub type SnapshotStream<'a> = BoxStream<'a, Result<String, GenerationError>>;

/// Sampling parameters chosen when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_k: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 40,
        }
    }
}

impl GenerationSettings {
    pub fn capped(self, capabilities: &Capabilities) -> Self {
        Self {
            temperature: self.temperature,
            top_k: self.top_k.clamp(1, capabilities.max_top_k.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct Capabilities {
    pub default_temperature: f32,
    pub default_top_k: u32,
    pub max_top_k: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct SessionStats {
    pub max_tokens: u64,
    pub tokens_used: u64,
    pub tokens_left: u64,
    pub temperature: f32,
    pub top_k: u32,
}

/// A stateful handle holding sampling parameters and token accounting. One session
/// serves one request at a time.
#[async_trait]
pub trait GenerationSession: Send {
    /// Streams the completion for `prompt`. Every item is the full output generated so
    /// far, not a delta.
    fn stream_completion<'a>(&'a mut self, prompt: &'a str) -> SnapshotStream<'a>;

    fn stats(&self) -> SessionStats;

    async fn destroy(&mut self);
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Fails with `UnsupportedEnvironment` when generation is not available at all.
    async fn capabilities(&self) -> Result<Capabilities, GenerationError>;

    async fn create_session(
        &self,
        settings: GenerationSettings,
        system_prompt: &str,
    ) -> Result<Box<dyn GenerationSession>, GenerationError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_is_capped_by_capabilities() {
        let caps = Capabilities {
            default_temperature: 0.3,
            default_top_k: 3,
            max_top_k: 8,
        };
        let settings = GenerationSettings {
            temperature: 0.7,
            top_k: 40,
        };
        assert_eq!(settings.capped(&caps).top_k, 8);
        assert_eq!(
            GenerationSettings { top_k: 0, ..settings }.capped(&caps).top_k,
            1
        );
    }
}
