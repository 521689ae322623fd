use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::{
    ai::{ClientOptions, GenerationSettings},
    pipeline::{
        PipelineConfig, chunker::DEFAULT_CHUNK_SIZE, pipeline::DEFAULT_SUMMARIZE_THRESHOLD,
    },
};

const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub working_dir: String,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub renderer: RendererConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u64,
    pub max_top_k: u32,
    pub default_temperature: f32,
    pub default_top_k: u32,
    /// Only enable for providers that accept a `top_k` request parameter.
    pub send_top_k: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            base_url: None,
            model: options.model,
            max_tokens: options.max_tokens,
            max_top_k: options.max_top_k,
            default_temperature: options.default_temperature,
            default_top_k: options.default_top_k,
            send_top_k: options.send_top_k,
        }
    }
}

impl GenerationConfig {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            max_top_k: self.max_top_k,
            default_temperature: self.default_temperature,
            default_top_k: self.default_top_k,
            send_top_k: self.send_top_k,
        }
    }

    /// Settings used until the user saves their own.
    pub fn default_settings(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.default_temperature,
            top_k: self.default_top_k,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub chunk_size: usize,
    pub summarize_threshold: usize,
    /// Zero disables the per-chunk timeout.
    pub chunk_timeout_secs: u64,
    pub include_descriptions: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            summarize_threshold: DEFAULT_SUMMARIZE_THRESHOLD,
            chunk_timeout_secs: 120,
            include_descriptions: true,
        }
    }
}

impl PipelineSection {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunk_size: self.chunk_size,
            summarize_threshold: self.summarize_threshold,
            chunk_timeout: (self.chunk_timeout_secs > 0)
                .then(|| Duration::from_secs(self.chunk_timeout_secs)),
            include_descriptions: self.include_descriptions,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// External program that reads a nomnoml description on stdin and prints SVG.
    pub command: Option<String>,
    pub args: Vec<String>,
}

pub async fn load_config() -> Result<AppConfig> {
    let path = config_path();
    let contents = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    info!(path = %path.display(), "Configuration loaded from disk");
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    Ok(serde_yaml::from_str(contents)?)
}

fn config_path() -> PathBuf {
    env::var("APP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
