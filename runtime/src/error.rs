//! Error taxonomy for the extraction pipeline.
//!
//! Only the generation and rendering collaborators can fail; parsing, aggregation and
//! diagram synthesis are total.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Failures raised by a generation service or one of its sessions.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The generation capability is absent; nothing can be analysed.
    #[error("generation service unavailable: {0}")]
    UnsupportedEnvironment(String),

    /// The session must be recreated before the request can be retried.
    #[error("generation session invalid: {0}")]
    SessionInvalid(String),

    #[error("generation failed: {0}")]
    Failure(String),

    #[error("generation timed out after {0}s")]
    Timeout(u64),
}

/// The rendering engine rejected a diagram description.
#[derive(Debug, Error)]
#[error("diagram rejected: {message}")]
pub struct RenderError {
    pub message: String,
    /// 1-based line of the offending statement, when known.
    pub line: Option<usize>,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The session was invalid again after being recreated once.
    #[error("session invalid after recreation: {0}")]
    SessionInvalid(String),

    #[error("chunk {chunk} of {total}: {source}")]
    Generation {
        chunk: usize,
        total: usize,
        #[source]
        source: GenerationError,
    },

    #[error("analysis cancelled")]
    Cancelled,

    #[error("an analysis is already running")]
    Busy,

    #[error("failed to read document text: {0}")]
    TextSource(#[source] anyhow::Error),
}

/// Which collaborator an error notification originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ErrorContext {
    Generation,
    Rendering,
    Summarization,
}

impl ErrorContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Rendering => "rendering",
            Self::Summarization => "summarization",
        }
    }
}
