use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::{ai::session::SessionStats, error::ErrorContext};

use super::renderer::RenderedDiagram;

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Loading {
        run_id: String,
    },
    Message {
        text: String,
    },
    ChunkStarted {
        index: usize,
        total: usize,
    },
    /// Latest full snapshot of a chunk's generated output.
    ChunkProgress {
        index: usize,
        total: usize,
        partial: String,
    },
    ChunkFinished {
        index: usize,
        total: usize,
        records: usize,
    },
    Diagram {
        diagram: RenderedDiagram,
    },
    Error {
        context: ErrorContext,
        message: String,
    },
    Stats {
        stats: SessionStats,
    },
    Finished {
        run_id: String,
        succeeded: bool,
    },
}

/// Receives progress, diagrams, errors and statistics from the orchestrator.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        log_event(&event);
    }
}

/// Fans events out to any number of subscribers. Slow subscribers lose the oldest
/// events rather than stalling the pipeline.
#[derive(Debug, Clone)]
pub struct BroadcastProgressSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl ProgressSink for BroadcastProgressSink {
    fn emit(&self, event: ProgressEvent) {
        log_event(&event);
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Loading { run_id } => info!(run_id = %run_id, "analysis started"),
        ProgressEvent::Message { text } => info!(message = %text, "progress"),
        ProgressEvent::ChunkStarted { index, total } => {
            info!(chunk = index + 1, total, "analyzing chunk")
        }
        ProgressEvent::ChunkProgress {
            index,
            total,
            partial,
        } => debug!(chunk = index + 1, total, chars = partial.len(), "chunk output"),
        ProgressEvent::ChunkFinished {
            index,
            total,
            records,
        } => info!(chunk = index + 1, total, records, "chunk finished"),
        ProgressEvent::Diagram { diagram } => debug!(
            nodes = diagram.node_count,
            edges = diagram.edge_count,
            "diagram updated"
        ),
        ProgressEvent::Error { context, message } => {
            warn!(context = context.as_str(), error = %message, "pipeline error")
        }
        ProgressEvent::Stats { stats } => info!(
            max_tokens = stats.max_tokens,
            tokens_used = stats.tokens_used,
            tokens_left = stats.tokens_left,
            temperature = stats.temperature,
            top_k = stats.top_k,
            "session stats"
        ),
        ProgressEvent::Finished { run_id, succeeded } => {
            info!(run_id = %run_id, succeeded, "analysis finished")
        }
    }
}
