use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    ai::{
        prompts::{SYSTEM_PROMPT, chunk_prompt},
        session::{
            Capabilities, GenerationService, GenerationSession, GenerationSettings, SessionStats,
            Summarizer,
        },
    },
    error::{ErrorContext, GenerationError, PipelineError, RenderError},
};

use super::{
    aggregation::AggregationStore,
    chunker::{ChunkConfig, Chunker, DEFAULT_CHUNK_SIZE},
    diagram::synthesize,
    extractor::TextSource,
    parser::parse_relationships,
    progress::{ProgressEvent, ProgressSink},
    renderer::{DiagramRenderer, RenderedDiagram},
    types::{EntityRecord, RelationshipRecord, SessionSnapshot},
};

/// Inputs longer than this (in characters) are summarized first when requested.
pub const DEFAULT_SUMMARIZE_THRESHOLD: usize = 2000;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunk_size: usize,
    pub summarize_threshold: usize,
    pub chunk_timeout: Option<Duration>,
    pub include_descriptions: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            summarize_threshold: DEFAULT_SUMMARIZE_THRESHOLD,
            chunk_timeout: Some(Duration::from_secs(120)),
            include_descriptions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Chunking,
    Generating,
    Parsing,
    Aggregating,
    Rendering,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub summarize: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct RunReport {
    pub run_id: String,
    pub source_id: String,
    pub chunks_total: usize,
    pub chunks_completed: usize,
    pub records_added: usize,
    pub render_failures: usize,
    /// Final output of every finished chunk, in order.
    pub transcript: String,
    pub stats: Option<SessionStats>,
}

/// A filtered view of the aggregated graph together with its rendering.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct GraphView {
    pub selected_entity: Option<String>,
    pub records: Vec<RelationshipRecord>,
    pub description: String,
    pub diagram: Option<RenderedDiagram>,
    pub render_error: Option<String>,
}

/// Exclusive right to run one analysis on the pipeline that issued it. Released on drop.
#[derive(Debug)]
pub struct RunClaim {
    flag: Arc<AtomicBool>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct ActiveSession {
    handle: Box<dyn GenerationSession>,
    settings: GenerationSettings,
}

enum StreamOutcome {
    Completed(String),
    Cancelled,
}

#[derive(Default)]
struct RunProgress {
    source_id: String,
    chunks_total: usize,
    chunks_completed: usize,
    records_added: usize,
    render_failures: usize,
    transcript: String,
}

/// Drives chunk -> generate -> parse -> aggregate -> render for one analysis at a time.
///
/// The generation session lives behind `session`; holding that lock for a whole run is
/// what keeps chunks strictly sequential and runs mutually exclusive.
pub struct Pipeline {
    generator: Arc<dyn GenerationService>,
    summarizer: Option<Arc<dyn Summarizer>>,
    renderer: Arc<dyn DiagramRenderer>,
    sink: Arc<dyn ProgressSink>,
    chunker: Chunker,
    config: PipelineConfig,
    store: RwLock<AggregationStore>,
    session: Mutex<Option<ActiveSession>>,
    settings: RwLock<GenerationSettings>,
    include_descriptions: AtomicBool,
    diagram: RwLock<Option<RenderedDiagram>>,
    last_stats: RwLock<Option<SessionStats>>,
    active_run: Mutex<Option<CancellationToken>>,
    running: Arc<AtomicBool>,
    phase: watch::Sender<RunPhase>,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        summarizer: Option<Arc<dyn Summarizer>>,
        renderer: Arc<dyn DiagramRenderer>,
        sink: Arc<dyn ProgressSink>,
        settings: GenerationSettings,
        config: PipelineConfig,
    ) -> Self {
        let chunker = Chunker::new(ChunkConfig {
            max_chars: config.chunk_size,
        });
        let (phase, _) = watch::channel(RunPhase::Idle);

        Self {
            generator,
            summarizer,
            renderer,
            sink,
            chunker,
            include_descriptions: AtomicBool::new(config.include_descriptions),
            config,
            store: RwLock::new(AggregationStore::new()),
            session: Mutex::new(None),
            settings: RwLock::new(settings),
            diagram: RwLock::new(None),
            last_stats: RwLock::new(None),
            active_run: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            phase,
        }
    }

    /// Claims the pipeline for one analysis, or `None` while another run holds it.
    pub fn try_claim_run(&self) -> Option<RunClaim> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(RunClaim {
            flag: self.running.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one full analysis, failing with `Busy` if another one is in flight. The store
    /// is reset on entry; on failure the records merged from earlier chunks are kept.
    /// Session statistics are reported either way.
    pub async fn analyze(
        &self,
        source: &dyn TextSource,
        options: AnalyzeOptions,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let claim = self.try_claim_run().ok_or(PipelineError::Busy)?;
        self.analyze_claimed(claim, source, options, cancel).await
    }

    /// Like [`Pipeline::analyze`] with a claim taken beforehand, so callers can refuse
    /// concurrent requests before spawning the run.
    pub async fn analyze_claimed(
        &self,
        claim: RunClaim,
        source: &dyn TextSource,
        options: AnalyzeOptions,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        if !Arc::ptr_eq(&claim.flag, &self.running) {
            return Err(PipelineError::Busy);
        }
        self.set_phase(RunPhase::Chunking);
        *self.active_run.lock().await = Some(cancel.clone());
        let mut slot = self.session.lock().await;
        let run_id = generate_run_id("analysis");

        let mut progress = RunProgress::default();
        let result = self
            .run(&mut slot, &run_id, source, options, &cancel, &mut progress)
            .await;

        let stats = slot.as_ref().map(|active| active.handle.stats());
        if let Some(stats) = stats {
            self.sink.emit(ProgressEvent::Stats { stats });
        }
        *self.last_stats.write().await = stats;
        *self.active_run.lock().await = None;

        let succeeded = result.is_ok();
        self.set_phase(if succeeded {
            RunPhase::Idle
        } else {
            RunPhase::Failed
        });
        self.sink.emit(ProgressEvent::Finished {
            run_id: run_id.clone(),
            succeeded,
        });

        match result {
            Ok(()) => {
                info!(
                    run_id = %run_id,
                    chunks = progress.chunks_completed,
                    records = progress.records_added,
                    "analysis complete"
                );
                Ok(RunReport {
                    run_id,
                    source_id: progress.source_id,
                    chunks_total: progress.chunks_total,
                    chunks_completed: progress.chunks_completed,
                    records_added: progress.records_added,
                    render_failures: progress.render_failures,
                    transcript: progress.transcript,
                    stats,
                })
            }
            Err(err) => {
                error!(
                    run_id = %run_id,
                    error = %err,
                    chunks_completed = progress.chunks_completed,
                    "analysis failed"
                );
                let context = match err {
                    PipelineError::TextSource(_)
                    | PipelineError::Cancelled
                    | PipelineError::Busy => None,
                    _ => Some(ErrorContext::Generation),
                };
                if let Some(context) = context {
                    self.sink.emit(ProgressEvent::Error {
                        context,
                        message: format!("Analysis failed: {err}"),
                    });
                } else {
                    self.sink.emit(ProgressEvent::Message {
                        text: format!("Analysis stopped: {err}"),
                    });
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        slot: &mut Option<ActiveSession>,
        run_id: &str,
        source: &dyn TextSource,
        options: AnalyzeOptions,
        cancel: &CancellationToken,
        progress: &mut RunProgress,
    ) -> Result<(), PipelineError> {
        let capabilities = self.generator.capabilities().await.map_err(|err| match err {
            GenerationError::UnsupportedEnvironment(msg) => {
                PipelineError::UnsupportedEnvironment(msg)
            }
            other => PipelineError::UnsupportedEnvironment(other.to_string()),
        })?;

        self.store.write().await.reset();
        *self.diagram.write().await = None;
        self.sink.emit(ProgressEvent::Loading {
            run_id: run_id.to_string(),
        });

        let document = source.document().await.map_err(PipelineError::TextSource)?;
        progress.source_id = document.source_id.clone();
        let text = self.prepare_text(document.text, options.summarize).await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let total = self.chunker.chunk_count(&text);
        progress.chunks_total = total;
        if total == 0 {
            warn!(source = %document.source_id, "document produced no chunks");
        }

        for chunk in self.chunker.chunks(&text) {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let index = chunk.order;
            let chunk_source = format!("{}#chunk-{}", document.source_id, index + 1);

            self.sink.emit(ProgressEvent::ChunkStarted { index, total });
            tokio::task::yield_now().await;

            self.set_phase(RunPhase::Generating);
            let prompt = chunk_prompt(chunk.content, index, total);
            let output = match self
                .generate_chunk(slot, &capabilities, &prompt, index, total, cancel)
                .await?
            {
                StreamOutcome::Completed(output) => output,
                StreamOutcome::Cancelled => return Err(PipelineError::Cancelled),
            };

            self.set_phase(RunPhase::Parsing);
            let records = parse_relationships(&output, Some(&chunk_source));
            let added = records.len();

            self.set_phase(RunPhase::Aggregating);
            self.store
                .write()
                .await
                .merge(records, Some(&chunk_source));

            progress.chunks_completed += 1;
            progress.records_added += added;
            progress
                .transcript
                .push_str(&format!("\n\nChunk {} results:\n{}", index + 1, output));
            self.sink.emit(ProgressEvent::ChunkFinished {
                index,
                total,
                records: added,
            });

            self.set_phase(RunPhase::Rendering);
            if self.refresh_diagram().await.is_err() {
                progress.render_failures += 1;
            }
            tokio::task::yield_now().await;
        }

        Ok(())
    }

    /// Streams one chunk, recreating the session once if it reports itself invalid.
    async fn generate_chunk(
        &self,
        slot: &mut Option<ActiveSession>,
        capabilities: &Capabilities,
        prompt: &str,
        index: usize,
        total: usize,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, PipelineError> {
        let as_pipeline_error = |source| PipelineError::Generation {
            chunk: index + 1,
            total,
            source,
        };

        let session = self
            .ensure_session(slot, capabilities, false)
            .await
            .map_err(as_pipeline_error)?;
        match self.stream_chunk(session, prompt, index, total, cancel).await {
            Err(GenerationError::SessionInvalid(reason)) => {
                warn!(chunk = index + 1, reason = %reason, "session invalid, recreating");
            }
            other => return other.map_err(as_pipeline_error),
        }

        let session = self
            .ensure_session(slot, capabilities, true)
            .await
            .map_err(as_pipeline_error)?;
        match self.stream_chunk(session, prompt, index, total, cancel).await {
            Err(GenerationError::SessionInvalid(reason)) => {
                Err(PipelineError::SessionInvalid(reason))
            }
            other => other.map_err(as_pipeline_error),
        }
    }

    async fn stream_chunk(
        &self,
        session: &mut ActiveSession,
        prompt: &str,
        index: usize,
        total: usize,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, GenerationError> {
        let consume = async {
            let mut stream = session.handle.stream_completion(prompt);
            let mut latest = String::new();
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                    next = stream.next() => next,
                };
                match next {
                    // Each item replaces the previous one: snapshots, not deltas.
                    Some(Ok(snapshot)) => {
                        latest = snapshot;
                        tokio::task::yield_now().await;
                        self.sink.emit(ProgressEvent::ChunkProgress {
                            index,
                            total,
                            partial: latest.clone(),
                        });
                    }
                    Some(Err(err)) => return Err(err),
                    None => break,
                }
            }
            Ok(StreamOutcome::Completed(latest))
        };

        match self.config.chunk_timeout {
            Some(limit) => tokio::time::timeout(limit, consume)
                .await
                .map_err(|_| GenerationError::Timeout(limit.as_secs()))?,
            None => consume.await,
        }
    }

    /// Returns the live session, creating it when missing, when `recreate` is set, or
    /// when the settings changed since it was created.
    async fn ensure_session<'s>(
        &self,
        slot: &'s mut Option<ActiveSession>,
        capabilities: &Capabilities,
        recreate: bool,
    ) -> Result<&'s mut ActiveSession, GenerationError> {
        let wanted = self.settings.read().await.capped(capabilities);
        let stale = slot
            .as_ref()
            .is_some_and(|active| recreate || active.settings != wanted);

        if stale {
            if let Some(mut old) = slot.take() {
                old.handle.destroy().await;
            }
        }

        if slot.is_none() {
            let handle = self
                .generator
                .create_session(wanted, SYSTEM_PROMPT)
                .await?;
            info!(
                temperature = wanted.temperature,
                top_k = wanted.top_k,
                "generation session created"
            );
            *slot = Some(ActiveSession {
                handle,
                settings: wanted,
            });
        }

        slot.as_mut()
            .ok_or_else(|| GenerationError::SessionInvalid("no active session".into()))
    }

    async fn prepare_text(&self, text: String, summarize: bool) -> String {
        if !summarize || text.chars().count() <= self.config.summarize_threshold {
            return text;
        }
        let Some(summarizer) = &self.summarizer else {
            debug!("summarization requested but no summarizer configured");
            return text;
        };

        self.sink.emit(ProgressEvent::Message {
            text: "Summarizing content for analysis...".into(),
        });
        match summarizer.summarize(&text).await {
            Ok(summary) => {
                info!(
                    original_chars = text.chars().count(),
                    summary_chars = summary.chars().count(),
                    "content summarized"
                );
                self.sink.emit(ProgressEvent::Message {
                    text: "Summarization complete. Starting analysis...".into(),
                });
                summary
            }
            Err(err) => {
                self.sink.emit(ProgressEvent::Error {
                    context: ErrorContext::Summarization,
                    message: format!("Summarization failed, analysing full text: {err}"),
                });
                text
            }
        }
    }

    /// Rebuilds the diagram for the current view. Rendering failures are reported to the
    /// sink and leave the aggregated state untouched.
    pub async fn refresh_diagram(&self) -> Result<RenderedDiagram, RenderError> {
        let records = self.store.read().await.current_view();
        let description = synthesize(&records, self.include_descriptions());
        self.render(&description).await
    }

    async fn render(&self, description: &str) -> Result<RenderedDiagram, RenderError> {
        match self.renderer.render(description).await {
            Ok(diagram) => {
                *self.diagram.write().await = Some(diagram.clone());
                self.sink.emit(ProgressEvent::Diagram {
                    diagram: diagram.clone(),
                });
                Ok(diagram)
            }
            Err(err) => {
                self.sink.emit(ProgressEvent::Error {
                    context: ErrorContext::Rendering,
                    message: format!("Failed to render diagram: {err}"),
                });
                Err(err)
            }
        }
    }

    /// Selects `name` (known or not) and renders its relationships.
    pub async fn select_entity(&self, name: &str) -> GraphView {
        let records = self.store.write().await.select_entity(name);
        self.view_of(Some(name.to_string()), records).await
    }

    pub async fn clear_selection(&self) -> GraphView {
        let records = {
            let mut store = self.store.write().await;
            store.clear_selection();
            store.current_view()
        };
        self.view_of(None, records).await
    }

    /// Re-renders the current view, optionally toggling description notes first.
    pub async fn render_view(&self, include_descriptions: Option<bool>) -> GraphView {
        if let Some(include) = include_descriptions {
            self.include_descriptions.store(include, Ordering::SeqCst);
        }
        let (selected, records) = {
            let store = self.store.read().await;
            (
                store.selected_entity().map(str::to_string),
                store.current_view(),
            )
        };
        self.view_of(selected, records).await
    }

    async fn view_of(
        &self,
        selected_entity: Option<String>,
        records: Vec<RelationshipRecord>,
    ) -> GraphView {
        let description = synthesize(&records, self.include_descriptions());
        let (diagram, render_error) = match self.render(&description).await {
            Ok(diagram) => (Some(diagram), None),
            Err(err) => (None, Some(err.to_string())),
        };
        GraphView {
            selected_entity,
            records,
            description,
            diagram,
            render_error,
        }
    }

    pub fn include_descriptions(&self) -> bool {
        self.include_descriptions.load(Ordering::SeqCst)
    }

    pub async fn entities(&self) -> Vec<EntityRecord> {
        self.store
            .read()
            .await
            .ranked_entities()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn relationships_for(&self, name: &str) -> Vec<RelationshipRecord> {
        self.store.read().await.relationships_for(name)
    }

    pub async fn selected_entity(&self) -> Option<String> {
        self.store.read().await.selected_entity().map(str::to_string)
    }

    pub async fn export(&self) -> SessionSnapshot {
        self.store.read().await.export()
    }

    pub async fn import(&self, snapshot: SessionSnapshot) {
        self.store.write().await.import(snapshot);
        *self.diagram.write().await = None;
    }

    pub async fn current_diagram(&self) -> Option<RenderedDiagram> {
        self.diagram.read().await.clone()
    }

    pub async fn settings(&self) -> GenerationSettings {
        *self.settings.read().await
    }

    /// Applies to generation requests issued after this call; a running stream keeps the
    /// settings it started with.
    pub async fn update_settings(&self, settings: GenerationSettings) {
        *self.settings.write().await = settings;
        info!(
            temperature = settings.temperature,
            top_k = settings.top_k,
            "generation settings updated"
        );
    }

    pub async fn last_stats(&self) -> Option<SessionStats> {
        *self.last_stats.read().await
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Cancels the running analysis, if any. Returns whether one was running.
    pub async fn cancel_current(&self) -> bool {
        match self.active_run.lock().await.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Destroys the generation session. Waits for a running analysis to finish.
    pub async fn shutdown(&self) {
        if let Some(mut active) = self.session.lock().await.take() {
            active.handle.destroy().await;
            info!("generation session destroyed");
        }
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
    }
}

fn generate_run_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}
