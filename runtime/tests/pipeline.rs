use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use relmap::{
    ai::{
        Capabilities, GenerationService, GenerationSession, GenerationSettings, SessionStats,
        SnapshotStream, Summarizer,
    },
    error::{ErrorContext, GenerationError, PipelineError, RenderError},
    pipeline::{
        AnalyzeOptions, DiagramRenderer, InlineTextSource, NomnomlValidator, Pipeline,
        PipelineConfig, ProgressEvent, ProgressSink, RenderedDiagram, RunPhase,
    },
};
use tokio_util::sync::CancellationToken;

enum Reply {
    Snapshots(Vec<&'static str>),
    Invalid,
    Fail,
    /// Emits the given snapshot and then never finishes.
    Hang(&'static str),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    prompts: Vec<String>,
    created: Vec<GenerationSettings>,
    destroyed: usize,
}

type Shared = Arc<Mutex<Script>>;

fn script(replies: Vec<Reply>) -> Shared {
    Arc::new(Mutex::new(Script {
        replies: replies.into(),
        ..Script::default()
    }))
}

struct ScriptedService {
    shared: Shared,
    available: bool,
    capabilities_delay: Duration,
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn capabilities(&self) -> Result<Capabilities, GenerationError> {
        if !self.capabilities_delay.is_zero() {
            tokio::time::sleep(self.capabilities_delay).await;
        }
        if !self.available {
            return Err(GenerationError::UnsupportedEnvironment(
                "no model installed".into(),
            ));
        }
        Ok(Capabilities {
            default_temperature: 0.3,
            default_top_k: 40,
            max_top_k: 64,
        })
    }

    async fn create_session(
        &self,
        settings: GenerationSettings,
        _system_prompt: &str,
    ) -> Result<Box<dyn GenerationSession>, GenerationError> {
        self.shared.lock().unwrap().created.push(settings);
        Ok(Box::new(ScriptedSession {
            shared: self.shared.clone(),
            settings,
            used: 0,
        }))
    }
}

struct ScriptedSession {
    shared: Shared,
    settings: GenerationSettings,
    used: u64,
}

#[async_trait]
impl GenerationSession for ScriptedSession {
    fn stream_completion<'a>(&'a mut self, prompt: &'a str) -> SnapshotStream<'a> {
        let reply = {
            let mut shared = self.shared.lock().unwrap();
            shared.prompts.push(prompt.to_string());
            shared.replies.pop_front()
        };
        self.used += 10;
        match reply {
            Some(Reply::Snapshots(snapshots)) => {
                stream::iter(snapshots.into_iter().map(|s| Ok(s.to_string()))).boxed()
            }
            Some(Reply::Invalid) => stream::iter(vec![Err(GenerationError::SessionInvalid(
                "context window exhausted".into(),
            ))])
            .boxed(),
            Some(Reply::Fail) => {
                stream::iter(vec![Err(GenerationError::Failure("model crashed".into()))]).boxed()
            }
            Some(Reply::Hang(first)) => stream::iter(vec![Ok(first.to_string())])
                .chain(stream::pending())
                .boxed(),
            None => stream::empty().boxed(),
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            max_tokens: 1000,
            tokens_used: self.used,
            tokens_left: 1000 - self.used,
            temperature: self.settings.temperature,
            top_k: self.settings.top_k,
        }
    }

    async fn destroy(&mut self) {
        self.shared.lock().unwrap().destroyed += 1;
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct RejectingRenderer;

#[async_trait]
impl DiagramRenderer for RejectingRenderer {
    async fn render(&self, _description: &str) -> Result<RenderedDiagram, RenderError> {
        Err(RenderError::at_line("unexpected token", 3))
    }
}

struct FixedSummarizer(Result<&'static str, &'static str>);

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _text: &str) -> anyhow::Result<String> {
        match self.0 {
            Ok(summary) => Ok(summary.to_string()),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

struct Harness {
    pipeline: Arc<Pipeline>,
    sink: Arc<RecordingSink>,
    shared: Shared,
}

fn small_chunks() -> PipelineConfig {
    PipelineConfig {
        chunk_size: 20,
        summarize_threshold: 30,
        chunk_timeout: None,
        include_descriptions: true,
    }
}

fn harness(replies: Vec<Reply>) -> Harness {
    build(
        replies,
        true,
        Arc::new(NomnomlValidator),
        None,
        small_chunks(),
    )
}

fn build(
    replies: Vec<Reply>,
    available: bool,
    renderer: Arc<dyn DiagramRenderer>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: PipelineConfig,
) -> Harness {
    build_with_delay(replies, available, renderer, summarizer, config, Duration::ZERO)
}

fn build_with_delay(
    replies: Vec<Reply>,
    available: bool,
    renderer: Arc<dyn DiagramRenderer>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: PipelineConfig,
    capabilities_delay: Duration,
) -> Harness {
    let shared = script(replies);
    let sink = Arc::new(RecordingSink::default());
    let generator = Arc::new(ScriptedService {
        shared: shared.clone(),
        available,
        capabilities_delay,
    });
    let pipeline = Arc::new(Pipeline::new(
        generator,
        summarizer,
        renderer,
        sink.clone(),
        GenerationSettings::default(),
        config,
    ));
    Harness {
        pipeline,
        sink,
        shared,
    }
}

// 28 characters: two chunks of at most 20.
const TWO_CHUNK_TEXT: &str = "Alice met Bob. Bob met Carol";

fn source(text: &str) -> InlineTextSource {
    InlineTextSource::new("doc", text)
}

async fn analyze(harness: &Harness, text: &str) -> Result<relmap::pipeline::RunReport, PipelineError> {
    harness
        .pipeline
        .analyze(&source(text), AnalyzeOptions::default(), CancellationToken::new())
        .await
}

fn stats_events(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ProgressEvent::Stats { .. }))
        .count()
}

fn finished(events: &[ProgressEvent]) -> Option<bool> {
    events.iter().rev().find_map(|event| match event {
        ProgressEvent::Finished { succeeded, .. } => Some(*succeeded),
        _ => None,
    })
}

#[tokio::test]
async fn aggregates_relationships_across_chunks() {
    let h = harness(vec![
        Reply::Snapshots(vec!["Alice to", "Alice to Bob (friends)"]),
        Reply::Snapshots(vec![
            "Bob to Carol (colleagues)",
            "Bob to Carol (colleagues)\nAlice to Bob (friends)\nnot a relationship",
        ]),
    ]);

    let report = analyze(&h, TWO_CHUNK_TEXT).await.unwrap();
    assert_eq!(report.source_id, "doc");
    assert_eq!(report.chunks_total, 2);
    assert_eq!(report.chunks_completed, 2);
    assert_eq!(report.records_added, 3);
    assert_eq!(report.render_failures, 0);
    assert!(report.transcript.contains("Chunk 2 results:"));

    // Records are not deduplicated, so "Alice to Bob" counts twice.
    let snapshot = h.pipeline.export().await;
    assert_eq!(snapshot.records.len(), 3);
    let ranked: Vec<(String, u64)> = h
        .pipeline
        .entities()
        .await
        .into_iter()
        .map(|entity| (entity.name, entity.occurrence_count))
        .collect();
    assert_eq!(
        ranked,
        vec![
            ("Bob".to_string(), 3),
            ("Alice".to_string(), 2),
            ("Carol".to_string(), 1),
        ]
    );
    let alice = snapshot
        .entities
        .iter()
        .find(|entity| entity.name == "Alice")
        .unwrap();
    assert_eq!(alice.first_source.as_deref(), Some("doc#chunk-1"));

    let diagram = h.pipeline.current_diagram().await.unwrap();
    // Three entities plus one note declaration per record.
    assert_eq!(diagram.node_count, 3 + 3);
    assert_eq!(diagram.edge_count, 6);
    assert_eq!(h.pipeline.phase(), RunPhase::Idle);

    let events = h.sink.events();
    assert!(matches!(events.first(), Some(ProgressEvent::Loading { .. })));
    assert_eq!(stats_events(&events), 1);
    assert_eq!(finished(&events), Some(true));
    assert!(report.stats.is_some_and(|stats| stats.tokens_used == 20));
}

#[tokio::test]
async fn later_snapshots_replace_earlier_ones() {
    let h = harness(vec![Reply::Snapshots(vec![
        "Alice to Bob (fri",
        "Alice to Bob (friends)",
        "Alice to Bob (friends)\nBob to Dan (rivals)",
    ])]);

    let report = analyze(&h, "short text").await.unwrap();
    assert_eq!(report.records_added, 2);

    let partials: Vec<String> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::ChunkProgress { partial, .. } => Some(partial),
            _ => None,
        })
        .collect();
    assert_eq!(partials.len(), 3);
    assert_eq!(partials[0], "Alice to Bob (fri");
    assert_eq!(
        partials.last().map(String::as_str),
        Some("Alice to Bob (friends)\nBob to Dan (rivals)")
    );
}

#[tokio::test]
async fn invalid_session_is_recreated_once() {
    let h = harness(vec![
        Reply::Invalid,
        Reply::Snapshots(vec!["Alice to Bob (friends)"]),
    ]);

    let report = analyze(&h, "short text").await.unwrap();
    assert_eq!(report.records_added, 1);

    let shared = h.shared.lock().unwrap();
    assert_eq!(shared.created.len(), 2);
    assert_eq!(shared.destroyed, 1);
    // The same chunk prompt is retried verbatim.
    assert_eq!(shared.prompts.len(), 2);
    assert_eq!(shared.prompts[0], shared.prompts[1]);
}

#[tokio::test]
async fn invalid_session_twice_fails_the_run() {
    let h = harness(vec![Reply::Invalid, Reply::Invalid]);

    let err = analyze(&h, "short text").await.unwrap_err();
    assert!(matches!(err, PipelineError::SessionInvalid(_)));
    assert_eq!(h.shared.lock().unwrap().created.len(), 2);
    assert_eq!(h.pipeline.phase(), RunPhase::Failed);

    let events = h.sink.events();
    assert_eq!(finished(&events), Some(false));
    assert!(events.iter().any(|event| matches!(
        event,
        ProgressEvent::Error {
            context: ErrorContext::Generation,
            ..
        }
    )));
}

#[tokio::test]
async fn generation_failure_keeps_earlier_chunks() {
    let h = harness(vec![
        Reply::Snapshots(vec!["Alice to Bob (friends)"]),
        Reply::Fail,
    ]);

    let err = analyze(&h, TWO_CHUNK_TEXT).await.unwrap_err();
    match err {
        PipelineError::Generation { chunk, total, source } => {
            assert_eq!((chunk, total), (2, 2));
            assert!(matches!(source, GenerationError::Failure(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    let snapshot = h.pipeline.export().await;
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(stats_events(&h.sink.events()), 1);
    assert!(h.pipeline.last_stats().await.is_some());
}

#[tokio::test]
async fn render_failures_do_not_abort_the_run() {
    let h = build(
        vec![
            Reply::Snapshots(vec!["Alice to Bob (friends)"]),
            Reply::Snapshots(vec!["Bob to Carol (colleagues)"]),
        ],
        true,
        Arc::new(RejectingRenderer),
        None,
        small_chunks(),
    );

    let report = analyze(&h, TWO_CHUNK_TEXT).await.unwrap();
    assert_eq!(report.chunks_completed, 2);
    assert_eq!(report.render_failures, 2);
    assert_eq!(h.pipeline.export().await.records.len(), 2);
    assert!(h.pipeline.current_diagram().await.is_none());

    let render_errors = h
        .sink
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                ProgressEvent::Error {
                    context: ErrorContext::Rendering,
                    ..
                }
            )
        })
        .count();
    assert_eq!(render_errors, 2);

    let view = h.pipeline.render_view(Some(false)).await;
    assert!(view.diagram.is_none());
    assert!(view.render_error.is_some());
    assert_eq!(view.records.len(), 2);
}

#[tokio::test]
async fn cancellation_stops_a_hanging_stream() {
    let h = harness(vec![Reply::Hang("Alice to")]);
    let cancel = CancellationToken::new();
    let mut phase = h.pipeline.subscribe_phase();

    let pipeline = h.pipeline.clone();
    let token = cancel.clone();
    let run = tokio::spawn(async move {
        pipeline
            .analyze(&source("short text"), AnalyzeOptions::default(), token)
            .await
    });

    phase
        .wait_for(|phase| *phase == RunPhase::Generating)
        .await
        .unwrap();
    assert!(h.pipeline.cancel_current().await);

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(!h.pipeline.cancel_current().await);

    let events = h.sink.events();
    assert_eq!(finished(&events), Some(false));
    assert_eq!(stats_events(&events), 1);
}

#[tokio::test]
async fn slow_chunks_time_out() {
    let config = PipelineConfig {
        chunk_timeout: Some(Duration::from_millis(50)),
        ..small_chunks()
    };
    let h = build(
        vec![Reply::Hang("Alice to")],
        true,
        Arc::new(NomnomlValidator),
        None,
        config,
    );

    let err = analyze(&h, "short text").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Generation {
            source: GenerationError::Timeout(_),
            ..
        }
    ));
}

#[tokio::test]
async fn missing_generation_service_leaves_state_alone() {
    let h = build(
        vec![],
        false,
        Arc::new(NomnomlValidator),
        None,
        small_chunks(),
    );
    let mut previous = relmap::pipeline::AggregationStore::new();
    previous.merge(
        relmap::pipeline::parse_relationships("Alice to Bob (friends)", None),
        None,
    );
    h.pipeline.import(previous.export()).await;

    let err = analyze(&h, "short text").await.unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedEnvironment(_)));
    assert_eq!(h.pipeline.export().await.records.len(), 1);
    assert!(h.shared.lock().unwrap().created.is_empty());
}

#[tokio::test]
async fn summarization_failure_falls_back_to_full_text() {
    let long_text = "Alice met Bob at the lab and later Bob hired Carol";
    let h = build(
        vec![
            Reply::Snapshots(vec!["Alice to Bob (met)"]),
            Reply::Snapshots(vec![]),
            Reply::Snapshots(vec!["Bob to Carol (hired)"]),
        ],
        true,
        Arc::new(NomnomlValidator),
        Some(Arc::new(FixedSummarizer(Err("summary service down")))),
        small_chunks(),
    );

    let report = h
        .pipeline
        .analyze(
            &source(long_text),
            AnalyzeOptions { summarize: true },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.chunks_total, 3);
    assert_eq!(report.records_added, 2);
    assert!(h.sink.events().iter().any(|event| matches!(
        event,
        ProgressEvent::Error {
            context: ErrorContext::Summarization,
            ..
        }
    )));
}

#[tokio::test]
async fn summary_replaces_long_input() {
    let long_text = "Alice met Bob at the lab and later Bob hired Carol";
    let h = build(
        vec![Reply::Snapshots(vec!["Bob to Carol (hired)"])],
        true,
        Arc::new(NomnomlValidator),
        Some(Arc::new(FixedSummarizer(Ok("Bob hired Carol")))),
        small_chunks(),
    );

    let report = h
        .pipeline
        .analyze(
            &source(long_text),
            AnalyzeOptions { summarize: true },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.chunks_total, 1);
    assert!(h.shared.lock().unwrap().prompts[0].contains("Bob hired Carol"));
}

#[tokio::test]
async fn settings_changes_recreate_the_session() {
    let h = harness(vec![
        Reply::Snapshots(vec!["Alice to Bob (friends)"]),
        Reply::Snapshots(vec!["Alice to Bob (friends)"]),
        Reply::Snapshots(vec!["Alice to Bob (friends)"]),
    ]);

    analyze(&h, "short text").await.unwrap();
    analyze(&h, "short text").await.unwrap();
    assert_eq!(h.shared.lock().unwrap().created.len(), 1);

    h.pipeline
        .update_settings(GenerationSettings {
            temperature: 0.9,
            top_k: 500,
        })
        .await;
    analyze(&h, "short text").await.unwrap();

    let shared = h.shared.lock().unwrap();
    assert_eq!(shared.created.len(), 2);
    assert_eq!(shared.destroyed, 1);
    // top_k is capped by the service capabilities.
    assert_eq!(shared.created[1].top_k, 64);
}

#[tokio::test]
async fn a_new_run_starts_from_an_empty_store() {
    let h = harness(vec![
        Reply::Snapshots(vec!["Alice to Bob (friends)"]),
        Reply::Snapshots(vec!["Carol to Dan (siblings)"]),
    ]);

    analyze(&h, "first").await.unwrap();
    h.pipeline.select_entity("Alice").await;
    analyze(&h, "second").await.unwrap();

    let snapshot = h.pipeline.export().await;
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].entity_a, "Carol");
    assert_eq!(snapshot.selected_entity, None);
}

#[tokio::test]
async fn selection_filters_the_view() {
    let h = harness(vec![Reply::Snapshots(vec![
        "Alice to Bob (friends)\nBob to Carol (colleagues)\nDan to Eve (siblings)",
    ])]);
    analyze(&h, "short text").await.unwrap();

    let view = h.pipeline.select_entity("Bob").await;
    assert_eq!(view.selected_entity.as_deref(), Some("Bob"));
    assert_eq!(view.records.len(), 2);
    assert!(view.diagram.is_some());
    assert_eq!(h.pipeline.selected_entity().await.as_deref(), Some("Bob"));

    let unknown = h.pipeline.select_entity("Zed").await;
    assert!(unknown.records.is_empty());
    assert!(h.pipeline.relationships_for("Zed").await.is_empty());
    assert_eq!(h.pipeline.relationships_for("Eve").await.len(), 1);

    let all = h.pipeline.clear_selection().await;
    assert_eq!(all.records.len(), 3);
    assert_eq!(all.selected_entity, None);
    assert_eq!(h.pipeline.selected_entity().await, None);

    let without_notes = h.pipeline.render_view(Some(false)).await;
    assert!(!without_notes.description.contains("[<note>"));
    assert!(!h.pipeline.include_descriptions());
}

#[tokio::test]
async fn a_second_run_is_refused_while_one_is_starting() {
    let h = build_with_delay(
        vec![
            Reply::Snapshots(vec!["Alice to Bob (friends)"]),
            Reply::Snapshots(vec!["Carol to Dan (siblings)"]),
        ],
        true,
        Arc::new(NomnomlValidator),
        None,
        small_chunks(),
        Duration::from_millis(300),
    );

    let claim = h.pipeline.try_claim_run().unwrap();
    assert!(h.pipeline.is_running());
    assert!(h.pipeline.try_claim_run().is_none());

    let pipeline = h.pipeline.clone();
    let first = tokio::spawn(async move {
        pipeline
            .analyze_claimed(
                claim,
                &source("short text"),
                AnalyzeOptions::default(),
                CancellationToken::new(),
            )
            .await
    });

    // Still waiting on the generation service, but no longer idle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.pipeline.phase(), RunPhase::Chunking);

    let err = analyze(&h, "short text").await.unwrap_err();
    assert!(matches!(err, PipelineError::Busy));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.records_added, 1);
    assert!(!h.pipeline.is_running());
    assert_eq!(h.pipeline.export().await.records[0].entity_a, "Alice");

    // The claim is released once the run finishes.
    analyze(&h, "short text").await.unwrap();
    assert_eq!(h.pipeline.export().await.records[0].entity_a, "Carol");
}
