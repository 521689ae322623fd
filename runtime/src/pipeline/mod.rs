pub mod aggregation;
pub mod chunker;
pub mod diagram;
pub mod extractor;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod types;

pub mod utils;

pub use aggregation::AggregationStore;
pub use chunker::{Chunk, ChunkConfig, Chunker, Chunks};
pub use diagram::{DiagramStyle, synthesize};
pub use extractor::{FileTextSource, InlineTextSource, SourceDocument, TextSource};
pub use parser::parse_relationships;
pub use pipeline::{
    AnalyzeOptions, GraphView, Pipeline, PipelineConfig, RunClaim, RunPhase, RunReport,
};
pub use progress::{BroadcastProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use renderer::{CommandRenderer, DiagramRenderer, NomnomlValidator, RenderedDiagram};
pub use types::{EntityRecord, RelationshipRecord, SessionSnapshot};
