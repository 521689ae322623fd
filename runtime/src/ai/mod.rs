pub mod prompts;
pub mod responses;
pub mod session;

pub use responses::{ClientOptions, ResponsesClient};
pub use session::{
    Capabilities, GenerationService, GenerationSession, GenerationSettings, SessionStats,
    SnapshotStream, Summarizer,
};
