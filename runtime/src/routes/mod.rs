pub mod analysis;
pub mod events;
pub mod graph;
pub mod health;
pub mod session;

pub mod types;

pub use analysis::analysis_routes;
pub use events::event_routes;
pub use graph::graph_routes;
pub use health::health_routes;
pub use session::session_routes;
