// Toolforge Library
// Self-extending agent core: synthesizes, verifies and registers new tools
// at runtime, then learns multi-step patterns from how they get used.

pub mod config;
pub mod errors;
pub mod events;
pub mod types;
pub mod utils;

// Adapter boundaries to external collaborators
pub mod oracle;
pub mod sandbox;
pub mod session;
pub mod store;

// Orchestration core
pub mod composition;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod promotion;
pub mod responder;
pub mod synthesis;
pub mod tracker;

// Re-export the main entry points
pub use crate::config::AgentConfig;
pub use crate::errors::{AgentError, AgentResult};
pub use crate::events::{CancellationFlag, EventLog, ProgressEvent, ProgressSink};
pub use crate::orchestrator::{AgentResponse, Orchestrator};

/// Install the default tracing subscriber, filtered by `RUST_LOG`
/// (`toolforge=debug` is a useful starting point). Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
