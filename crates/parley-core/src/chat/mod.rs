//! The chat use case and its per-request context.

pub mod context;
pub mod orchestrator;

pub use context::RequestContext;
pub use orchestrator::{ChatOrchestrator, ChatResult, ChatStream};
