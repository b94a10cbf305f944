//! Backend abstraction, routing, and retry.

pub mod backend;
pub mod matcher;
pub mod retry;
pub mod router;

pub use backend::{GenerationBackend, GenerationStream};
pub use matcher::ModelMatcher;
pub use retry::{classify, RetryPolicy};
pub use router::BackendRouter;
