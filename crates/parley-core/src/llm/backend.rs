//! GenerationBackend trait definition.
//!
//! Every backend exposes one streaming contract: a lazy sequence of text
//! fragments ending in `Done`. Tool calls are resolved inside the backend;
//! callers only see a `ToolCall` marker ahead of each invocation.
//!
//! The trait is object-safe (the stream is boxed, nothing is RPITIT) so the
//! router can hold `Arc<dyn GenerationBackend>` without a wrapper type.

use std::pin::Pin;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use parley_types::llm::{GenerationEvent, GenerationRequest, LlmError};

use super::matcher::ModelMatcher;
use crate::tools::ResolvedTools;

/// Boxed event stream returned by [`GenerationBackend::generate`].
pub type GenerationStream =
    Pin<Box<dyn Stream<Item = Result<GenerationEvent, LlmError>> + Send + 'static>>;

/// A generation provider (OpenAI, Gemini, Ollama, a local endpoint).
///
/// Implementations live in parley-infra (e.g., `OpenAiCompatibleBackend`).
pub trait GenerationBackend: Send + Sync {
    /// Backend name used for routing errors and logs (e.g., "openai").
    fn name(&self) -> &str;

    /// Which model identifiers this backend serves.
    fn matcher(&self) -> &ModelMatcher;

    fn matches(&self, model: &str) -> bool {
        self.matcher().matches(model)
    }

    /// Model identifiers advertised in `UnsupportedModel` errors.
    fn known_models(&self) -> Vec<String>;

    /// Whether `generate` stops promptly when `cancel` fires. Backends that
    /// return `false` are drained to completion after a disconnect.
    fn supports_cancellation(&self) -> bool {
        true
    }

    /// Start a generation. The stream is lazy; nothing is sent until polled.
    fn generate(
        &self,
        request: GenerationRequest,
        tools: ResolvedTools,
        cancel: CancellationToken,
    ) -> GenerationStream;
}

/// Poll a fresh stream for its first event.
///
/// Returns the event together with the rest of the stream. A `ToolCall`
/// marker counts as an event, so an attempt never spans a tool invocation.
/// A stream that ends before producing anything is reported as
/// [`LlmError::Stream`].
pub async fn prime(
    mut stream: GenerationStream,
) -> Result<(GenerationEvent, GenerationStream), LlmError> {
    use futures_util::StreamExt;

    match stream.next().await {
        Some(Ok(event)) => Ok((event, stream)),
        Some(Err(e)) => Err(e),
        None => Err(LlmError::Stream(
            "stream ended before producing any event".to_string(),
        )),
    }
}
