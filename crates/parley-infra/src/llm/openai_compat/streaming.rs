//! OpenAI SSE stream to per-turn event adapter.
//!
//! Maps `async-openai`'s [`ChatCompletionResponseStream`] into text fragments
//! and, when the model asks for tools, one batch of assembled tool calls.
//!
//! Tool call arguments arrive as partial JSON fragments across chunks, keyed
//! by tool call index. They are accumulated and emitted together when a
//! `tool_calls` finish reason arrives or the stream ends.

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use async_openai::types::chat::{ChatCompletionResponseStream, FinishReason};

use parley_types::llm::LlmError;

/// A tool call the model issued, with its arguments still as raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// What one model turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Text(String),
    /// Emitted at most once per turn, ordered by tool call index.
    ToolCalls(Vec<PendingToolCall>),
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

fn drain_accumulators(accumulators: &mut HashMap<u32, ToolCallAccumulator>) -> Vec<PendingToolCall> {
    let mut indices: Vec<u32> = accumulators.keys().copied().collect();
    indices.sort_unstable();
    indices
        .into_iter()
        .filter_map(|idx| accumulators.remove(&idx))
        .map(|acc| PendingToolCall {
            id: acc.id,
            name: acc.name,
            arguments: acc.json_buffer,
        })
        .collect()
}

/// Map an async-openai [`ChatCompletionResponseStream`] to [`TurnEvent`]s.
pub fn map_openai_stream(
    stream: ChatCompletionResponseStream,
) -> Pin<Box<dyn Stream<Item = Result<TurnEvent, LlmError>> + Send + 'static>> {
    Box::pin(async_stream::try_stream! {
        let mut accumulators: HashMap<u32, ToolCallAccumulator> = HashMap::new();
        let mut stream = stream;

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(super::map_openai_error)?;

            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        yield TurnEvent::Text(text);
                    }
                }

                for tc in choice.delta.tool_calls.unwrap_or_default() {
                    let acc = accumulators.entry(tc.index).or_default();
                    if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
                        acc.id = id;
                    }
                    if let Some(function) = tc.function {
                        if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                            acc.name = name;
                        }
                        if let Some(arguments) = function.arguments {
                            acc.json_buffer.push_str(&arguments);
                        }
                    }
                }

                if matches!(choice.finish_reason, Some(FinishReason::ToolCalls))
                    && !accumulators.is_empty()
                {
                    yield TurnEvent::ToolCalls(drain_accumulators(&mut accumulators));
                }
            }
        }

        // Some OpenAI-compatible servers end the stream without a finish reason.
        if !accumulators.is_empty() {
            yield TurnEvent::ToolCalls(drain_accumulators(&mut accumulators));
        }
    })
}
