//! Ollama generation backend.
//!
//! Talks to Ollama's native `/api/chat` endpoint, which streams one JSON
//! object per line. Serves every model id carrying a tag separator
//! (`llama3.1:8b`, `gpt-oss:20b`).

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use parley_core::llm::{GenerationBackend, GenerationStream, ModelMatcher};
use parley_core::tools::ResolvedTools;
use parley_observe::genai_attrs;
use parley_types::llm::{GenerationEvent, GenerationRequest, LlmError};

use super::errors::{error_for_status, map_reqwest_error};
use super::tool_calls::{MAX_TOOL_ROUNDS, run_tool_call};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// One line of the `/api/chat` stream.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    matcher: ModelMatcher,
    models: Vec<String>,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let base_url: String = base_url.into();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            matcher: ModelMatcher::Contains(':'),
            models: vec!["llama3.1:8b".into(), "qwen2.5:7b".into()],
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn matcher(&self) -> &ModelMatcher {
        &self.matcher
    }

    fn known_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn generate(
        &self,
        request: GenerationRequest,
        tools: ResolvedTools,
        cancel: CancellationToken,
    ) -> GenerationStream {
        let client = self.client.clone();
        let url = format!("{}/api/chat", self.base_url);
        let span = tracing::info_span!(
            "gen_ai.chat",
            { genai_attrs::GEN_AI_OPERATION_NAME } = genai_attrs::OP_CHAT,
            { genai_attrs::GEN_AI_PROVIDER_NAME } = "ollama",
            { genai_attrs::GEN_AI_REQUEST_MODEL } = %request.model,
        );

        Box::pin(async_stream::try_stream! {
            let mut messages = build_messages(&request);
            let mut round = 0usize;

            loop {
                let offer_tools = !tools.is_empty() && round < MAX_TOOL_ROUNDS;
                let body = build_body(&request, &tools, &messages, offer_tools);

                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(LlmError::Cancelled),
                    sent = client.post(&url).json(&body).send().instrument(span.clone()) => {
                        sent.map_err(map_reqwest_error)
                    }
                };
                let response = match sent? {
                    response if response.status().is_success() => response,
                    response => {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        Err(error_for_status(status.as_u16(), format!("HTTP {status}: {text}")))?
                    }
                };

                let mut lines = map_ndjson_stream(response);
                let mut calls: Vec<OllamaToolCall> = Vec::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Some(Err(LlmError::Cancelled)),
                        next = lines.next() => next,
                    };
                    match next {
                        Some(Ok(chunk)) => {
                            if let Some(error) = chunk.error {
                                Err::<(), _>(LlmError::Provider { message: error })?;
                            }
                            if let Some(message) = chunk.message {
                                if !message.content.is_empty() {
                                    yield GenerationEvent::TextDelta { text: message.content };
                                }
                                calls.extend(message.tool_calls);
                            }
                            if chunk.done {
                                break;
                            }
                        }
                        Some(Err(e)) => Err(e)?,
                        None => Err(LlmError::Stream(
                            "ollama stream ended without a done marker".to_string(),
                        ))?,
                    }
                }

                if calls.is_empty() {
                    break;
                }
                if !offer_tools {
                    Err::<(), _>(LlmError::UnsupportedCapability(format!(
                        "model requested tools that were not offered (round {round})"
                    )))?;
                }

                round += 1;
                span.in_scope(|| tracing::debug!(round, calls = calls.len(), "Running tool calls"));
                messages.push(json!({ "role": "assistant", "content": "", "tool_calls": calls }));
                for (i, call) in calls.iter().enumerate() {
                    let call_id = format!("ollama_{round}_{i}");
                    yield GenerationEvent::ToolCall { name: call.function.name.clone() };
                    let content = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(LlmError::Cancelled),
                        content = run_tool_call(
                            &tools,
                            &call.function.name,
                            &call_id,
                            call.function.arguments.clone(),
                        )
                        .instrument(span.clone()) => Ok(content),
                    }?;
                    messages.push(json!({
                        "role": "tool",
                        "tool_name": call.function.name,
                        "content": content,
                    }));
                }
            }

            yield GenerationEvent::Done;
        })
    }
}

fn build_messages(request: &GenerationRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for msg in &request.messages {
        messages.push(json!({ "role": msg.role.to_string(), "content": msg.content }));
    }
    messages
}

fn build_body(
    request: &GenerationRequest,
    tools: &ResolvedTools,
    messages: &[Value],
    offer_tools: bool,
) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
    });

    let mut options = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        options.insert("temperature".into(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".into(), json!(max_tokens));
    }
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }

    if offer_tools {
        body["tools"] = tools
            .specs()
            .into_iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters_schema,
                    }
                })
            })
            .collect();
    }
    body
}

/// Split a response body into parsed lines. Lines may straddle chunks.
fn map_ndjson_stream(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send + 'static>> {
    Box::pin(async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(parsed) = parse_line(&line)? {
                    yield parsed;
                }
            }
        }

        if let Some(parsed) = parse_line(&buffer)? {
            yield parsed;
        }
    })
}

fn parse_line(line: &[u8]) -> Result<Option<ChatChunk>, LlmError> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| LlmError::Deserialization(format!("invalid ollama stream line: {e}")))
}
