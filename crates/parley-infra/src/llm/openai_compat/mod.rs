//! OpenAI-compatible generation backend.
//!
//! A single [`OpenAiCompatibleBackend`] serves OpenAI, Google Gemini, and
//! self-hosted OpenAI-compatible servers via configurable base URLs and
//! factory functions.
//!
//! Uses [`async_openai`] for transport and SSE streaming. Tool calls are run
//! here, between model turns; callers see text plus a `ToolCall` marker
//! ahead of each invocation.

pub mod config;
pub mod streaming;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::CreateChatCompletionRequest;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use parley_core::llm::{GenerationBackend, GenerationStream, ModelMatcher};
use parley_core::tools::ResolvedTools;
use parley_observe::genai_attrs;
use parley_types::llm::{GenerationEvent, GenerationRequest, LlmError, MessageRole};

use self::config::OpenAiCompatConfig;
use self::streaming::{PendingToolCall, TurnEvent, map_openai_stream};
use super::errors::error_for_status;
use super::tool_calls::{MAX_TOOL_ROUNDS, error_payload, run_tool_call};

/// Generation backend for any OpenAI-compatible API.
///
/// Does NOT derive Debug: the `async_openai::Client` holds the API key.
pub struct OpenAiCompatibleBackend {
    client: Client<OpenAIConfig>,
    name: String,
    matcher: ModelMatcher,
    models: Vec<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: OpenAiCompatConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.expose_secret())
            .with_api_base(&config.base_url);

        Self {
            client: Client::with_config(openai_config),
            name: config.backend_name,
            matcher: config.matcher,
            models: config.models,
        }
    }

    /// OpenAI at `https://api.openai.com/v1`.
    pub fn openai(api_key: SecretString) -> Self {
        Self::new(config::openai_defaults(api_key))
    }

    /// Google Gemini through its OpenAI-compatible endpoint.
    pub fn gemini(api_key: SecretString) -> Self {
        Self::new(config::gemini_defaults(api_key))
    }

    /// Self-hosted server at `base_url` serving the `local-custom` model.
    pub fn local(base_url: &str) -> Self {
        Self::new(config::local_defaults().with_base_url(base_url))
    }
}

impl GenerationBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.name
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
        let span = tracing::info_span!(
            "gen_ai.chat",
            { genai_attrs::GEN_AI_OPERATION_NAME } = genai_attrs::OP_CHAT,
            { genai_attrs::GEN_AI_PROVIDER_NAME } = %self.name,
            { genai_attrs::GEN_AI_REQUEST_MODEL } = %request.model,
            { genai_attrs::GEN_AI_REQUEST_MAX_TOKENS } = ?request.max_tokens,
            { genai_attrs::GEN_AI_REQUEST_TEMPERATURE } = ?request.temperature,
        );

        Box::pin(async_stream::try_stream! {
            let mut messages = build_messages(&request);
            let mut round = 0usize;

            loop {
                let offer_tools = !tools.is_empty() && round < MAX_TOOL_ROUNDS;
                let oai_request = build_request(&request, &tools, &messages, offer_tools)?;

                let chat = client.chat();
                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(LlmError::Cancelled),
                    opened = chat.create_stream(oai_request).instrument(span.clone()) => {
                        opened.map_err(map_openai_error)
                    }
                };
                let mut turn = map_openai_stream(opened?);

                let mut calls = Vec::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Some(Err(LlmError::Cancelled)),
                        next = turn.next() => next,
                    };
                    match next {
                        Some(Ok(TurnEvent::Text(text))) => yield GenerationEvent::TextDelta { text },
                        Some(Ok(TurnEvent::ToolCalls(pending))) => calls = pending,
                        Some(Err(e)) => Err(e)?,
                        None => break,
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
                messages.push(assistant_tool_call_message(&calls));
                for call in &calls {
                    yield GenerationEvent::ToolCall { name: call.name.clone() };
                    let content = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(LlmError::Cancelled),
                        content = render_tool_call(&tools, call).instrument(span.clone()) => Ok(content),
                    }?;
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call.id,
                        "content": content,
                    }));
                }
            }

            yield GenerationEvent::Done;
        })
    }
}

/// Conversation as chat-completions message objects.
fn build_messages(request: &GenerationRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for msg in &request.messages {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": msg.content }));
    }
    messages
}

/// Build the typed request from JSON so tool-call turns can be replayed
/// without depending on the exact shape of the typed message structs.
fn build_request(
    request: &GenerationRequest,
    tools: &ResolvedTools,
    messages: &[Value],
    offer_tools: bool,
) -> Result<CreateChatCompletionRequest, LlmError> {
    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_completion_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if offer_tools {
        let specs: Vec<Value> = tools
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
        body["tools"] = Value::Array(specs);
    }

    serde_json::from_value(body)
        .map_err(|e| LlmError::InvalidRequest(format!("failed to build chat request: {e}")))
}

fn assistant_tool_call_message(calls: &[PendingToolCall]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|call| {
            json!({
                "id": call.id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments },
            })
        })
        .collect();
    json!({ "role": "assistant", "tool_calls": tool_calls })
}

/// Parse the streamed argument text, then run the call.
async fn render_tool_call(tools: &ResolvedTools, call: &PendingToolCall) -> String {
    let args: Value = if call.arguments.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool call arguments are not valid JSON");
                return error_payload(format!("invalid arguments: {e}"));
            }
        }
    };
    run_tool_call(tools, &call.name, &call.id, args).await
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || code == "invalid_api_key"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("API key not valid")
            {
                LlmError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                LlmError::RateLimited {
                    retry_after_ms: None,
                }
            } else if code == "context_length_exceeded"
                || api_err.message.contains("maximum context length")
            {
                LlmError::ContextLengthExceeded {
                    max: 0,
                    requested: 0,
                }
            } else if code == "server_error" || error_type == "overloaded_error" {
                LlmError::Overloaded(api_err.message.clone())
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status() {
            Some(status) => error_for_status(status.as_u16(), err.to_string()),
            None if reqwest_err.is_timeout() => LlmError::Network(err.to_string()),
            None if reqwest_err.is_connect() || reqwest_err.is_request() => {
                LlmError::Network(err.to_string())
            }
            None => LlmError::Provider {
                message: err.to_string(),
            },
        },
        OpenAIError::JSONDeserialize(_, content) => {
            LlmError::Deserialization(format!("failed to parse response: {content}"))
        }
        OpenAIError::StreamError(stream_err) => {
            let message = stream_err.to_string();
            match status_in_message(&message) {
                Some(status) => error_for_status(status, message),
                None => LlmError::Stream(message),
            }
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg.clone()),
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}

/// SSE failures on open only carry the status inside their message
/// ("Invalid status code: 429 Too Many Requests").
fn status_in_message(message: &str) -> Option<u16> {
    let (_, rest) = message.split_once("status code: ")?;
    rest.get(..3)?.parse().ok()
}
