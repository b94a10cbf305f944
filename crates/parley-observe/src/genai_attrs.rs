//! OpenTelemetry GenAI Semantic Convention attribute names.
//!
//! Usable as field names in `tracing::info_span!` and `tracing::debug_span!`.
//! Span naming convention: `"{operation} {model}"` (e.g. `"chat gpt-4o-mini"`).

// --- Required attributes ---

/// The name of the operation being performed (e.g., "chat", "execute_tool").
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The backend serving the request (e.g., "gemini").
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

// --- Recommended attributes ---

/// The model ID requested (e.g., "gemini-2.5-flash").
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";

pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// The finish reasons for the response (e.g., "stop", "tool_calls").
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

// --- Agent and session attributes ---

/// The configured agent answering the request.
pub const GEN_AI_AGENT_ID: &str = "gen_ai.agent.id";

/// The conversation (session token) the request belongs to.
pub const GEN_AI_CONVERSATION_ID: &str = "gen_ai.conversation.id";

// --- Tool attributes ---

/// Canonical name of the tool being invoked.
pub const GEN_AI_TOOL_NAME: &str = "gen_ai.tool.name";

/// Provider-issued id of the tool call.
pub const GEN_AI_TOOL_CALL_ID: &str = "gen_ai.tool.call.id";

// --- Operation name values ---

/// Chat completion.
pub const OP_CHAT: &str = "chat";

/// Tool invocation on behalf of the model.
pub const OP_EXECUTE_TOOL: &str = "execute_tool";
