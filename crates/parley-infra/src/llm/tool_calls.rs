//! Tool execution between model turns.

use serde_json::{Value, json};
use tracing::Instrument;

use parley_core::tools::ResolvedTools;
use parley_observe::genai_attrs;

/// Tool-call rounds allowed per generation. The turn after the last round is
/// sent without tools so the model has to answer in text.
pub const MAX_TOOL_ROUNDS: usize = 8;

/// Payload handed back to the model in place of a tool result.
pub(crate) fn error_payload(message: impl std::fmt::Display) -> String {
    json!({ "error": message.to_string() }).to_string()
}

/// Run one tool call and render its result for the model.
///
/// Failures are rendered with [`error_payload`] so the model can recover.
pub(crate) async fn run_tool_call(
    tools: &ResolvedTools,
    name: &str,
    call_id: &str,
    args: Value,
) -> String {
    let span = tracing::info_span!(
        "gen_ai.execute_tool",
        { genai_attrs::GEN_AI_OPERATION_NAME } = genai_attrs::OP_EXECUTE_TOOL,
        { genai_attrs::GEN_AI_TOOL_NAME } = %name,
        { genai_attrs::GEN_AI_TOOL_CALL_ID } = %call_id,
    );

    async {
        match tools.invoke(name, args).await {
            Ok(Value::String(text)) => text,
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Tool call failed");
                error_payload(e)
            }
        }
    }
    .instrument(span)
    .await
}
