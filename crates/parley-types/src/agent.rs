//! Agent configuration as seen by the chat engine.

use serde::{Deserialize, Serialize};

/// A configured agent: which model answers, with what instruction and tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: i64,
    /// Owner of the agent. `None` means every user may chat with it.
    #[serde(default)]
    pub owner_id: Option<String>,
    pub model: String,
    /// System prompt sent with every request.
    #[serde(default)]
    pub instruction: String,
    /// Declared tool names; resolved best-effort per request.
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub extended_retrieval_enabled: bool,
}

impl AgentConfig {
    /// Whether `user_id` may use this agent.
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.owner_id.as_deref().is_none_or(|owner| owner == user_id)
    }
}
