//! Chat session, message, and request/response types.
//!
//! A session is an ordered, append-only conversation owned by one user and
//! bound to one agent. Messages are immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::llm::MessageRole;

/// A conversation between a user and an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Opaque, non-sequential token.
    pub session_id: String,
    pub user_id: String,
    pub agent_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ChatSession {
    /// Start a fresh session with a newly generated token.
    pub fn new(user_id: impl Into<String>, agent_id: i64) -> Self {
        Self::with_id(new_session_token(), user_id, agent_id)
    }

    /// Start a fresh session under a caller-chosen token.
    pub fn with_id(session_id: impl Into<String>, user_id: impl Into<String>, agent_id: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            agent_id,
            created_at: now,
            last_activity_at: now,
        }
    }
}

/// Generate an opaque session token (random UUID v4, hyphenated).
pub fn new_session_token() -> String {
    Uuid::new_v4().to_string()
}

/// A single turn within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// An inbound chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Existing session to continue. Absent or empty starts a new one.
    #[serde(default)]
    pub session_id: Option<String>,
    pub agent_id: i64,
    pub message: String,
    /// Replaces the agent's configured model for this request only.
    #[serde(default)]
    pub model_override: Option<String>,
}

impl ChatRequest {
    pub fn new(agent_id: i64, message: impl Into<String>) -> Self {
        Self {
            session_id: None,
            agent_id,
            message: message.into(),
            model_override: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    /// The session token to continue, treating an empty string as absent.
    pub fn requested_session(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The model override, treating an empty string as absent.
    pub fn requested_model(&self) -> Option<&str> {
        self.model_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// The buffered result of a completed chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub agent_id: i64,
    pub model_used: String,
}

/// Events delivered to a streaming caller.
///
/// Zero or more `TextDelta`s are followed by exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    TextDelta { text: String },
    Done { session_id: String, model_used: String },
}
