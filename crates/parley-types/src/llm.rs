//! Generation request/stream types shared by every backend.
//!
//! These types model the data shapes for backend interactions: the
//! conversation handed to a backend, the events it streams back, and the
//! errors it can fail with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tool::ToolSpec;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in the conversation handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a backend needs to produce one reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Tools the backend may call while generating. Invocation happens
    /// inside the backend; callers see text and `ToolCall` markers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Events emitted by a backend's generation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A fragment of assistant text. Fragments are append-only.
    TextDelta { text: String },

    /// The backend is about to run a tool. Emitted before the side effect,
    /// so a later failure is a mid-stream failure and is not retried.
    ToolCall { name: String },

    /// The reply is complete.
    Done,
}

/// Retry classification for a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limiting or temporary unavailability.
    RetryableOverload,
    /// Connection-level faults and timeouts.
    RetryableNetwork,
    /// Never retried.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::RetryableOverload => write!(f, "retryable_overload"),
            ErrorClass::RetryableNetwork => write!(f, "retryable_network"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Errors from backend operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("backend did not respond within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("context length exceeded: max {max}, requested {requested}")]
    ContextLengthExceeded { max: u32, requested: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("generation cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            let s = role.to_string();
            let parsed: MessageRole = s.parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_message_role_rejects_unknown() {
        let err = "tool".parse::<MessageRole>().unwrap_err();
        assert!(err.contains("tool"));
    }

    #[test]
    fn test_generation_event_serde_tagging() {
        let json = serde_json::to_string(&GenerationEvent::TextDelta {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"text_delta","text":"hi"}"#);

        let marker = serde_json::to_string(&GenerationEvent::ToolCall {
            name: "current_time".to_string(),
        })
        .unwrap();
        assert_eq!(marker, r#"{"type":"tool_call","name":"current_time"}"#);

        let done: GenerationEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, GenerationEvent::Done);
    }

    #[test]
    fn test_generation_request_omits_empty_tools() {
        let request = GenerationRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::user("hello")],
            system: None,
            tools: vec![],
            max_tokens: None,
            temperature: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_error_class_display() {
        assert_eq!(ErrorClass::RetryableOverload.to_string(), "retryable_overload");
        assert_eq!(ErrorClass::RetryableNetwork.to_string(), "retryable_network");
        assert_eq!(ErrorClass::Fatal.to_string(), "fatal");
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Timeout { timeout_ms: 1500 };
        assert!(err.to_string().contains("1500ms"));

        let err = LlmError::ContextLengthExceeded {
            max: 100_000,
            requested: 120_000,
        };
        assert!(err.to_string().contains("100000"));
        assert!(err.to_string().contains("120000"));
    }
}
