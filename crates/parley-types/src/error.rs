use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{ErrorClass, LlmError};

/// Errors from durable-tier operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from the fast (expiring) tier.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be encoded or decoded: {0}")]
    Serialization(String),
}

/// Flat classification of a [`ChatError`] for transports and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AgentNotFound,
    UnsupportedModel,
    SessionOwnership,
    SessionStoreUnavailable,
    AgentStoreUnavailable,
    RetryableOverload,
    RetryableNetwork,
    AuthenticationFailed,
    GenerationFailed,
    Timeout,
    Cancelled,
}

/// Request-level errors surfaced by the chat engine.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("agent {agent_id} not found")]
    AgentNotFound { agent_id: i64 },

    #[error("unsupported model '{model}' (supported: {})", format_supported(.supported))]
    UnsupportedModel {
        model: String,
        /// Every supported model identifier, grouped by backend name.
        supported: BTreeMap<String, Vec<String>>,
    },

    #[error("session '{session_id}' belongs to another user")]
    SessionOwnership { session_id: String },

    #[error("session store unavailable: {0}")]
    SessionStoreUnavailable(String),

    #[error("agent store unavailable: {0}")]
    AgentStoreUnavailable(String),

    #[error(
        "generation with '{model}' failed after {attempts} attempt(s): {source}; \
         retry with a different model via model_override"
    )]
    GenerationFailed {
        model: String,
        attempts: u32,
        class: ErrorClass,
        source: LlmError,
    },

    #[error("request exceeded its {}ms deadline", .0.as_millis())]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::AgentNotFound { .. } => ErrorKind::AgentNotFound,
            ChatError::UnsupportedModel { .. } => ErrorKind::UnsupportedModel,
            ChatError::SessionOwnership { .. } => ErrorKind::SessionOwnership,
            ChatError::SessionStoreUnavailable(_) => ErrorKind::SessionStoreUnavailable,
            ChatError::AgentStoreUnavailable(_) => ErrorKind::AgentStoreUnavailable,
            ChatError::GenerationFailed { class, source, .. } => match (class, source) {
                (_, LlmError::AuthenticationFailed) => ErrorKind::AuthenticationFailed,
                (ErrorClass::RetryableOverload, _) => ErrorKind::RetryableOverload,
                (ErrorClass::RetryableNetwork, _) => ErrorKind::RetryableNetwork,
                (ErrorClass::Fatal, _) => ErrorKind::GenerationFailed,
            },
            ChatError::Timeout(_) => ErrorKind::Timeout,
            ChatError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RepositoryError> for ChatError {
    fn from(err: RepositoryError) -> Self {
        ChatError::SessionStoreUnavailable(err.to_string())
    }
}

fn format_supported(supported: &BTreeMap<String, Vec<String>>) -> String {
    supported
        .iter()
        .map(|(backend, models)| format!("{backend}: [{}]", models.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
