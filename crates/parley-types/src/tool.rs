//! Tool descriptions, listing entries, and tool-related errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a backend is told about a callable tool.
///
/// `name` is always the canonical name (see `parley_core::tools::naming`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters_schema: serde_json::Value,
}

/// One tool as listed by an external connection, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    /// Name exactly as the connection reports it.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A declared tool name that could not be resolved.
///
/// Non-fatal: the request proceeds without the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResolutionWarning {
    pub declared_name: String,
    pub reason: String,
}

impl fmt::Display for ToolResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool '{}' dropped: {}", self.declared_name, self.reason)
    }
}

/// Errors from listing or invoking tools.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("tool connection '{provider}' failed: {message}")]
    Connection { provider: String, message: String },

    #[error("tool '{tool}' failed: {message}")]
    Invocation { tool: String, message: String },

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}
