//! Engine configuration types.
//!
//! `EngineConfig` is the top-level `parley.toml`. Every field has a default so
//! an empty file (or no file) yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;

/// Top-level configuration for the chat engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite URL for the durable tier.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    /// Agents served by the config-backed agent provider.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

fn default_database_url() -> String {
    "sqlite://parley.db?mode=rwc".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            context: ContextConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            tools: ToolsConfig::default(),
            backends: BackendsConfig::default(),
            agents: Vec::new(),
        }
    }
}

/// Conversation store limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Messages retained per session; oldest are trimmed first.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Messages of history sent to the backend per request.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Sliding expiry of the fast tier.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_max_messages() -> usize {
    50
}

fn default_history_limit() -> usize {
    20
}

fn default_cache_ttl_secs() -> u64 {
    1800
}

impl ContextConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            history_limit: default_history_limit(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Backoff policy for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Network faults get at most this many retries.
    #[serde(default = "default_max_network_retries")]
    pub max_network_retries: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_network_retries() -> u32 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_network_retries: default_max_network_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on opening a backend stream and receiving its first event.
    #[serde(default = "default_attempt_secs")]
    pub attempt_secs: u64,

    /// Bound on the whole request, retries included.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

fn default_attempt_secs() -> u64 {
    60
}

fn default_request_secs() -> u64 {
    300
}

impl TimeoutConfig {
    pub fn attempt(&self) -> Duration {
        Duration::from_secs(self.attempt_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            attempt_secs: default_attempt_secs(),
            request_secs: default_request_secs(),
        }
    }
}

/// Tool registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// How long a per-connection listing is reused.
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,

    /// Names of connected external tool providers (e.g. "tavily", "github").
    #[serde(default)]
    pub providers: Vec<String>,

    /// Base URL of the tool gateway. No gateway means static tools only.
    #[serde(default)]
    pub gateway_url: Option<String>,
}

fn default_listing_ttl_secs() -> u64 {
    300
}

impl ToolsConfig {
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            listing_ttl_secs: default_listing_ttl_secs(),
            providers: Vec::new(),
            gateway_url: None,
        }
    }
}

/// One generation backend's endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendEndpoint {
    /// Overrides the backend's built-in base URL.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model identifiers advertised for this backend. Empty keeps the built-in list.
    #[serde(default)]
    pub models: Vec<String>,
}

/// Settings for every shipped backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub gemini: BackendEndpoint,
    #[serde(default)]
    pub openai: BackendEndpoint,
    #[serde(default)]
    pub ollama: BackendEndpoint,
    #[serde(default)]
    pub local: BackendEndpoint,
}
