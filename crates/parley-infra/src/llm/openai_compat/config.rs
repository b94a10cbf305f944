//! Configuration and per-backend defaults for OpenAI-compatible endpoints.
//!
//! Each backend that speaks the chat completions protocol gets a factory
//! returning an [`OpenAiCompatConfig`] with its base URL, routing predicate,
//! and advertised models.

use secrecy::SecretString;

use parley_core::llm::ModelMatcher;

/// Configuration for one OpenAI-compatible backend.
///
/// Used to construct an [`super::OpenAiCompatibleBackend`].
pub struct OpenAiCompatConfig {
    /// Routing name (e.g., "openai", "gemini", "local").
    pub backend_name: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    pub base_url: String,
    pub api_key: SecretString,
    pub matcher: ModelMatcher,
    /// Advertised in `UnsupportedModel` errors.
    pub models: Vec<String>,
}

impl OpenAiCompatConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the advertised models. An allow-list matcher follows the new list.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        if let ModelMatcher::Exact(_) = self.matcher {
            self.matcher = ModelMatcher::Exact(models.clone());
        }
        self.models = models;
        self
    }
}

/// OpenAI: `https://api.openai.com/v1`, GPT and o-series prefixes.
pub fn openai_defaults(api_key: SecretString) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        backend_name: "openai".into(),
        base_url: "https://api.openai.com/v1".into(),
        api_key,
        matcher: ModelMatcher::prefixes(["gpt-", "o1", "o3", "o4", "chatgpt-"]),
        models: vec!["gpt-4o".into(), "gpt-4o-mini".into(), "o3-mini".into()],
    }
}

/// Google Gemini through its OpenAI-compatible endpoint.
pub fn gemini_defaults(api_key: SecretString) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        backend_name: "gemini".into(),
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        api_key,
        matcher: ModelMatcher::prefixes(["gemini-"]),
        models: vec!["gemini-2.5-flash".into(), "gemini-2.5-pro".into()],
    }
}

/// A self-hosted OpenAI-compatible server (vLLM, llama.cpp, LM Studio).
///
/// Matches only its allow-list. Local servers generally ignore the key.
pub fn local_defaults() -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        backend_name: "local".into(),
        base_url: "http://localhost:8000/v1".into(),
        api_key: SecretString::from("local"),
        matcher: ModelMatcher::exact(["local-custom"]),
        models: vec!["local-custom".into()],
    }
}
