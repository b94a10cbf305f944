//! Generation backend implementations.
//!
//! Contains the concrete [`GenerationBackend`]s (OpenAI-compatible and
//! Ollama) and a router factory ([`build_router`]) that registers them in
//! priority order from [`BackendsConfig`].

pub mod errors;
pub mod ollama;
pub mod openai_compat;
pub mod tool_calls;

use std::sync::Arc;

use secrecy::SecretString;

use parley_core::llm::{BackendRouter, GenerationBackend};
use parley_types::config::{BackendEndpoint, BackendsConfig};

use crate::config::{
    GEMINI_API_KEY_ENV, LOCAL_API_KEY_ENV, OPENAI_API_KEY_ENV, resolve_api_key_with,
};

use self::ollama::OllamaBackend;
use self::openai_compat::OpenAiCompatibleBackend;
use self::openai_compat::config::{
    OpenAiCompatConfig, gemini_defaults, local_defaults, openai_defaults,
};

/// Build the router from config, reading API keys from the environment.
pub fn build_router(backends: &BackendsConfig) -> BackendRouter {
    build_router_with(backends, |name| std::env::var(name).ok())
}

/// Build the router, resolving API keys through `lookup`.
///
/// Priority: `local` (explicit allow-list), `gemini`, `ollama` (tagged ids),
/// `openai`. Ollama precedes OpenAI so `gpt-oss:20b` is not taken by `gpt-`.
/// A backend without a key is still registered so its models fail with an
/// authentication error instead of looking unsupported.
pub fn build_router_with(
    backends: &BackendsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> BackendRouter {
    let mut router = BackendRouter::new();

    let mut local = local_defaults();
    if let Some(key) = resolve_api_key_with(&backends.local, LOCAL_API_KEY_ENV, &lookup) {
        local.api_key = key;
    }
    router.push(openai_compatible(local, &backends.local));

    let gemini_key = required_key(&backends.gemini, GEMINI_API_KEY_ENV, "gemini", &lookup);
    router.push(openai_compatible(
        gemini_defaults(gemini_key),
        &backends.gemini,
    ));

    let mut ollama = OllamaBackend::new(
        backends
            .ollama
            .base_url
            .as_deref()
            .unwrap_or(ollama::DEFAULT_BASE_URL),
    );
    if !backends.ollama.models.is_empty() {
        ollama = ollama.with_models(backends.ollama.models.clone());
    }
    router.push(Arc::new(ollama));

    let openai_key = required_key(&backends.openai, OPENAI_API_KEY_ENV, "openai", &lookup);
    router.push(openai_compatible(
        openai_defaults(openai_key),
        &backends.openai,
    ));

    tracing::info!(backends = ?router.backend_names(), "Backend router ready");
    router
}

fn openai_compatible(
    mut config: OpenAiCompatConfig,
    endpoint: &BackendEndpoint,
) -> Arc<dyn GenerationBackend> {
    if let Some(base_url) = &endpoint.base_url {
        config = config.with_base_url(base_url.clone());
    }
    if !endpoint.models.is_empty() {
        config = config.with_models(endpoint.models.clone());
    }
    Arc::new(OpenAiCompatibleBackend::new(config))
}

fn required_key(
    endpoint: &BackendEndpoint,
    default_env: &str,
    backend: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> SecretString {
    resolve_api_key_with(endpoint, default_env, lookup).unwrap_or_else(|| {
        let env = endpoint.api_key_env.as_deref().unwrap_or(default_env);
        tracing::warn!(backend, env, "No API key configured; requests will fail authentication");
        SecretString::from("")
    })
}
