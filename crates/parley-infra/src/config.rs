//! Engine configuration loader.
//!
//! Reads `parley.toml` and deserializes it into [`EngineConfig`]. Falls back
//! to defaults when the file is missing or malformed. API keys never live in
//! the file; each backend names the environment variable that holds its key.

use std::path::Path;

use secrecy::SecretString;

use parley_types::config::{BackendEndpoint, EngineConfig};

/// Environment variables consulted when a backend names none.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const LOCAL_API_KEY_ENV: &str = "PARLEY_LOCAL_API_KEY";

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Resolve a backend's API key from the process environment.
pub fn resolve_api_key(endpoint: &BackendEndpoint, default_env: &str) -> Option<SecretString> {
    resolve_api_key_with(endpoint, default_env, |name| std::env::var(name).ok())
}

/// Resolve a backend's API key through `lookup`.
///
/// The endpoint's `api_key_env` wins over `default_env`. Empty values count
/// as unset.
pub fn resolve_api_key_with(
    endpoint: &BackendEndpoint,
    default_env: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    let name = endpoint.api_key_env.as_deref().unwrap_or(default_env);
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::from)
}
