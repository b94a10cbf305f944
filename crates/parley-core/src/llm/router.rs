//! Model-to-backend routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use parley_types::error::ChatError;

use super::backend::GenerationBackend;

/// Backends in priority order; the first whose matcher accepts a model wins.
#[derive(Clone, Default)]
pub struct BackendRouter {
    backends: Vec<Arc<dyn GenerationBackend>>,
}

impl BackendRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend at the lowest priority so far.
    pub fn with_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.push(backend);
        self
    }

    pub fn push(&mut self, backend: Arc<dyn GenerationBackend>) {
        tracing::debug!(backend = backend.name(), priority = self.backends.len(), "Registered backend");
        self.backends.push(backend);
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Select the backend for `model`.
    pub fn route(&self, model: &str) -> Result<Arc<dyn GenerationBackend>, ChatError> {
        match self.backends.iter().find(|b| b.matches(model)) {
            Some(backend) => {
                tracing::debug!(model, backend = backend.name(), "Routed model");
                Ok(Arc::clone(backend))
            }
            None => {
                tracing::debug!(model, "No backend matches model");
                Err(ChatError::UnsupportedModel {
                    model: model.to_string(),
                    supported: self.supported_models(),
                })
            }
        }
    }

    /// Every advertised model, grouped by backend name.
    pub fn supported_models(&self) -> BTreeMap<String, Vec<String>> {
        let mut supported: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for backend in &self.backends {
            supported
                .entry(backend.name().to_string())
                .or_default()
                .extend(backend.known_models());
        }
        supported
    }
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("backends", &self.backend_names())
            .finish()
    }
}
