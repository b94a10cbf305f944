//! Model identifier predicates for backend routing.

use serde::{Deserialize, Serialize};

/// Declarative predicate over a model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ModelMatcher {
    /// Model starts with any of these prefixes (`gemini-`, `gpt-`).
    Prefixes(Vec<String>),
    /// Model contains this separator (`llama3:8b`).
    Contains(char),
    /// Model is one of these identifiers.
    Exact(Vec<String>),
    /// Any of the inner matchers.
    Any(Vec<ModelMatcher>),
}

impl ModelMatcher {
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Prefixes(prefixes.into_iter().map(Into::into).collect())
    }

    pub fn exact<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exact(models.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, model: &str) -> bool {
        match self {
            ModelMatcher::Prefixes(prefixes) => prefixes.iter().any(|p| model.starts_with(p)),
            ModelMatcher::Contains(sep) => model.contains(*sep),
            ModelMatcher::Exact(models) => models.iter().any(|m| m == model),
            ModelMatcher::Any(inner) => inner.iter().any(|m| m.matches(model)),
        }
    }
}
