//! Canonical tool naming.
//!
//! Dynamic tools arrive with whatever names their connection reports
//! (`tavily-search`, `tavily_search`, `search`). Backends see one stable
//! form: `<provider>_<rest>` with hyphens replaced by underscores.

/// Replace hyphens with underscores.
pub fn normalize(name: &str) -> String {
    name.replace('-', "_")
}

/// Derive the canonical name of a tool listed by `provider` as `raw_name`.
///
/// - `"<provider>_..."` is kept, with hyphens normalized
/// - `"<provider>-..."` has the prefix rebuilt as `"<provider>_"`
/// - anything else gets `"<provider>_"` prepended
pub fn canonical_tool_name(provider: &str, raw_name: &str) -> String {
    let prefix = normalize(provider);
    match strip_provider_prefix(provider, raw_name) {
        Some(rest) => format!("{prefix}_{}", normalize(rest)),
        None => format!("{prefix}_{}", normalize(raw_name)),
    }
}

/// The remainder of `name` after a `"<provider>_"` or `"<provider>-"` prefix.
///
/// Matches the provider as written and in normalized form.
pub fn strip_provider_prefix<'a>(provider: &str, name: &'a str) -> Option<&'a str> {
    let normalized = normalize(provider);
    [provider, normalized.as_str()].into_iter().find_map(|p| {
        name.strip_prefix(p)
            .and_then(|rest| rest.strip_prefix('_').or_else(|| rest.strip_prefix('-')))
    })
}
