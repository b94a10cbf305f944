//! Tool registry: static built-ins merged with per-connection listings.
//!
//! Resolution is best-effort. A declared name that cannot be resolved is
//! dropped with a [`ToolResolutionWarning`] and the request carries on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use parley_types::tool::{RemoteTool, ToolError, ToolResolutionWarning, ToolSpec};

use super::connection::BoxToolConnection;
use super::naming::{canonical_tool_name, normalize, strip_provider_prefix};
use super::tool::BoxTool;

/// Where a resolved tool's invocations go.
#[derive(Clone)]
enum ToolTarget {
    Static(Arc<BoxTool>),
    Remote {
        connection: BoxToolConnection,
        provider: String,
        user_id: String,
    },
}

/// One callable tool in a resolved set.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub canonical_name: String,
    /// Owning connection; `None` for static tools.
    pub provider: Option<String>,
    /// Name as registered or listed, before normalization.
    pub raw_name: String,
    pub spec: ToolSpec,
    target: ToolTarget,
}

impl ToolDescriptor {
    pub async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        match &self.target {
            ToolTarget::Static(tool) => tool.invoke(args).await,
            ToolTarget::Remote {
                connection,
                provider,
                user_id,
            } => {
                connection
                    .invoke(provider, user_id, &self.raw_name, args)
                    .await
            }
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("canonical_name", &self.canonical_name)
            .field("provider", &self.provider)
            .field("raw_name", &self.raw_name)
            .finish()
    }
}

/// The tools one request may use, keyed by canonical name.
#[derive(Clone, Debug, Default)]
pub struct ResolvedTools {
    tools: Vec<ToolDescriptor>,
}

impl ResolvedTools {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.canonical_name.as_str()).collect()
    }

    /// Specs to advertise to a backend, in declaration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    pub fn get(&self, canonical_name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.canonical_name == canonical_name)
    }

    /// Dispatch a backend's tool call by canonical name.
    pub async fn invoke(&self, canonical_name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(canonical_name)
            .ok_or_else(|| ToolError::NotFound(canonical_name.to_string()))?;
        tracing::debug!(tool = canonical_name, provider = ?tool.provider, "Invoking tool");
        tool.invoke(args).await
    }
}

/// Outcome of resolving an agent's declared tool names.
#[derive(Debug, Default)]
pub struct ToolResolution {
    pub tools: ResolvedTools,
    pub warnings: Vec<ToolResolutionWarning>,
}

struct CachedListing {
    tools: Vec<RemoteTool>,
    fetched_at: Instant,
}

/// Registry of static tools plus the connection used for dynamic ones.
pub struct ToolRegistry {
    static_tools: HashMap<String, Arc<BoxTool>>,
    connection: Option<BoxToolConnection>,
    providers: Vec<String>,
    listings: DashMap<(String, String), CachedListing>,
    listing_ttl: Duration,
}

impl ToolRegistry {
    pub fn new(listing_ttl: Duration) -> Self {
        Self {
            static_tools: HashMap::new(),
            connection: None,
            providers: Vec::new(),
            listings: DashMap::new(),
            listing_ttl,
        }
    }

    /// Attach the connection provider and the names of connected providers.
    pub fn with_connection(
        mut self,
        connection: BoxToolConnection,
        providers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.connection = Some(connection);
        self.providers = providers.into_iter().map(Into::into).collect();
        // Longest first so "google-drive" wins over "google".
        self.providers.sort_by_key(|p| std::cmp::Reverse(p.len()));
        self
    }

    /// Register a static tool under its spec name. A later registration
    /// with the same name replaces the earlier one.
    pub fn register_static(&mut self, tool: BoxTool) {
        let name = tool.spec().name;
        tracing::debug!(tool = %name, "Registered static tool");
        self.static_tools.insert(name, Arc::new(tool));
    }

    pub fn static_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.static_tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drop the cached listing for one connection (teardown or reconnect).
    pub fn invalidate(&self, provider: &str, user_id: &str) {
        self.listings
            .remove(&(provider.to_string(), user_id.to_string()));
    }

    /// Drop every cached listing for `user_id`.
    pub fn invalidate_user(&self, user_id: &str) {
        self.listings.retain(|(_, uid), _| uid != user_id);
    }

    /// Resolve declared names for one request.
    pub async fn resolve(&self, declared: &[String], user_id: &str) -> ToolResolution {
        let mut resolution = ToolResolution::default();
        let mut seen = HashSet::new();
        // Per-provider canonical tables, built once per request.
        let mut tables: HashMap<String, Result<HashMap<String, RemoteTool>, ToolError>> =
            HashMap::new();

        for name in declared {
            let name = name.trim();
            if name.is_empty() || !seen.insert(name.to_string()) {
                continue;
            }

            if let Some(tool) = self.lookup_static(name) {
                let spec = tool.spec();
                if resolution.tools.get(&spec.name).is_none() {
                    resolution.tools.tools.push(ToolDescriptor {
                        canonical_name: spec.name.clone(),
                        provider: None,
                        raw_name: spec.name.clone(),
                        spec,
                        target: ToolTarget::Static(tool),
                    });
                }
                continue;
            }

            let Some(provider) = self.provider_for(name) else {
                resolution.warnings.push(ToolResolutionWarning {
                    declared_name: name.to_string(),
                    reason: "no static tool or connected provider matches".to_string(),
                });
                continue;
            };
            let Some(connection) = &self.connection else {
                resolution.warnings.push(ToolResolutionWarning {
                    declared_name: name.to_string(),
                    reason: format!("provider '{provider}' has no tool connection"),
                });
                continue;
            };

            if !tables.contains_key(provider) {
                let table = self
                    .listing(connection, provider, user_id)
                    .await
                    .map(|tools| self.canonical_table(provider, tools));
                tables.insert(provider.to_string(), table);
            }

            let canonical = canonical_tool_name(provider, name);
            match tables.get(provider) {
                Some(Ok(table)) => match table.get(&canonical) {
                    Some(remote) if resolution.tools.get(&canonical).is_none() => {
                        resolution.tools.tools.push(ToolDescriptor {
                            canonical_name: canonical.clone(),
                            provider: Some(provider.to_string()),
                            raw_name: remote.name.clone(),
                            spec: ToolSpec {
                                name: canonical,
                                description: remote.description.clone(),
                                parameters_schema: remote.parameters_schema.clone(),
                            },
                            target: ToolTarget::Remote {
                                connection: connection.clone(),
                                provider: provider.to_string(),
                                user_id: user_id.to_string(),
                            },
                        });
                    }
                    Some(_) => {}
                    None => resolution.warnings.push(ToolResolutionWarning {
                        declared_name: name.to_string(),
                        reason: format!("not listed by connection '{provider}'"),
                    }),
                },
                Some(Err(e)) => resolution.warnings.push(ToolResolutionWarning {
                    declared_name: name.to_string(),
                    reason: e.to_string(),
                }),
                None => {}
            }
        }

        for warning in &resolution.warnings {
            tracing::warn!(user_id, %warning, "Tool resolution warning");
        }
        resolution
    }

    fn lookup_static(&self, name: &str) -> Option<Arc<BoxTool>> {
        self.static_tools
            .get(name)
            .or_else(|| self.static_tools.get(&normalize(name)))
            .cloned()
    }

    fn provider_for(&self, name: &str) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| strip_provider_prefix(p, name).is_some())
            .map(String::as_str)
    }

    /// Canonicalize a provider's listing. Static tools win a name collision;
    /// two raw names mapping to the same canonical name keep the first.
    fn canonical_table(
        &self,
        provider: &str,
        tools: Vec<RemoteTool>,
    ) -> HashMap<String, RemoteTool> {
        let mut table: HashMap<String, RemoteTool> = HashMap::with_capacity(tools.len());
        for tool in tools {
            let canonical = canonical_tool_name(provider, &tool.name);
            if self.static_tools.contains_key(&canonical) {
                tracing::debug!(provider, tool = %tool.name, "Static tool shadows dynamic tool");
                continue;
            }
            if let Some(existing) = table.get(&canonical) {
                tracing::warn!(
                    provider,
                    canonical = %canonical,
                    kept = %existing.name,
                    dropped = %tool.name,
                    "Duplicate canonical tool name"
                );
                continue;
            }
            table.insert(canonical, tool);
        }
        table
    }

    async fn listing(
        &self,
        connection: &BoxToolConnection,
        provider: &str,
        user_id: &str,
    ) -> Result<Vec<RemoteTool>, ToolError> {
        let key = (provider.to_string(), user_id.to_string());
        // Clone out of the map; never hold a DashMap guard across await.
        let cached = self.listings.get(&key).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.listing_ttl).then(|| entry.tools.clone())
        });
        if let Some(tools) = cached {
            tracing::debug!(provider, user_id, "Tool listing cache hit");
            return Ok(tools);
        }

        let tools = connection.list_tools(provider, user_id).await.map_err(|e| {
            tracing::warn!(provider, user_id, error = %e, "Tool listing failed");
            e
        })?;
        tracing::debug!(provider, user_id, count = tools.len(), "Fetched tool listing");
        self.listings.insert(
            key,
            CachedListing {
                tools: tools.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(tools)
    }
}
