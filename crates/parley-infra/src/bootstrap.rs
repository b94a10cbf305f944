//! Wires the adapters in this crate into a running chat engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use parley_core::chat::ChatOrchestrator;
use parley_core::context::HybridContextStore;
use parley_core::llm::RetryPolicy;
use parley_core::tools::{BoxTool, BoxToolConnection, ToolRegistry};
use parley_types::config::{EngineConfig, ToolsConfig};

use crate::agents::ConfiguredAgents;
use crate::cache::InMemoryCache;
use crate::llm::build_router;
use crate::sqlite::history::SqliteDurableStore;
use crate::sqlite::pool::DatabasePool;
use crate::tools::{CurrentTimeTool, HttpToolConnectionProvider};

/// The orchestrator over the shipped adapters.
pub type EngineOrchestrator = ChatOrchestrator<ConfiguredAgents, SqliteDurableStore, InMemoryCache>;

/// A configured engine plus the background tasks it owns.
pub struct Engine {
    pub orchestrator: Arc<EngineOrchestrator>,
    shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Engine {
    /// Open storage, build the router and tool registry, and start the
    /// fast-tier sweeper.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or migrated, or if the tool
    /// gateway URL is invalid.
    pub async fn start(config: &EngineConfig) -> anyhow::Result<Self> {
        let pool = DatabasePool::new(&config.database_url).await?;
        let cache = InMemoryCache::new();

        let shutdown = CancellationToken::new();
        let sweep_every = (config.context.cache_ttl() / 4).max(Duration::from_secs(1));
        let sweeper = cache.spawn_sweeper(sweep_every, shutdown.clone());

        let context = HybridContextStore::new(
            SqliteDurableStore::new(pool),
            cache,
            config.context.clone(),
        );
        let agents = ConfiguredAgents::new(config.agents.clone());
        let tools = build_tool_registry(&config.tools)?;
        let router = build_router(&config.backends);

        let orchestrator = ChatOrchestrator::new(agents, context, tools, router)
            .with_retry(RetryPolicy::from_config(&config.retry, &config.timeouts))
            .with_request_timeout(config.timeouts.request());

        tracing::info!(
            agents = config.agents.len(),
            tool_providers = config.tools.providers.len(),
            "Chat engine started"
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            shutdown,
            sweeper,
        })
    }

    /// Stop background tasks. In-flight requests hold their own handles.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.sweeper.await {
            tracing::warn!(error = %e, "Cache sweeper ended abnormally");
        }
    }
}

/// Static built-ins plus the gateway connection when one is configured.
pub fn build_tool_registry(config: &ToolsConfig) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new(config.listing_ttl());
    registry.register_static(BoxTool::new(CurrentTimeTool));

    match &config.gateway_url {
        Some(url) => {
            let gateway = HttpToolConnectionProvider::new(url)?;
            Ok(registry.with_connection(BoxToolConnection::new(gateway), config.providers.clone()))
        }
        None => {
            if !config.providers.is_empty() {
                tracing::warn!(
                    providers = ?config.providers,
                    "Tool providers configured without a gateway_url; only built-in tools are available"
                );
            }
            Ok(registry)
        }
    }
}
