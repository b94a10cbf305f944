//! Agent configuration port.

use parley_types::agent::AgentConfig;
use parley_types::error::RepositoryError;

/// Source of agent definitions. Persistence and CRUD live elsewhere; the
/// engine only reads.
///
/// Implementations live in parley-infra (e.g., `ConfiguredAgents`).
pub trait AgentConfigProvider: Send + Sync {
    /// The agent `agent_id` as visible to `user_id`, or `None` if it does not
    /// exist or the user may not use it.
    fn get(
        &self,
        agent_id: i64,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<AgentConfig>, RepositoryError>> + Send;
}
