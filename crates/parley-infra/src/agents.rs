//! Config-backed agent provider.

use std::collections::HashMap;

use parley_core::agents::AgentConfigProvider;
use parley_types::agent::AgentConfig;
use parley_types::error::RepositoryError;

/// Read-only agent definitions loaded from `[[agents]]` in the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredAgents {
    agents: HashMap<i64, AgentConfig>,
}

impl ConfiguredAgents {
    /// Index `agents` by id. A repeated id keeps the first definition.
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        let mut by_id = HashMap::with_capacity(agents.len());
        for agent in agents {
            if by_id.contains_key(&agent.agent_id) {
                tracing::warn!(agent_id = agent.agent_id, "Duplicate agent id in config; keeping the first");
                continue;
            }
            by_id.insert(agent.agent_id, agent);
        }
        Self { agents: by_id }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentConfigProvider for ConfiguredAgents {
    async fn get(&self, agent_id: i64, user_id: &str) -> Result<Option<AgentConfig>, RepositoryError> {
        Ok(self
            .agents
            .get(&agent_id)
            .filter(|agent| agent.is_visible_to(user_id))
            .cloned())
    }
}
