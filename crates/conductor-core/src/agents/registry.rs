use super::{Agent, AgentError, AgentRole};
use crate::task::Subtask;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Role → agent lookup.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own role, replacing any previous one.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.role(), agent);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Agent registered for `role`.
    #[must_use]
    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn Agent>> {
        self.agents.get(&role).cloned()
    }

    /// Registered roles, in roster order.
    #[must_use]
    pub fn roles(&self) -> Vec<AgentRole> {
        AgentRole::ALL
            .iter()
            .filter(|r| self.agents.contains_key(r))
            .copied()
            .collect()
    }

    /// Number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Choose the agent that runs `subtask`.
    ///
    /// The assigned role wins when its agent covers every required
    /// capability; otherwise the first role in roster order that does.
    /// A subtask without explicit capabilities is never rerouted.
    pub fn route(&self, subtask: &Subtask) -> Result<Arc<dyn Agent>, AgentError> {
        let covers = |agent: &Arc<dyn Agent>| {
            let offered = agent.capabilities();
            subtask
                .capabilities
                .iter()
                .all(|needed| offered.iter().any(|c| c == needed))
        };

        if let Some(agent) = self.agents.get(&subtask.role) {
            if covers(agent) {
                return Ok(agent.clone());
            }
        }

        if subtask.capabilities.is_empty() {
            return Err(AgentError::MissingCapability(subtask.role.to_string()));
        }

        for role in AgentRole::ALL {
            if let Some(agent) = self.agents.get(&role) {
                if covers(agent) {
                    debug!(
                        subtask_id = %subtask.id,
                        assigned = %subtask.role,
                        routed = %role,
                        "subtask rerouted by capability"
                    );
                    return Ok(agent.clone());
                }
            }
        }

        let missing = subtask
            .capabilities
            .iter()
            .find(|needed| {
                !self
                    .agents
                    .values()
                    .any(|a| a.capabilities().iter().any(|c| c == *needed))
            })
            .or_else(|| subtask.capabilities.iter().next())
            .cloned()
            .unwrap_or_default();
        Err(AgentError::MissingCapability(missing))
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}
