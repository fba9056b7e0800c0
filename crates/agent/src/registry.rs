use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::definition::{AgentDefinition, AgentId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent `{0}` is already registered")]
    DuplicateAgent(String),
    #[error("agent `{0}` is not registered")]
    UnknownAgent(String),
    #[error("handoffs for agent `{0}` were already wired")]
    AlreadyWired(String),
}

/// Agents of one deployment, looked up by id. Handoffs name targets by id so
/// agents may point at each other; wiring happens once every agent exists.
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<AgentDefinition>>,
    entry: AgentId,
}

impl AgentRegistry {
    pub fn new(entry: AgentId) -> Self {
        Self { agents: HashMap::new(), entry }
    }

    pub fn register(&mut self, agent: AgentDefinition) -> Result<(), RegistryError> {
        if self.agents.contains_key(&agent.id) {
            return Err(RegistryError::DuplicateAgent(agent.id.to_string()));
        }
        self.agents.insert(agent.id.clone(), Arc::new(agent));
        Ok(())
    }

    pub fn wire(&self, from: &AgentId, targets: Vec<AgentId>) -> Result<(), RegistryError> {
        let agent = self.require(from)?;
        if let Some(missing) = targets.iter().find(|target| !self.agents.contains_key(*target)) {
            return Err(RegistryError::UnknownAgent(missing.to_string()));
        }
        agent.set_handoffs(targets)
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<AgentDefinition>> {
        self.agents.get(id).cloned()
    }

    pub fn require(&self, id: &AgentId) -> Result<Arc<AgentDefinition>, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::UnknownAgent(id.to_string()))
    }

    pub fn entry(&self) -> &AgentId {
        &self.entry
    }
}
