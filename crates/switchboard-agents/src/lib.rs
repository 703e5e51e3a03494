//! Agent definitions and the registry that owns them.
//!
//! Agents are closed records: a name, instructions, a tool-server
//! allow-list, and the set of agents they may hand a session off to. The
//! registry is built once from configuration, validated, and then shared
//! read-only behind an `Arc` — nothing mutates it while sessions run.

use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::{Result, ServerId, SwitchboardError};
use tracing::debug;

/// A single agent. Immutable once registered.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: String,
    /// Servers whose tools this agent may invoke.
    pub allowed_servers: Vec<ServerId>,
    /// Agents this one may transfer a session to.
    pub handoff_targets: Vec<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            allowed_servers: Vec::new(),
            handoff_targets: Vec::new(),
        }
    }

    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ServerId>,
    {
        self.allowed_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_handoffs<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handoff_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn permits_server(&self, server: &ServerId) -> bool {
        self.allowed_servers.contains(server)
    }

    pub fn permits_handoff(&self, target: &str) -> bool {
        self.handoff_targets.iter().any(|t| t == target)
    }
}

/// Registry of all configured agents plus the default routing choice.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
    default_agent: String,
}

impl AgentRegistry {
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            agents: HashMap::new(),
            default_agent: default_agent.into(),
        }
    }

    /// Register an agent. Names are unique; a second registration under the
    /// same name is rejected rather than silently replaced.
    pub fn register(&mut self, definition: AgentDefinition) -> Result<()> {
        if self.agents.contains_key(&definition.name) {
            return Err(SwitchboardError::DuplicateAgent(definition.name));
        }
        debug!("Registered agent '{}'", definition.name);
        self.agents
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<AgentDefinition>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| SwitchboardError::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Check every hand-off edge (and the default route) against the roster.
    /// Run once at startup so dangling targets fail fast instead of at
    /// hand-off time.
    pub fn validate_handoff_graph(&self) -> Result<()> {
        if !self.agents.contains_key(&self.default_agent) {
            return Err(SwitchboardError::UnknownAgent(self.default_agent.clone()));
        }
        for (name, agent) in &self.agents {
            for target in &agent.handoff_targets {
                if !self.agents.contains_key(target) {
                    return Err(SwitchboardError::InvalidHandoffTarget {
                        agent: name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Routing policy for new sessions: an explicit override must name a
    /// registered agent; otherwise the configured default handles the query.
    pub fn starting_agent(&self, requested: Option<&str>) -> Result<Arc<AgentDefinition>> {
        match requested {
            Some(name) => self.get(name),
            None => self.get(&self.default_agent),
        }
    }
}
