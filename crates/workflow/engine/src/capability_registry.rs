//! Capability registry: which agents advertise which capabilities
//!
//! The registry is shared by every execution and is read far more often
//! than it is written. Role bindings are checked against it once, at
//! submission, before any step is dispatched.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use workflow_types::{AgentId, AgentRole, RoleId, WorkflowError, WorkflowResult};

/// Process-wide table of agent capabilities
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    agents: DashMap<AgentId, BTreeSet<String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any previously advertised capabilities
    pub fn register<I, S>(&self, agent: AgentId, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let caps: BTreeSet<String> = capabilities.into_iter().map(Into::into).collect();
        debug!(agent = %agent, capabilities = caps.len(), "Agent registered");
        self.agents.insert(agent, caps);
    }

    /// Remove an agent; returns whether it was registered
    pub fn unregister(&self, agent: &AgentId) -> bool {
        self.agents.remove(agent).is_some()
    }

    /// Capabilities advertised by `agent`
    pub fn lookup(&self, agent: &AgentId) -> WorkflowResult<BTreeSet<String>> {
        self.agents
            .get(agent)
            .map(|caps| caps.clone())
            .ok_or_else(|| WorkflowError::AgentNotFound(agent.clone()))
    }

    /// Whether `agent` advertises every capability in `required`
    pub fn satisfies(&self, agent: &AgentId, required: &BTreeSet<String>) -> bool {
        self.agents
            .get(agent)
            .map(|caps| required.is_subset(&caps))
            .unwrap_or(false)
    }

    /// Agents satisfying `required`, in ID order
    pub fn eligible(&self, required: &BTreeSet<String>) -> Vec<AgentId> {
        let mut out: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|entry| required.is_subset(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        out.sort();
        out
    }

    /// All registered agents, in ID order
    pub fn agents(&self) -> Vec<AgentId> {
        let mut out: Vec<AgentId> = self.agents.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Validate caller bindings and fill unbound roles that steps use
    ///
    /// A role the caller left unbound gets the lowest-ID eligible agent.
    /// Unused, unbound roles stay unbound.
    pub fn bind_roles(
        &self,
        roles: &[AgentRole],
        requested: &BTreeMap<RoleId, AgentId>,
        in_use: &BTreeSet<RoleId>,
    ) -> WorkflowResult<BTreeMap<RoleId, AgentId>> {
        if let Some(unknown) = requested
            .keys()
            .find(|role| !roles.iter().any(|r| &r.role_id == *role))
        {
            return Err(WorkflowError::ValidationError(format!(
                "Binding for undeclared role '{}'",
                unknown
            )));
        }

        let mut bindings = BTreeMap::new();
        for role in roles {
            let agent = match requested.get(&role.role_id) {
                Some(agent) => {
                    let caps = self.lookup(agent)?;
                    if !role.capabilities.is_subset(&caps) {
                        return Err(WorkflowError::UnsatisfiedRole {
                            role: role.role_id.clone(),
                            agent: agent.clone(),
                        });
                    }
                    agent.clone()
                }
                None if in_use.contains(&role.role_id) => self
                    .eligible(&role.capabilities)
                    .into_iter()
                    .next()
                    .ok_or_else(|| WorkflowError::NoEligibleAgent(role.role_id.clone()))?,
                None => continue,
            };
            bindings.insert(role.role_id.clone(), agent);
        }
        Ok(bindings)
    }
}
