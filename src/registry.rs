//! Manager-side agent registry.
//!
//! Maps agent ids to the address they first registered from and resolves
//! their task assignment from the statically loaded task configuration. The
//! registry is exclusively owned by the dispatch loop; nothing else mutates
//! it, so no locking is needed as long as that confinement holds.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::task::TaskSpec;

/// One registered agent.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub agent_id: u16,

    /// Address the first REGISTER arrived from. Later registrations never
    /// overwrite it, so routing stays with the original registration.
    pub address: SocketAddr,

    pub registered_at: DateTime<Utc>,
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First registration for this id.
    Created,

    /// The id was already registered; the stored record is untouched.
    AlreadyExists,
}

/// Registry of known agents plus the task assignments loaded at startup.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<u16, AgentRecord>,
    tasks: HashMap<u16, TaskSpec>,
}

impl AgentRegistry {
    pub fn new(tasks: HashMap<u16, TaskSpec>) -> Self {
        Self {
            agents: HashMap::new(),
            tasks,
        }
    }

    /// Register an agent. Idempotent: a second registration for the same id
    /// is accepted (the caller still ACKs it) but changes nothing.
    pub fn register(&mut self, agent_id: u16, address: SocketAddr) -> RegisterOutcome {
        if let Some(existing) = self.agents.get(&agent_id) {
            debug!(
                "agent {agent_id} re-registered from {address}, keeping {}",
                existing.address
            );
            return RegisterOutcome::AlreadyExists;
        }

        self.agents.insert(
            agent_id,
            AgentRecord {
                agent_id,
                address,
                registered_at: Utc::now(),
            },
        );
        RegisterOutcome::Created
    }

    /// Task configured for this agent, if any. `None` means no monitoring
    /// work is dispatched; the registration itself is still valid.
    pub fn lookup_task(&self, agent_id: u16) -> Option<&TaskSpec> {
        self.tasks.get(&agent_id)
    }

    /// Address the agent registered from.
    pub fn address_of(&self, agent_id: u16) -> Option<SocketAddr> {
        self.agents.get(&agent_id).map(|record| record.address)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
