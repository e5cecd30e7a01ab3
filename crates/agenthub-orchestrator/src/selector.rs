use crate::health::HealthStore;
use crate::registry::{AgentRegistry, ConnectedAgent};
use agenthub_core::{HealthStatus, SelectionStrategy};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a task needs from the agent that will run it.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    /// Every tag must be present in the agent's capabilities.
    pub required_capabilities: Vec<String>,
    /// Candidates must be strictly below this many active tasks.
    pub max_load: usize,
    pub strategy: SelectionStrategy,
}

impl SelectionCriteria {
    pub fn new(strategy: SelectionStrategy, max_load: usize) -> Self {
        Self {
            required_capabilities: Vec::new(),
            max_load,
            strategy,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }
}

/// Picks an agent for a task among the live, healthy, non-saturated ones.
pub struct AgentSelector {
    registry: Arc<AgentRegistry>,
    health: Arc<HealthStore>,
    cursor: AtomicUsize,
}

impl AgentSelector {
    pub fn new(registry: Arc<AgentRegistry>, health: Arc<HealthStore>) -> Self {
        Self {
            registry,
            health,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns `None` when no agent qualifies; that is not an error.
    pub async fn select(&self, criteria: &SelectionCriteria) -> Option<ConnectedAgent> {
        let candidates = self.candidates(criteria).await;
        if candidates.is_empty() {
            return None;
        }
        let picked = self.pick(criteria.strategy, candidates);
        if let Some(agent) = &picked {
            tracing::debug!(
                agent_id = %agent.agent_id,
                strategy = %criteria.strategy,
                "Agent selected"
            );
        }
        picked
    }

    /// Agents passing the capability, load and health filters, ordered by id.
    pub async fn candidates(&self, criteria: &SelectionCriteria) -> Vec<ConnectedAgent> {
        let mut candidates = Vec::new();
        for agent in self.registry.list().await {
            let capable = criteria
                .required_capabilities
                .iter()
                .all(|cap| agent.capabilities.contains(cap));
            if !capable || agent.active_tasks >= criteria.max_load {
                continue;
            }
            // No record yet means the agent has not been checked since it
            // connected; it is given the benefit of the doubt.
            let healthy = matches!(
                self.health.latest_status(&agent.agent_id).await,
                None | Some(HealthStatus::Healthy)
            );
            if healthy {
                candidates.push(agent);
            }
        }
        candidates
    }

    fn pick(
        &self,
        strategy: SelectionStrategy,
        mut candidates: Vec<ConnectedAgent>,
    ) -> Option<ConnectedAgent> {
        match strategy {
            SelectionStrategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates.swap_remove(index))
            }
            SelectionStrategy::LeastConnections => {
                candidates.into_iter().min_by_key(|a| a.active_tasks)
            }
            SelectionStrategy::LowestLatency => candidates
                .into_iter()
                .min_by_key(|a| a.last_latency_ms.unwrap_or(u64::MAX)),
            SelectionStrategy::ResourceBased => candidates
                .into_iter()
                .max_by(|a, b| headroom(a).total_cmp(&headroom(b))),
            SelectionStrategy::Random => candidates.choose(&mut rand::thread_rng()).cloned(),
        }
    }
}

/// CPU plus memory headroom in percent points; unknown usage counts as fully
/// loaded.
fn headroom(agent: &ConnectedAgent) -> f64 {
    let (cpu, memory) = agent
        .metrics
        .as_ref()
        .map(|m| (m.cpu.unwrap_or(100.0), m.memory.unwrap_or(100.0)))
        .unwrap_or((100.0, 100.0));
    (100.0 - cpu) + (100.0 - memory)
}
