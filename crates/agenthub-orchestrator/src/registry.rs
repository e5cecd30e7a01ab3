use crate::connection::TransportId;
use agenthub_core::HealthMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Live, in-memory projection of an authenticated agent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAgent {
    pub agent_id: String,
    pub transport_id: TransportId,
    pub display_name: String,
    pub connected_at: DateTime<Utc>,
    pub last_latency_ms: Option<u64>,
    pub capabilities: Vec<String>,
    /// Tasks currently assigned to or running on this agent.
    pub active_tasks: usize,
    /// Latest self-reported metrics (heartbeat or pong).
    pub metrics: Option<HealthMetrics>,
}

/// Descriptive data supplied at registration.
#[derive(Debug, Clone, Default)]
pub struct AgentMeta {
    pub display_name: String,
    pub capabilities: Vec<String>,
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, ConnectedAgent>,
    by_transport: HashMap<TransportId, String>,
}

/// Maps agent identity to its one live transport.
///
/// Registration is latest-write-wins per agent. Removal is keyed by
/// transport and only succeeds while that transport is still the agent's
/// current one, so a superseded socket closing late cannot evict the newer
/// registration.
#[derive(Default)]
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent. Returns the superseded transport, if any.
    pub async fn register(
        &self,
        agent_id: &str,
        transport_id: TransportId,
        meta: AgentMeta,
    ) -> Option<TransportId> {
        let mut inner = self.inner.write().await;
        let previous = inner
            .agents
            .get(agent_id)
            .map(|a| (a.transport_id, a.active_tasks));
        if let Some((old, _)) = previous {
            inner.by_transport.remove(&old);
        }
        // A transport carries at most one agent.
        if let Some(other) = inner.by_transport.get(&transport_id).cloned() {
            if other != agent_id {
                inner.agents.remove(&other);
            }
        }
        let active_tasks = previous.map_or(0, |(_, load)| load);
        inner.agents.insert(
            agent_id.to_string(),
            ConnectedAgent {
                agent_id: agent_id.to_string(),
                transport_id,
                display_name: meta.display_name,
                connected_at: Utc::now(),
                last_latency_ms: None,
                capabilities: meta.capabilities,
                active_tasks,
                metrics: None,
            },
        );
        inner
            .by_transport
            .insert(transport_id, agent_id.to_string());

        match previous.map(|(old, _)| old) {
            Some(old) if old != transport_id => {
                tracing::info!(
                    agent_id = %agent_id,
                    old_transport = %old,
                    new_transport = %transport_id,
                    "Agent re-registered, previous transport orphaned"
                );
                Some(old)
            }
            _ => None,
        }
    }

    pub async fn lookup(&self, agent_id: &str) -> Option<ConnectedAgent> {
        self.inner.read().await.agents.get(agent_id).cloned()
    }

    /// Agent currently bound to the transport. Orphaned transports map to nothing.
    pub async fn lookup_by_transport(&self, transport_id: TransportId) -> Option<String> {
        self.inner
            .read()
            .await
            .by_transport
            .get(&transport_id)
            .cloned()
    }

    /// Remove the entry bound to `transport_id`, if it is still current.
    pub async fn remove(&self, transport_id: TransportId) -> Option<ConnectedAgent> {
        let mut inner = self.inner.write().await;
        let agent_id = inner.by_transport.remove(&transport_id)?;
        let still_current = inner
            .agents
            .get(&agent_id)
            .is_some_and(|a| a.transport_id == transport_id);
        if still_current {
            inner.agents.remove(&agent_id)
        } else {
            None
        }
    }

    /// All live agents, ordered by id.
    pub async fn list(&self) -> Vec<ConnectedAgent> {
        let inner = self.inner.read().await;
        let mut agents: Vec<ConnectedAgent> = inner.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.agents.is_empty()
    }

    pub async fn record_latency(&self, agent_id: &str, latency_ms: u64) {
        if let Some(agent) = self.inner.write().await.agents.get_mut(agent_id) {
            agent.last_latency_ms = Some(latency_ms);
        }
    }

    pub async fn record_metrics(&self, agent_id: &str, metrics: HealthMetrics) {
        if let Some(agent) = self.inner.write().await.agents.get_mut(agent_id) {
            agent.metrics = Some(metrics);
        }
    }

    pub async fn increment_load(&self, agent_id: &str) {
        if let Some(agent) = self.inner.write().await.agents.get_mut(agent_id) {
            agent.active_tasks += 1;
        }
    }

    pub async fn decrement_load(&self, agent_id: &str) {
        if let Some(agent) = self.inner.write().await.agents.get_mut(agent_id) {
            agent.active_tasks = agent.active_tasks.saturating_sub(1);
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.agents.clear();
        inner.by_transport.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn meta(name: &str) -> AgentMeta {
        AgentMeta {
            display_name: name.into(),
            capabilities: vec!["claude".into()],
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = AgentRegistry::new();
        let t1 = Uuid::new_v4();
        assert!(registry.register("a1", t1, meta("one")).await.is_none());

        let agent = registry.lookup("a1").await.unwrap();
        assert_eq!(agent.transport_id, t1);
        assert_eq!(agent.display_name, "one");
        assert_eq!(registry.lookup_by_transport(t1).await.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_superseded_transport_disconnect_keeps_new_registration() {
        let registry = AgentRegistry::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        registry.register("a1", t1, meta("one")).await;
        assert_eq!(registry.register("a1", t2, meta("one")).await, Some(t1));

        // The old socket finally closes.
        assert!(registry.remove(t1).await.is_none());
        assert!(registry.lookup_by_transport(t1).await.is_none());

        let agent = registry.lookup("a1").await.unwrap();
        assert_eq!(agent.transport_id, t2);

        let removed = registry.remove(t2).await.unwrap();
        assert_eq!(removed.agent_id, "a1");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reregister_same_transport_is_idempotent() {
        let registry = AgentRegistry::new();
        let t1 = Uuid::new_v4();
        registry.register("a1", t1, meta("one")).await;
        assert!(registry.register("a1", t1, meta("renamed")).await.is_none());
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.lookup("a1").await.unwrap().display_name, "renamed");
    }

    #[tokio::test]
    async fn test_load_tracking_saturates() {
        let registry = AgentRegistry::new();
        registry.register("a1", Uuid::new_v4(), meta("one")).await;
        registry.increment_load("a1").await;
        registry.increment_load("a1").await;
        registry.decrement_load("a1").await;
        assert_eq!(registry.lookup("a1").await.unwrap().active_tasks, 1);
        registry.decrement_load("a1").await;
        registry.decrement_load("a1").await;
        assert_eq!(registry.lookup("a1").await.unwrap().active_tasks, 0);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let registry = AgentRegistry::new();
        registry.register("b", Uuid::new_v4(), meta("b")).await;
        registry.register("a", Uuid::new_v4(), meta("a")).await;
        let ids: Vec<String> = registry.list().await.into_iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_in_flight_load() {
        let registry = AgentRegistry::new();
        registry.register("a1", Uuid::new_v4(), meta("one")).await;
        registry.increment_load("a1").await;
        registry.increment_load("a1").await;

        registry.register("a1", Uuid::new_v4(), meta("one")).await;
        assert_eq!(registry.lookup("a1").await.unwrap().active_tasks, 2);

        registry.decrement_load("a1").await;
        assert_eq!(registry.lookup("a1").await.unwrap().active_tasks, 1);
    }

    #[tokio::test]
    async fn test_transport_rebound_to_other_agent_drops_first() {
        let registry = AgentRegistry::new();
        let t1 = Uuid::new_v4();
        registry.register("a1", t1, meta("one")).await;
        registry.register("a2", t1, meta("two")).await;

        assert!(registry.lookup("a1").await.is_none());
        assert_eq!(registry.lookup_by_transport(t1).await.as_deref(), Some("a2"));
        assert_eq!(registry.len().await, 1);

        registry.remove(t1).await;
        assert!(registry.is_empty().await);
    }
}
