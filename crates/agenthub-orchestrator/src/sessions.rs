use crate::connection::{ConnectionManager, OutboundEvent, TransportId};
use crate::registry::AgentRegistry;
use agenthub_core::{HubError, HubResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// How a published event was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to the session's subscribers.
    Session(usize),
    /// The session had no subscribers; sent to every web client instead.
    Broadcast(usize),
    /// Dropped as a duplicate before routing.
    Suppressed,
}

#[derive(Default)]
struct SessionState {
    sessions: HashMap<String, HashSet<TransportId>>,
    /// Reverse index so a disconnect only touches the sessions it joined.
    memberships: HashMap<TransportId, HashSet<String>>,
}

/// Session-scoped fan-out.
///
/// A session exists exactly while it has at least one subscriber.
pub struct SessionRouter {
    connections: Arc<ConnectionManager>,
    registry: Arc<AgentRegistry>,
    state: RwLock<SessionState>,
}

impl SessionRouter {
    pub fn new(connections: Arc<ConnectionManager>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            connections,
            registry,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Subscribe a transport. Returns false if it was already subscribed.
    pub async fn join(&self, session_id: &str, transport_id: TransportId) -> bool {
        let mut state = self.state.write().await;
        let added = state
            .sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(transport_id);
        state
            .memberships
            .entry(transport_id)
            .or_default()
            .insert(session_id.to_string());
        if added {
            tracing::debug!(session_id = %session_id, transport_id = %transport_id, "Joined session");
        }
        added
    }

    /// Unsubscribe a transport. Returns false if it was not subscribed.
    pub async fn leave(&self, session_id: &str, transport_id: TransportId) -> bool {
        let mut state = self.state.write().await;
        let removed = Self::detach(&mut state, session_id, transport_id);
        if let Some(joined) = state.memberships.get_mut(&transport_id) {
            joined.remove(session_id);
            if joined.is_empty() {
                state.memberships.remove(&transport_id);
            }
        }
        removed
    }

    /// Remove a transport from every session it joined.
    pub async fn leave_all(&self, transport_id: TransportId) -> Vec<String> {
        let mut state = self.state.write().await;
        let joined = state.memberships.remove(&transport_id).unwrap_or_default();
        for session_id in &joined {
            Self::detach(&mut state, session_id, transport_id);
        }
        joined.into_iter().collect()
    }

    fn detach(state: &mut SessionState, session_id: &str, transport_id: TransportId) -> bool {
        let Some(subscribers) = state.sessions.get_mut(session_id) else {
            return false;
        };
        let removed = subscribers.remove(&transport_id);
        if subscribers.is_empty() {
            state.sessions.remove(session_id);
        }
        removed
    }

    pub async fn subscribers(&self, session_id: &str) -> Vec<TransportId> {
        self.state
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn sessions_of(&self, transport_id: TransportId) -> Vec<String> {
        self.state
            .read()
            .await
            .memberships
            .get(&transport_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Deliver to a session's subscribers, falling back to a web broadcast when
    /// no session is given or nobody is subscribed to it.
    pub async fn publish(
        &self,
        session_id: Option<&str>,
        event: &str,
        payload: serde_json::Value,
    ) -> Delivery {
        let outbound = OutboundEvent::new(event, payload);
        if let Some(session_id) = session_id {
            let subscribers = self.subscribers(session_id).await;
            if !subscribers.is_empty() {
                let sent = self.connections.send_to_many(&subscribers, &outbound).await;
                return Delivery::Session(sent);
            }
        }
        Delivery::Broadcast(self.connections.broadcast_web(&outbound).await)
    }

    /// Deliver to a session's subscribers only; an empty session drops the event.
    pub async fn publish_strict(
        &self,
        session_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> usize {
        let subscribers = self.subscribers(session_id).await;
        if subscribers.is_empty() {
            return 0;
        }
        let outbound = OutboundEvent::new(event, payload);
        self.connections.send_to_many(&subscribers, &outbound).await
    }

    /// Deliver to the single transport owning `agent_id`.
    pub async fn publish_to_agent(
        &self,
        agent_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> HubResult<()> {
        let agent = self
            .registry
            .lookup(agent_id)
            .await
            .ok_or_else(|| HubError::NotConnected(agent_id.to_string()))?;
        let outbound = OutboundEvent::new(event, payload);
        if self.connections.send_to(agent.transport_id, &outbound).await {
            Ok(())
        } else {
            Err(HubError::NotConnected(agent_id.to_string()))
        }
    }

    /// Deliver to every connected web client.
    pub async fn broadcast(&self, event: &str, payload: serde_json::Value) -> usize {
        self.connections
            .broadcast_web(&OutboundEvent::new(event, payload))
            .await
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.sessions.clear();
        state.memberships.clear();
    }
}
