use crate::connection::TransportId;
use agenthub_core::HealthMetrics;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

/// A web request forwarded to an agent, awaiting the agent's response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub requester: TransportId,
    pub target_agent: String,
    pub session_id: Option<String>,
    pub created_at: Instant,
}

/// Correlation table for request/response exchanges (history requests).
///
/// Each entry is removed exactly once: by the matching response, by its
/// timeout, or by a disconnect of either party. Whoever removes it owns the
/// reply to the requester.
pub struct PendingRequests {
    entries: RwLock<HashMap<String, PendingRequest>>,
    timeout: Duration,
}

impl PendingRequests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn insert(&self, request: PendingRequest) {
        debug!(
            request_id = %request.request_id,
            agent_id = %request.target_agent,
            "Pending request registered"
        );
        self.entries
            .write()
            .await
            .insert(request.request_id.clone(), request);
    }

    /// Remove and return the entry for a response or a timeout.
    pub async fn resolve(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.write().await.remove(request_id)
    }

    /// Drop every request issued by a disconnecting transport.
    pub async fn take_by_requester(&self, requester: TransportId) -> Vec<PendingRequest> {
        self.take_where(|r| r.requester == requester).await
    }

    /// Remove every request waiting on a disconnecting agent.
    pub async fn take_by_agent(&self, agent_id: &str) -> Vec<PendingRequest> {
        self.take_where(|r| r.target_agent == agent_id).await
    }

    async fn take_where<F>(&self, pred: F) -> Vec<PendingRequest>
    where
        F: Fn(&PendingRequest) -> bool,
    {
        let mut entries = self.entries.write().await;
        let ids: Vec<String> = entries
            .values()
            .filter(|r| pred(r))
            .map(|r| r.request_id.clone())
            .collect();
        ids.iter().filter_map(|id| entries.remove(id)).collect()
    }

    pub async fn contains(&self, request_id: &str) -> bool {
        self.entries.read().await.contains_key(request_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Reply to an `agent:ping` probe.
#[derive(Debug, Clone)]
pub struct ProbeReply {
    pub metrics: Option<HealthMetrics>,
    pub received_at: Instant,
}

/// Routes `agent:pong` replies back to the health check awaiting them.
#[derive(Default)]
pub struct ProbeTracker {
    waiters: RwLock<HashMap<String, oneshot::Sender<ProbeReply>>>,
}

impl ProbeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`.
    pub async fn register(&self, request_id: &str) -> oneshot::Receiver<ProbeReply> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .write()
            .await
            .insert(request_id.to_string(), tx);
        rx
    }

    /// Deliver a pong. Returns false if nobody was waiting.
    pub async fn resolve(&self, request_id: &str, reply: ProbeReply) -> bool {
        let waiter = self.waiters.write().await.remove(request_id);
        match waiter {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    warn!(request_id = %request_id, "Pong arrived after probe gave up");
                    return false;
                }
                true
            }
            None => {
                debug!(request_id = %request_id, "No probe waiting for this pong");
                false
            }
        }
    }

    pub async fn cancel(&self, request_id: &str) {
        self.waiters.write().await.remove(request_id);
    }

    pub async fn waiting(&self) -> usize {
        self.waiters.read().await.len()
    }

    pub async fn clear(&self) {
        self.waiters.write().await.clear();
    }
}
