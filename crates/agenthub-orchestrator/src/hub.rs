use crate::batch::BatchExecutor;
use crate::config::HubConfig;
use crate::connection::{ConnectionManager, OutboundEvent, TransportId, TransportKind};
use crate::dedup::{assistant_text, DedupCache};
use crate::dispatch::{DispatchHandle, TaskDispatcher};
use crate::health::{monitoring_group, HealthMonitor, HealthStore};
use crate::pending::{PendingRequest, PendingRequests, ProbeReply, ProbeTracker};
use crate::registry::{AgentMeta, AgentRegistry, ConnectedAgent};
use crate::selector::AgentSelector;
use crate::sessions::{Delivery, SessionRouter};
use agenthub_core::{
    AgentStatus, BatchOperation, BatchResult, DirectoryService, HealthMetrics, HubError,
    HubResult, StatusChange,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Immediate outcome of a `history:request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Forwarded to the agent; the reply arrives later as `history:response`.
    Forwarded { request_id: String },
    /// Answered right away with `{success: false, error}`; nothing is pending.
    Rejected { error: String },
}

/// Result of an out-of-band `agent:test_connection`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub agent_id: String,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub status: String,
    pub message: Option<String>,
}

/// The orchestration hub: one instance per process, shared by every handler.
///
/// All live state (registry, sessions, dedup, pending requests, health
/// timers) is in memory only. A restart drops it; agents re-authenticate and
/// web clients re-join their sessions.
pub struct Hub {
    config: HubConfig,
    directory: Arc<dyn DirectoryService>,
    connections: Arc<ConnectionManager>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionRouter>,
    dedup: DedupCache,
    pending: Arc<PendingRequests>,
    probes: Arc<ProbeTracker>,
    health: Arc<HealthMonitor>,
    dispatch: DispatchHandle,
    batch: BatchExecutor,
    auth_failures: Mutex<HashMap<TransportId, u32>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Build the hub and start its task dispatcher. Must run inside a Tokio runtime.
    pub fn new(config: HubConfig, directory: Arc<dyn DirectoryService>) -> Arc<Self> {
        let connections = ConnectionManager::new();
        let registry = Arc::new(AgentRegistry::new());
        let sessions = Arc::new(SessionRouter::new(connections.clone(), registry.clone()));
        let probes = Arc::new(ProbeTracker::new());
        let store = Arc::new(HealthStore::new(chrono::Duration::hours(
            config.health.retention_hours as i64,
        )));
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            registry.clone(),
            sessions.clone(),
            directory.clone(),
            probes.clone(),
            store.clone(),
        ));
        let selector = Arc::new(AgentSelector::new(registry.clone(), store));
        let (dispatch, dispatcher) = TaskDispatcher::new(
            config.dispatch.clone(),
            directory.clone(),
            registry.clone(),
            sessions.clone(),
            selector,
        )
        .spawn();

        Arc::new(Self {
            dedup: DedupCache::new(
                config.dedup.suppression_window(),
                config.dedup.retention(),
            ),
            pending: Arc::new(PendingRequests::new(config.requests.timeout())),
            batch: BatchExecutor::new(directory.clone(), registry.clone()),
            config,
            directory,
            connections,
            registry,
            sessions,
            probes,
            health,
            dispatch,
            auth_failures: Mutex::new(HashMap::new()),
            background: Mutex::new(vec![dispatcher]),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionRouter> {
        &self.sessions
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn dispatch(&self) -> &DispatchHandle {
        &self.dispatch
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Start the scheduling pass loop and the health-record purge loop.
    pub async fn start_background(self: &Arc<Self>) {
        let schedule_every =
            Duration::from_secs(self.config.dispatch.schedule_interval_secs.max(1));
        let dispatch = self.dispatch.clone();
        let scheduler = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(schedule_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = dispatch.schedule_pending().await {
                    warn!(error = %e, "Scheduling pass failed");
                }
            }
        });

        let purge_every = Duration::from_secs(self.config.health.purge_interval_secs.max(1));
        let store = self.health.store().clone();
        let purger = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(purge_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge().await;
                if purged > 0 {
                    debug!(purged, "Purged expired health records");
                }
            }
        });

        self.background.lock().await.extend([scheduler, purger]);
        info!(
            schedule_interval_secs = schedule_every.as_secs(),
            purge_interval_secs = purge_every.as_secs(),
            "Hub background loops started"
        );
    }

    /// Send one event to one transport.
    pub async fn send(&self, transport_id: TransportId, event: &OutboundEvent) -> bool {
        self.connections.send_to(transport_id, event).await
    }

    // -----------------------------------------------------------------------
    // Transport lifecycle
    // -----------------------------------------------------------------------

    /// Accept a new socket. Web clients are greeted with their transport id.
    pub async fn open_transport(
        &self,
        kind: TransportKind,
    ) -> (TransportId, mpsc::UnboundedReceiver<String>) {
        let (transport_id, rx) = self.connections.open(kind).await;
        if kind == TransportKind::Web {
            self.send(
                transport_id,
                &OutboundEvent::new("connected", json!({ "transportId": transport_id })),
            )
            .await;
        }
        (transport_id, rx)
    }

    /// Verify an agent's credentials and register its transport.
    pub async fn authenticate_agent(
        &self,
        transport_id: TransportId,
        name: &str,
        secret_key: &str,
        capabilities: Option<Vec<String>>,
    ) -> HubResult<ConnectedAgent> {
        let record = match self.directory.find_agent_by_secret(secret_key).await? {
            Some(record) if record.name == name => record,
            _ => {
                let failures = {
                    let mut map = self.auth_failures.lock().await;
                    let count = map.entry(transport_id).or_insert(0);
                    *count += 1;
                    *count
                };
                warn!(transport_id = %transport_id, name = %name, failures, "Agent authentication failed");
                if failures >= self.config.auth.max_failed_attempts {
                    warn!(transport_id = %transport_id, "Too many failed attempts, closing transport");
                    self.disconnect(transport_id).await;
                }
                return Err(HubError::Authentication("Invalid credentials".into()));
            }
        };
        if let Some(bound) = self.registry.lookup_by_transport(transport_id).await {
            if bound != record.id {
                warn!(
                    transport_id = %transport_id,
                    bound_agent = %bound,
                    agent_id = %record.id,
                    "Transport already carries another agent"
                );
                return Err(HubError::Authentication(format!(
                    "Connection already authenticated as {bound}"
                )));
            }
        }
        self.auth_failures.lock().await.remove(&transport_id);

        let meta = AgentMeta {
            display_name: record.name.clone(),
            capabilities: capabilities.unwrap_or_else(|| record.capabilities.clone()),
        };
        self.registry.register(&record.id, transport_id, meta).await;
        info!(agent_id = %record.id, transport_id = %transport_id, "Agent authenticated");

        if let Err(e) = self
            .directory
            .update_agent_status(
                &record.id,
                AgentStatus::Connected,
                StatusChange::reason("Agent authenticated"),
            )
            .await
        {
            warn!(agent_id = %record.id, error = %e, "Failed to record connected status");
        }

        let agent = self
            .registry
            .lookup(&record.id)
            .await
            .ok_or_else(|| HubError::NotConnected(record.id.clone()))?;

        self.send(
            transport_id,
            &OutboundEvent::new(
                "agent:authenticated",
                json!({ "agentId": agent.agent_id, "name": agent.display_name }),
            ),
        )
        .await;
        self.sessions
            .broadcast(
                "agent:connected",
                json!({
                    "agentId": agent.agent_id,
                    "name": agent.display_name,
                    "capabilities": agent.capabilities,
                }),
            )
            .await;

        self.health
            .start(&agent.agent_id, transport_id, &record.monitoring)
            .await;

        match self.dispatch.schedule_pending().await {
            Ok(0) => {}
            Ok(assigned) => debug!(agent_id = %agent.agent_id, assigned, "Pending tasks scheduled on registration"),
            Err(e) => warn!(error = %e, "Scheduling pass on registration failed"),
        }
        Ok(agent)
    }

    /// The agent bound to `transport_id`, or an authentication error.
    pub async fn require_agent(&self, transport_id: TransportId) -> HubResult<String> {
        self.registry
            .lookup_by_transport(transport_id)
            .await
            .ok_or_else(|| HubError::Authentication("Agent not authenticated".into()))
    }

    /// Tear down everything tied to a closed transport.
    ///
    /// Order: health timer, pending requests, session memberships, then the
    /// transport and registry entry. A superseded agent transport only loses
    /// its own socket.
    pub async fn disconnect(&self, transport_id: TransportId) {
        let agent_id = self.registry.lookup_by_transport(transport_id).await;

        if let Some(agent_id) = &agent_id {
            self.health.stop_for_transport(agent_id, transport_id).await;
        }

        let dropped = self.pending.take_by_requester(transport_id).await;
        if !dropped.is_empty() {
            debug!(transport_id = %transport_id, count = dropped.len(), "Dropped pending requests of closed requester");
        }
        if let Some(agent_id) = &agent_id {
            for request in self.pending.take_by_agent(agent_id).await {
                self.fail_request(&request, "Agent disconnected").await;
            }
        }

        self.sessions.leave_all(transport_id).await;
        self.auth_failures.lock().await.remove(&transport_id);
        self.connections.remove(transport_id).await;

        let Some(agent) = self.registry.remove(transport_id).await else {
            return;
        };
        self.health.forget(&agent.agent_id).await;
        info!(agent_id = %agent.agent_id, transport_id = %transport_id, "Agent disconnected");

        if let Err(e) = self
            .directory
            .update_agent_status(
                &agent.agent_id,
                AgentStatus::Offline,
                StatusChange::reason("Transport closed"),
            )
            .await
        {
            warn!(agent_id = %agent.agent_id, error = %e, "Failed to record offline status");
        }
        self.sessions
            .broadcast(
                "agent:disconnected",
                json!({ "agentId": agent.agent_id, "name": agent.display_name }),
            )
            .await;
    }

    /// Operator-initiated disconnect of a live agent.
    pub async fn disconnect_agent(&self, agent_id: &str) -> HubResult<()> {
        let agent = self
            .registry
            .lookup(agent_id)
            .await
            .ok_or_else(|| HubError::NotConnected(agent_id.to_string()))?;
        self.send(
            agent.transport_id,
            &OutboundEvent::new(
                "agent:disconnect",
                json!({ "reason": "Disconnected by operator" }),
            ),
        )
        .await;
        self.disconnect(agent.transport_id).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Worker traffic
    // -----------------------------------------------------------------------

    /// Fan an agent's `worker:*` event out to the task's session.
    pub async fn route_worker_event(
        &self,
        transport_id: TransportId,
        event: &str,
        mut payload: serde_json::Value,
    ) -> HubResult<Delivery> {
        let agent_id = self.require_agent(transport_id).await?;

        if event == "worker:message" {
            if let Some(text) = assistant_text(&payload) {
                let task_id = payload
                    .get("taskId")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                if self.dedup.should_suppress(task_id, &text).await {
                    debug!(agent_id = %agent_id, task_id = %task_id, "Duplicate assistant message suppressed");
                    return Ok(Delivery::Suppressed);
                }
            }
        }

        let session_id = payload
            .get("sessionId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        if let Some(object) = payload.as_object_mut() {
            object
                .entry("agentId")
                .or_insert_with(|| json!(agent_id));
        }
        Ok(self
            .sessions
            .publish(session_id.as_deref(), event, payload)
            .await)
    }

    /// Forward a web client's `worker:*` command to the owning agent.
    pub async fn forward_to_agent(
        &self,
        agent_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> HubResult<()> {
        self.sessions.publish_to_agent(agent_id, event, payload).await
    }

    // -----------------------------------------------------------------------
    // History requests
    // -----------------------------------------------------------------------

    /// Forward a history request to an agent, correlating the reply.
    pub async fn request_history(
        &self,
        requester: TransportId,
        session_id: Option<String>,
        agent_id: Option<String>,
        claude_session_id: Option<String>,
    ) -> HistoryOutcome {
        let Some(agent_id) = agent_id.filter(|id| !id.is_empty()) else {
            return HistoryOutcome::Rejected {
                error: "Agent ID is required".into(),
            };
        };
        if self.registry.lookup(&agent_id).await.is_none() {
            return HistoryOutcome::Rejected {
                error: "Agent not connected".into(),
            };
        }

        let request_id = Uuid::new_v4().to_string();
        self.pending
            .insert(PendingRequest {
                request_id: request_id.clone(),
                requester,
                target_agent: agent_id.clone(),
                session_id: session_id.clone(),
                created_at: Instant::now(),
            })
            .await;

        let forwarded = self
            .sessions
            .publish_to_agent(
                &agent_id,
                "history:request",
                json!({
                    "requestId": request_id,
                    "sessionId": session_id,
                    "claudeSessionId": claude_session_id,
                }),
            )
            .await;
        if forwarded.is_err() {
            self.pending.resolve(&request_id).await;
            return HistoryOutcome::Rejected {
                error: "Agent not connected".into(),
            };
        }

        let pending = self.pending.clone();
        let connections = self.connections.clone();
        let timeout = self.pending.timeout();
        let id = request_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(request) = pending.resolve(&id).await {
                warn!(request_id = %id, agent_id = %request.target_agent, "History request timed out");
                connections
                    .send_to(
                        request.requester,
                        &history_failure(&request, "Request timed out"),
                    )
                    .await;
            }
        });

        HistoryOutcome::Forwarded { request_id }
    }

    /// Deliver an agent's `history:response` to whoever asked.
    ///
    /// Responses with no matching pending request fall back to the session.
    pub async fn resolve_history(
        &self,
        transport_id: TransportId,
        payload: serde_json::Value,
    ) -> HubResult<Delivery> {
        self.require_agent(transport_id).await?;
        let request_id = payload
            .get("requestId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        if let Some(request) = self.pending.resolve(request_id).await {
            let sent = self
                .connections
                .send_to(request.requester, &OutboundEvent::new("history:response", payload))
                .await;
            return Ok(Delivery::Session(usize::from(sent)));
        }

        debug!(request_id = %request_id, "Unmatched history response, routing by session");
        let session_id = payload
            .get("sessionId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        Ok(self
            .sessions
            .publish(session_id.as_deref(), "history:response", payload)
            .await)
    }

    async fn fail_request(&self, request: &PendingRequest, error: &str) {
        self.connections
            .send_to(request.requester, &history_failure(request, error))
            .await;
    }

    // -----------------------------------------------------------------------
    // Agent reports
    // -----------------------------------------------------------------------

    pub async fn handle_pong(
        &self,
        transport_id: TransportId,
        request_id: &str,
        metrics: Option<HealthMetrics>,
    ) -> HubResult<()> {
        let agent_id = self.require_agent(transport_id).await?;
        let received_at = Instant::now();
        if !self
            .probes
            .resolve(request_id, ProbeReply {
                metrics,
                received_at,
            })
            .await
        {
            debug!(agent_id = %agent_id, request_id = %request_id, "Stale pong ignored");
        }
        Ok(())
    }

    pub async fn record_heartbeat(
        &self,
        transport_id: TransportId,
        metrics: HealthMetrics,
    ) -> HubResult<()> {
        let agent_id = self.require_agent(transport_id).await?;
        self.registry.record_metrics(&agent_id, metrics).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Web commands
    // -----------------------------------------------------------------------

    /// Probe an agent outside its periodic schedule.
    pub async fn test_connection(&self, agent_id: &str) -> ConnectionTestResult {
        if self.registry.lookup(agent_id).await.is_none() {
            return ConnectionTestResult {
                agent_id: agent_id.to_string(),
                success: false,
                latency_ms: None,
                status: AgentStatus::Offline.to_string(),
                message: Some("Agent not connected".into()),
            };
        }
        match self.health.check_now(agent_id).await {
            Ok(outcome) => ConnectionTestResult {
                agent_id: agent_id.to_string(),
                success: outcome.error.is_none(),
                latency_ms: outcome.record.latency_ms,
                status: outcome.record.status.to_string(),
                message: outcome.error,
            },
            Err(e) => ConnectionTestResult {
                agent_id: agent_id.to_string(),
                success: false,
                latency_ms: None,
                status: AgentStatus::Error.to_string(),
                message: Some(e.to_string()),
            },
        }
    }

    /// Join monitoring groups. With no agent ids the unscoped group is joined.
    /// Unknown types are rejected before any group is joined.
    pub async fn monitoring_subscribe(
        &self,
        transport_id: TransportId,
        agent_ids: Option<Vec<String>>,
        types: Vec<String>,
    ) -> HubResult<Vec<String>> {
        let groups = monitoring_groups(agent_ids, types)?;
        for group in &groups {
            self.sessions.join(group, transport_id).await;
        }
        Ok(groups)
    }

    pub async fn monitoring_unsubscribe(
        &self,
        transport_id: TransportId,
        agent_ids: Option<Vec<String>>,
        types: Vec<String>,
    ) -> HubResult<Vec<String>> {
        let groups = monitoring_groups(agent_ids, types)?;
        for group in &groups {
            self.sessions.leave(group, transport_id).await;
        }
        Ok(groups)
    }

    pub async fn join_session(&self, session_id: &str, transport_id: TransportId) -> bool {
        self.sessions.join(session_id, transport_id).await
    }

    pub async fn leave_session(&self, session_id: &str, transport_id: TransportId) -> bool {
        self.sessions.leave(session_id, transport_id).await
    }

    pub async fn list_agents(&self) -> Vec<ConnectedAgent> {
        self.registry.list().await
    }

    pub async fn execute_batch(&self, operation: &BatchOperation) -> BatchResult {
        self.batch.execute(operation).await
    }

    /// Stop every loop and timer and drop all in-memory state.
    pub async fn shutdown(&self) {
        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }
        self.health.stop_all().await;
        self.health.store().clear().await;
        self.probes.clear().await;
        self.pending.clear().await;
        self.sessions.clear().await;
        self.dedup.clear().await;
        self.registry.clear().await;
        self.auth_failures.lock().await.clear();
        self.connections.clear().await;
        info!("Hub shut down");
    }
}

fn history_failure(request: &PendingRequest, error: &str) -> OutboundEvent {
    OutboundEvent::new(
        "history:response",
        json!({
            "requestId": request.request_id,
            "sessionId": request.session_id,
            "success": false,
            "error": error,
            "messages": [],
        }),
    )
}

/// Alerts and status changes are broadcast to every web client, so only
/// health records are routed through monitoring groups.
const MONITORING_TYPES: &[&str] = &["health"];

fn monitoring_groups(
    agent_ids: Option<Vec<String>>,
    types: Vec<String>,
) -> HubResult<Vec<String>> {
    let types = if types.is_empty() {
        vec!["health".to_string()]
    } else {
        types
    };
    if let Some(unknown) = types.iter().find(|t| !MONITORING_TYPES.contains(&t.as_str())) {
        return Err(HubError::Protocol(format!(
            "unknown monitoring type '{unknown}'"
        )));
    }
    Ok(match agent_ids.filter(|ids| !ids.is_empty()) {
        None => types.iter().map(|t| monitoring_group(t, None)).collect(),
        Some(ids) => types
            .iter()
            .flat_map(|t| ids.iter().map(move |id| monitoring_group(t, Some(id))))
            .collect(),
    })
}
