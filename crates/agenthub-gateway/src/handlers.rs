//! Explicit event dispatch tables.
//!
//! Each transport kind has its own table mapping an event name to a handler
//! function. An event missing from the table is a protocol error, never a
//! silent drop. Handler failures become an `error` event on the originating
//! transport only.

use crate::protocol::{
    decode, AgentIdPayload, AssignTaskPayload, AuthenticatePayload, HeartbeatPayload,
    HistoryRequestPayload, HistoryResponsePayload, InboundEvent, MonitoringPayload, PongPayload,
    SessionPayload, TaskCompletedPayload, TaskFailedPayload, TaskIdPayload, WorkerCommandPayload,
    WorkerEventPayload,
};
use agenthub_core::{BatchOperation, HubError, HubResult, NewTask, TaskResult};
use agenthub_orchestrator::{HistoryOutcome, Hub, OutboundEvent, TransportId, TransportKind};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a handler knows about the frame it is serving.
#[derive(Clone)]
pub struct EventContext {
    pub hub: Arc<Hub>,
    pub transport_id: TransportId,
    pub event: &'static str,
}

impl EventContext {
    async fn reply(&self, event: &str, data: Value) {
        self.hub
            .send(self.transport_id, &OutboundEvent::new(event, data))
            .await;
    }
}

/// Signature shared by every handler.
pub type HandlerFn = fn(EventContext, Value) -> BoxFuture<'static, HubResult<()>>;

/// Event name to handler, for one transport kind.
pub struct DispatchTable {
    kind: TransportKind,
    handlers: HashMap<&'static str, HandlerFn>,
}

impl DispatchTable {
    fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `event`, replacing any previous entry.
    pub fn on(mut self, event: &'static str, handler: HandlerFn) -> Self {
        self.handlers.insert(event, handler);
        self
    }

    /// Events accepted from agent transports.
    pub fn agent() -> Self {
        Self::new(TransportKind::Agent)
            .on("agent:authenticate", agent_authenticate)
            .on("agent:heartbeat", agent_heartbeat)
            .on("agent:pong", agent_pong)
            .on("worker:output", worker_event)
            .on("worker:message", worker_event)
            .on("worker:status", worker_event)
            .on("worker:tool-use", worker_event)
            .on("worker:progress", worker_event)
            .on("history:response", history_response)
            .on("task:started", task_started)
            .on("task:completed", task_completed)
            .on("task:failed", task_failed)
            .on("agent:batch", agent_batch_from_agent)
    }

    /// Events accepted from web-client transports.
    pub fn web() -> Self {
        Self::new(TransportKind::Web)
            .on("session:join", session_join)
            .on("session:leave", session_leave)
            .on("history:request", history_request)
            .on("agent:test_connection", agent_test_connection)
            .on("monitoring:subscribe", monitoring_subscribe)
            .on("monitoring:unsubscribe", monitoring_unsubscribe)
            .on("task:submit", task_submit)
            .on("task:assign", task_assign)
            .on("task:cancel", task_cancel)
            .on("worker:start", worker_command)
            .on("worker:input", worker_command)
            .on("worker:recreate", worker_command)
            .on("agents:list", agents_list)
            .on("agent:disconnect", agent_disconnect)
            .on("agent:batch", agent_batch)
    }

    /// Table for a transport kind.
    pub fn for_kind(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Agent => Self::agent(),
            TransportKind::Web => Self::web(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn get(&self, event: &str) -> Option<HandlerFn> {
        self.handlers.get(event).copied()
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<&'static str> {
        let mut events: Vec<_> = self.handlers.keys().copied().collect();
        events.sort_unstable();
        events
    }

    /// Decode one text frame and run its handler.
    ///
    /// Never fails: every error is reported back to `transport_id`.
    pub async fn dispatch(&self, hub: &Arc<Hub>, transport_id: TransportId, raw: &str) {
        let inbound = match InboundEvent::parse(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(transport_id = %transport_id, error = %e, "Rejected frame");
                hub.send(transport_id, &OutboundEvent::error("", e.code(), e.to_string()))
                    .await;
                return;
            }
        };

        let Some((&event, &handler)) = self.handlers.get_key_value(inbound.event.as_str()) else {
            let err = HubError::Protocol(format!("Unknown event: {}", inbound.event));
            debug!(transport_id = %transport_id, kind = ?self.kind, event = %inbound.event, "Unknown event");
            hub.send(
                transport_id,
                &OutboundEvent::error(&inbound.event, err.code(), err.to_string()),
            )
            .await;
            return;
        };

        let ctx = EventContext {
            hub: hub.clone(),
            transport_id,
            event,
        };
        if let Err(e) = handler(ctx, inbound.data).await {
            warn!(transport_id = %transport_id, event = %event, code = e.code(), error = %e, "Handler failed");
            hub.send(
                transport_id,
                &OutboundEvent::error(event, e.code(), e.to_string()),
            )
            .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Agent handlers
// ---------------------------------------------------------------------------

fn agent_authenticate(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let auth: AuthenticatePayload = decode(ctx.event, data)?;
        ctx.hub
            .authenticate_agent(ctx.transport_id, &auth.name, &auth.secret_key, auth.capabilities)
            .await?;
        Ok(())
    })
}

fn agent_heartbeat(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let beat: HeartbeatPayload = decode(ctx.event, data)?;
        ctx.hub
            .record_heartbeat(ctx.transport_id, beat.metrics)
            .await
    })
}

fn agent_pong(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let pong: PongPayload = decode(ctx.event, data)?;
        ctx.hub
            .handle_pong(ctx.transport_id, &pong.request_id, pong.metrics)
            .await
    })
}

fn worker_event(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let header: WorkerEventPayload = decode(ctx.event, data.clone())?;
        let delivery = ctx
            .hub
            .route_worker_event(ctx.transport_id, ctx.event, data)
            .await?;
        debug!(task_id = %header.task_id, event = %ctx.event, ?delivery, "Worker event routed");
        Ok(())
    })
}

fn history_response(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let header: HistoryResponsePayload = decode(ctx.event, data.clone())?;
        let delivery = ctx.hub.resolve_history(ctx.transport_id, data).await?;
        debug!(
            request_id = ?header.request_id,
            session_id = ?header.session_id,
            success = ?header.success,
            ?delivery,
            "History response delivered"
        );
        Ok(())
    })
}

fn task_started(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let agent_id = ctx.hub.require_agent(ctx.transport_id).await?;
        let TaskIdPayload { task_id } = decode(ctx.event, data)?;
        ctx.hub.dispatch().start(&task_id, &agent_id).await?;
        Ok(())
    })
}

fn task_completed(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let agent_id = ctx.hub.require_agent(ctx.transport_id).await?;
        let done: TaskCompletedPayload = decode(ctx.event, data)?;
        let result = TaskResult {
            success: true,
            output: done.output,
            error: None,
            duration_ms: done.duration_ms,
        };
        ctx.hub.dispatch().complete(&done.task_id, &agent_id, result).await?;
        Ok(())
    })
}

fn task_failed(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let agent_id = ctx.hub.require_agent(ctx.transport_id).await?;
        let failed: TaskFailedPayload = decode(ctx.event, data)?;
        ctx.hub
            .dispatch()
            .fail(&failed.task_id, &agent_id, &failed.error, failed.duration_ms)
            .await?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Web handlers
// ---------------------------------------------------------------------------

fn session_join(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let SessionPayload { session_id } = decode(ctx.event, data)?;
        ctx.hub.join_session(&session_id, ctx.transport_id).await;
        ctx.reply("session:joined", json!({ "sessionId": session_id }))
            .await;
        Ok(())
    })
}

fn session_leave(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let SessionPayload { session_id } = decode(ctx.event, data)?;
        ctx.hub.leave_session(&session_id, ctx.transport_id).await;
        ctx.reply("session:left", json!({ "sessionId": session_id }))
            .await;
        Ok(())
    })
}

fn history_request(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let request: HistoryRequestPayload = decode(ctx.event, data)?;
        let session_id = request.session_id.clone();
        let outcome = ctx
            .hub
            .request_history(
                ctx.transport_id,
                request.session_id,
                request.agent_id,
                request.claude_session_id,
            )
            .await;
        if let HistoryOutcome::Rejected { error } = outcome {
            ctx.reply(
                "history:response",
                json!({
                    "sessionId": session_id,
                    "success": false,
                    "error": error,
                    "messages": [],
                }),
            )
            .await;
        }
        Ok(())
    })
}

fn agent_test_connection(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let AgentIdPayload { agent_id } = decode(ctx.event, data)?;
        // The probe can take up to the probe timeout; keep the socket reader free.
        tokio::spawn(async move {
            let result = ctx.hub.test_connection(&agent_id).await;
            ctx.reply(
                "agent:test_connection_result",
                serde_json::to_value(&result).unwrap_or_default(),
            )
            .await;
        });
        Ok(())
    })
}

fn monitoring_subscribe(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let request: MonitoringPayload = decode(ctx.event, data)?;
        let groups = ctx
            .hub
            .monitoring_subscribe(ctx.transport_id, request.agent_ids, request.types)
            .await?;
        ctx.reply("monitoring:subscribed", json!({ "groups": groups }))
            .await;
        Ok(())
    })
}

fn monitoring_unsubscribe(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let request: MonitoringPayload = decode(ctx.event, data)?;
        let groups = ctx
            .hub
            .monitoring_unsubscribe(ctx.transport_id, request.agent_ids, request.types)
            .await?;
        ctx.reply("monitoring:unsubscribed", json!({ "groups": groups }))
            .await;
        Ok(())
    })
}

fn task_submit(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let new: NewTask = decode(ctx.event, data)?;
        let task = ctx.hub.dispatch().submit(new).await?;
        ctx.reply("task:submitted", json!({ "success": true, "task": task }))
            .await;
        Ok(())
    })
}

fn task_assign(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let request: AssignTaskPayload = decode(ctx.event, data)?;
        let assigned = ctx
            .hub
            .dispatch()
            .assign(&request.task_id, request.agent_id, request.strategy)
            .await?;
        ctx.reply(
            "task:assign_result",
            json!({
                "success": true,
                "taskId": request.task_id,
                "assigned": assigned.is_some(),
                "task": assigned,
            }),
        )
        .await;
        Ok(())
    })
}

fn task_cancel(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let TaskIdPayload { task_id } = decode(ctx.event, data)?;
        let task = ctx.hub.dispatch().cancel(&task_id).await?;
        ctx.reply("task:cancel_result", json!({ "success": true, "task": task }))
            .await;
        Ok(())
    })
}

fn worker_command(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let command: WorkerCommandPayload = decode(ctx.event, data.clone())?;
        ctx.hub
            .forward_to_agent(&command.agent_id, ctx.event, data)
            .await?;
        debug!(agent_id = %command.agent_id, task_id = %command.task_id, event = %ctx.event, "Worker command forwarded");
        Ok(())
    })
}

fn agents_list(ctx: EventContext, _data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let agents = ctx.hub.list_agents().await;
        ctx.reply("agents:list", json!({ "agents": agents })).await;
        Ok(())
    })
}

fn agent_disconnect(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        let AgentIdPayload { agent_id } = decode(ctx.event, data)?;
        ctx.hub.disconnect_agent(&agent_id).await?;
        ctx.reply(
            "agent:disconnect_result",
            json!({ "success": true, "agentId": agent_id }),
        )
        .await;
        Ok(())
    })
}

fn agent_batch(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(run_batch(ctx, data))
}

/// Batches from the agent side need an authenticated agent on the transport.
fn agent_batch_from_agent(ctx: EventContext, data: Value) -> BoxFuture<'static, HubResult<()>> {
    Box::pin(async move {
        ctx.hub.require_agent(ctx.transport_id).await?;
        run_batch(ctx, data).await
    })
}

async fn run_batch(ctx: EventContext, data: Value) -> HubResult<()> {
    let operation: BatchOperation = decode(ctx.event, data)?;
    let result = ctx.hub.execute_batch(&operation).await;
    ctx.reply("agent:batch_result", serde_json::to_value(&result)?)
        .await;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agenthub_core::{
        AgentRecord, AgentStatus, DirectoryService, InMemoryDirectory, MonitoringConfig,
    };
    use agenthub_orchestrator::HubConfig;
    use tokio::sync::mpsc;

    async fn web_client() -> (Arc<Hub>, TransportId, mpsc::UnboundedReceiver<String>) {
        let hub = Hub::new(HubConfig::default(), Arc::new(InMemoryDirectory::new()));
        let (tid, mut rx) = hub.open_transport(TransportKind::Web).await;
        // `connected` greeting
        rx.recv().await.unwrap();
        (hub, tid, rx)
    }

    fn frame(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_tables_are_disjoint_where_expected() {
        let agent = DispatchTable::agent();
        let web = DispatchTable::web();
        assert!(agent.get("agent:authenticate").is_some());
        assert!(web.get("agent:authenticate").is_none());
        assert!(web.get("worker:start").is_some());
        assert!(agent.get("worker:start").is_none());
        assert!(agent.get("worker:tool-use").is_some());
        assert_eq!(agent.kind(), TransportKind::Agent);
        assert_eq!(DispatchTable::for_kind(TransportKind::Web).events(), web.events());
    }

    #[tokio::test]
    async fn test_unknown_event_is_protocol_error() {
        let (hub, tid, mut rx) = web_client().await;
        DispatchTable::web()
            .dispatch(&hub, tid, r#"{"event":"nope","data":{}}"#)
            .await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["code"], "protocol_error");
        assert_eq!(reply["data"]["event"], "nope");
        assert_eq!(reply["data"]["success"], false);
    }

    #[tokio::test]
    async fn test_malformed_frame_reported() {
        let (hub, tid, mut rx) = web_client().await;
        DispatchTable::web().dispatch(&hub, tid, "{{{").await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["data"]["code"], "protocol_error");
    }

    #[tokio::test]
    async fn test_session_join_acknowledged() {
        let (hub, tid, mut rx) = web_client().await;
        DispatchTable::web()
            .dispatch(&hub, tid, r#"{"event":"session:join","data":{"sessionId":"s1"}}"#)
            .await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["event"], "session:joined");
        assert_eq!(hub.sessions().subscribers("s1").await, vec![tid]);
    }

    #[tokio::test]
    async fn test_history_without_agent_fails_fast() {
        let (hub, tid, mut rx) = web_client().await;
        DispatchTable::web()
            .dispatch(
                &hub,
                tid,
                r#"{"event":"history:request","data":{"sessionId":"s1","agentId":"ghost"}}"#,
            )
            .await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["event"], "history:response");
        assert_eq!(reply["data"]["success"], false);
        assert_eq!(reply["data"]["error"], "Agent not connected");
        assert!(hub.pending().is_empty().await);
    }

    #[tokio::test]
    async fn test_worker_command_to_offline_agent() {
        let (hub, tid, mut rx) = web_client().await;
        DispatchTable::web()
            .dispatch(
                &hub,
                tid,
                r#"{"event":"worker:input","data":{"agentId":"ghost","taskId":"t1"}}"#,
            )
            .await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["data"]["code"], "not_connected");
        assert_eq!(reply["data"]["event"], "worker:input");
    }

    #[tokio::test]
    async fn test_agent_events_need_authentication() {
        let hub = Hub::new(HubConfig::default(), Arc::new(InMemoryDirectory::new()));
        let (tid, mut rx) = hub.open_transport(TransportKind::Agent).await;
        DispatchTable::agent()
            .dispatch(
                &hub,
                tid,
                r#"{"event":"worker:output","data":{"taskId":"t1","sessionId":"s1"}}"#,
            )
            .await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["data"]["code"], "authentication_failed");
    }

    #[tokio::test]
    async fn test_agent_side_batch_requires_authentication() {
        let record = AgentRecord {
            id: "a1".into(),
            name: "a1-name".into(),
            secret_key: "a1-secret".into(),
            status: AgentStatus::Offline,
            tags: vec![],
            capabilities: vec![],
            monitoring: MonitoringConfig {
                enabled: false,
                ..Default::default()
            },
            last_seen_at: None,
        };
        let directory = Arc::new(InMemoryDirectory::seeded(vec![record], vec![], vec![]));
        let hub = Hub::new(HubConfig::default(), directory.clone());
        let (tid, mut rx) = hub.open_transport(TransportKind::Agent).await;
        let batch = r#"{"event":"agent:batch","data":{"type":"update_tags","targetIds":["a1"],"payload":{"tags":["gpu"]}}}"#;

        DispatchTable::agent().dispatch(&hub, tid, batch).await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["code"], "authentication_failed");

        hub.authenticate_agent(tid, "a1-name", "a1-secret", None)
            .await
            .unwrap();
        while let Ok(raw) = rx.try_recv() {
            assert_ne!(frame(&raw)["event"], "agent:batch_result");
        }
        DispatchTable::agent().dispatch(&hub, tid, batch).await;
        let reply = frame(&rx.recv().await.unwrap());
        assert_eq!(reply["event"], "agent:batch_result");
        assert_eq!(reply["data"]["successCount"], 1);
        let stored = directory.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(stored.tags, vec!["gpu".to_string()]);
    }
}
