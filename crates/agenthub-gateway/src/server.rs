use crate::handlers::DispatchTable;
use agenthub_orchestrator::{Hub, TransportKind};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Shared application state.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub agent_events: DispatchTable,
    pub web_events: DispatchTable,
}

impl AppState {
    fn table(&self, kind: TransportKind) -> &DispatchTable {
        match kind {
            TransportKind::Agent => &self.agent_events,
            TransportKind::Web => &self.web_events,
        }
    }
}

/// The hub's network surface.
pub struct GatewayServer;

impl GatewayServer {
    /// Routes: `/ws/agent`, `/ws/web`, `/health` and `/api/agents`.
    pub fn build(hub: Arc<Hub>) -> Router {
        let state = Arc::new(AppState {
            hub,
            agent_events: DispatchTable::agent(),
            web_events: DispatchTable::web(),
        });

        Router::new()
            .route("/ws/agent", get(agent_ws_handler))
            .route("/ws/web", get(web_ws_handler))
            .route("/health", get(health_handler))
            .route("/api/agents", get(agents_handler))
            .with_state(state)
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let agents = state.hub.registry().len().await;
    let web_clients = state
        .hub
        .connections()
        .count_by_kind(TransportKind::Web)
        .await;
    Json(json!({
        "status": "ok",
        "service": "agenthub",
        "agents": agents,
        "webClients": web_clients,
    }))
}

async fn agents_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.list_agents().await)
}

async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, TransportKind::Agent))
}

async fn web_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, TransportKind::Web))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, kind: TransportKind) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (transport_id, mut rx) = state.hub.open_transport(kind).await;
    info!(transport_id = %transport_id, ?kind, "WebSocket connected");

    // Outbound: drain the transport channel into the socket. The channel
    // closes once the hub drops the transport.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Inbound: frames are handled in arrival order.
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        let table = recv_state.table(kind);
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    table
                        .dispatch(&recv_state.hub, transport_id, text.as_str())
                        .await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.disconnect(transport_id).await;
    info!(transport_id = %transport_id, ?kind, "WebSocket disconnected");
}
