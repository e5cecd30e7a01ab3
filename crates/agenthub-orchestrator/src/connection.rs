use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Identifies one socket, agent or web client.
pub type TransportId = Uuid;

/// Which side of the hub a transport belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Agent,
    Web,
}

/// Wire envelope for every message the hub sends: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl OutboundEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Structured failure sent back to the originating transport.
    pub fn error(origin: &str, code: &str, message: impl Into<String>) -> Self {
        Self::new(
            "error",
            serde_json::json!({
                "success": false,
                "event": origin,
                "code": code,
                "message": message.into(),
            }),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Represents a connected socket.
#[derive(Debug)]
pub struct Connection {
    pub id: TransportId,
    pub kind: TransportKind,
    pub connected_at: DateTime<Utc>,
    pub tx: mpsc::UnboundedSender<String>,
}

/// Manages the outbound side of every live transport.
///
/// Dropping a connection's sender (via [`ConnectionManager::remove`]) ends the
/// socket's writer task, which closes the socket.
pub struct ConnectionManager {
    connections: RwLock<HashMap<TransportId, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a fresh transport and return its id and outbound receiver.
    pub async fn open(&self, kind: TransportKind) -> (TransportId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.add(Connection {
            id,
            kind,
            connected_at: Utc::now(),
            tx,
        })
        .await;
        (id, rx)
    }

    pub async fn add(&self, conn: Connection) {
        let id = conn.id;
        let kind = conn.kind;
        self.connections.write().await.insert(id, conn);
        tracing::info!(transport_id = %id, ?kind, "Transport added");
    }

    /// Forget a transport. Returns false if it was already gone.
    pub async fn remove(&self, id: TransportId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(transport_id = %id, "Transport removed");
        }
        removed
    }

    pub async fn contains(&self, id: TransportId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn kind(&self, id: TransportId) -> Option<TransportKind> {
        self.connections.read().await.get(&id).map(|c| c.kind)
    }

    /// Send to one transport. Returns false if it is unknown or closed.
    pub async fn send_to(&self, id: TransportId, event: &OutboundEvent) -> bool {
        let conns = self.connections.read().await;
        match conns.get(&id) {
            Some(conn) => conn.tx.send(event.to_json()).is_ok(),
            None => false,
        }
    }

    /// Send to each listed transport, returning how many accepted the message.
    pub async fn send_to_many<'a, I>(&self, ids: I, event: &OutboundEvent) -> usize
    where
        I: IntoIterator<Item = &'a TransportId>,
    {
        let json = event.to_json();
        let conns = self.connections.read().await;
        ids.into_iter()
            .filter_map(|id| conns.get(id))
            .filter(|conn| conn.tx.send(json.clone()).is_ok())
            .count()
    }

    /// Broadcast to all connected web clients.
    pub async fn broadcast_web(&self, event: &OutboundEvent) -> usize {
        let json = event.to_json();
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|c| c.kind == TransportKind::Web)
            .filter(|c| c.tx.send(json.clone()).is_ok())
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn count_by_kind(&self, kind: TransportKind) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.kind == kind)
            .count()
    }

    /// Drop every transport (shutdown).
    pub async fn clear(&self) {
        self.connections.write().await.clear();
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }
}
