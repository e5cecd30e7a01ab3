//! Typed payloads for every inbound event.
//!
//! Frames arrive as `{"event": "<name>", "data": {...}}`. The envelope is
//! decoded first; each handler then decodes `data` into the struct for its
//! event, so a malformed payload is rejected before any state is touched.

use agenthub_core::{HealthMetrics, HubError, HubResult, SelectionStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Inbound wire envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl InboundEvent {
    pub fn parse(raw: &str) -> HubResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| HubError::Protocol(format!("malformed frame: {e}")))
    }
}

/// Decode an event's `data` into its payload type.
pub fn decode<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> HubResult<T> {
    serde_json::from_value(data)
        .map_err(|e| HubError::Protocol(format!("invalid {event} payload: {e}")))
}

// ---------------------------------------------------------------------------
// agent -> hub
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    pub name: String,
    pub secret_key: String,
    /// Overrides the capabilities stored in the directory.
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub metrics: HealthMetrics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub request_id: String,
    #[serde(default)]
    pub metrics: Option<HealthMetrics>,
}

/// Minimum shape of every `worker:*` event an agent emits. The full payload
/// is forwarded untouched.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEventPayload {
    pub task_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponsePayload {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdPayload {
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletedPayload {
    pub task_id: String,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailedPayload {
    pub task_id: String,
    #[serde(default = "default_failure")]
    pub error: String,
    #[serde(default)]
    pub duration_ms: u64,
}

fn default_failure() -> String {
    "Task failed".to_string()
}

// ---------------------------------------------------------------------------
// web -> hub
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequestPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub claude_session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdPayload {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringPayload {
    #[serde(default)]
    pub agent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub types: Vec<String>,
}

/// `worker:start` / `worker:input` / `worker:recreate` from a web client.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCommandPayload {
    pub agent_id: String,
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskPayload {
    pub task_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_defaults_data() {
        let ev = InboundEvent::parse(r#"{"event": "agents:list"}"#).unwrap();
        assert_eq!(ev.event, "agents:list");
        assert!(ev.data.is_null());
    }

    #[test]
    fn test_malformed_frame_is_protocol_error() {
        let err = InboundEvent::parse("not json").unwrap_err();
        assert_eq!(err.code(), "protocol_error");
    }

    #[test]
    fn test_decode_camel_case() {
        let auth: AuthenticatePayload = decode(
            "agent:authenticate",
            json!({"name": "builder", "secretKey": "k"}),
        )
        .unwrap();
        assert_eq!(auth.secret_key, "k");
        assert!(auth.capabilities.is_none());

        let pong: PongPayload = decode(
            "agent:pong",
            json!({"requestId": "p1", "metrics": {"cpu": 12.5}}),
        )
        .unwrap();
        assert_eq!(pong.metrics.unwrap().cpu, Some(12.5));
    }

    #[test]
    fn test_missing_field_names_event() {
        let err = decode::<SessionPayload>("session:join", json!({})).unwrap_err();
        assert!(err.to_string().contains("invalid session:join payload"));
    }

    #[test]
    fn test_failed_payload_defaults() {
        let failed: TaskFailedPayload = decode("task:failed", json!({"taskId": "t"})).unwrap();
        assert_eq!(failed.error, "Task failed");
        assert_eq!(failed.duration_ms, 0);
    }
}
