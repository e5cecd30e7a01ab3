#![allow(clippy::unwrap_used, clippy::expect_used)]

use agenthub_core::{
    AgentRecord, AgentStatus, InMemoryDirectory, MonitoringConfig, RepositoryCredentials,
    RepositorySnapshot,
};
use agenthub_gateway::GatewayServer;
use agenthub_orchestrator::{Hub, HubConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn agent_record(id: &str) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        name: format!("{id}-name"),
        secret_key: format!("{id}-secret"),
        status: AgentStatus::Offline,
        tags: vec![],
        capabilities: vec!["code".to_string()],
        monitoring: MonitoringConfig {
            enabled: false,
            ..MonitoringConfig::default()
        },
        last_seen_at: None,
    }
}

fn repository() -> RepositorySnapshot {
    RepositorySnapshot {
        id: "repo-1".to_string(),
        url: "https://git.example.com/team/app.git".to_string(),
        branch: Some("main".to_string()),
        credentials: Some(RepositoryCredentials {
            username: Some("ci".to_string()),
            token: Some("s3cr3t".to_string()),
        }),
        config: Value::Null,
    }
}

/// Helper: build a test server on a random port, returning the address.
async fn start_test_server() -> (String, Arc<Hub>) {
    let directory = Arc::new(InMemoryDirectory::seeded(
        vec![agent_record("a1"), agent_record("a2")],
        vec![repository()],
        vec![],
    ));
    let hub = Hub::new(HubConfig::default(), directory);
    let app = GatewayServer::build(hub.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = format!("127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr_str, hub)
}

async fn send(ws: &mut Ws, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data });
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Read frames until `event` arrives, skipping everything else.
async fn expect_event(ws: &mut Ws, event: &str) -> Value {
    let wait = async {
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            if let Message::Text(text) = msg {
                let frame: Value = serde_json::from_str(&text).unwrap();
                if frame["event"] == event {
                    return frame["data"].clone();
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
}

/// Connect a web client and consume its `connected` greeting.
async fn connect_web(addr: &str) -> (Ws, String) {
    let url = format!("ws://{addr}/ws/web");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    let greeting = expect_event(&mut ws, "connected").await;
    let transport_id = greeting["transportId"].as_str().unwrap().to_string();
    (ws, transport_id)
}

/// Connect and authenticate an agent.
async fn connect_agent(addr: &str, id: &str) -> Ws {
    let url = format!("ws://{addr}/ws/agent");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    send(
        &mut ws,
        "agent:authenticate",
        json!({ "name": format!("{id}-name"), "secretKey": format!("{id}-secret") }),
    )
    .await;
    let auth = expect_event(&mut ws, "agent:authenticated").await;
    assert_eq!(auth["agentId"], id);
    ws
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _hub) = start_test_server().await;
    let (_web, _) = connect_web(&addr).await;
    let _agent = connect_agent(&addr, "a1").await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "agenthub");
    assert_eq!(body["agents"], 1);
    assert_eq!(body["webClients"], 1);
}

#[tokio::test]
async fn test_agents_endpoint_lists_connected() {
    let (addr, _hub) = start_test_server().await;
    let _agent = connect_agent(&addr, "a2").await;

    let agents: Vec<Value> = reqwest::get(format!("http://{addr}/api/agents"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agentId"], "a2");
    assert_eq!(agents[0]["displayName"], "a2-name");
    assert_eq!(agents[0]["activeTasks"], 0);
}

#[tokio::test]
async fn test_router_without_server() {
    use tower::ServiceExt;

    let hub = Hub::new(HubConfig::default(), Arc::new(InMemoryDirectory::new()));
    let app = GatewayServer::build(hub);
    let resp = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/api/agents")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!([]));
}

// ---------------------------------------------------------------------------
// Agent lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_agent_connect_and_disconnect_broadcast() {
    let (addr, hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;

    let mut agent = connect_agent(&addr, "a1").await;
    let connected = expect_event(&mut web, "agent:connected").await;
    assert_eq!(connected["agentId"], "a1");
    assert_eq!(connected["capabilities"], json!(["code"]));

    agent.close(None).await.unwrap();
    let gone = expect_event(&mut web, "agent:disconnected").await;
    assert_eq!(gone["agentId"], "a1");
    assert!(hub.registry().lookup("a1").await.is_none());
}

#[tokio::test]
async fn test_repeated_bad_credentials_close_socket() {
    let (addr, hub) = start_test_server().await;
    let url = format!("ws://{addr}/ws/agent");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    for _ in 0..3 {
        send(
            &mut ws,
            "agent:authenticate",
            json!({ "name": "a1-name", "secretKey": "wrong" }),
        )
        .await;
    }

    let mut auth_errors = 0;
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(frame["event"], "error");
                    assert_eq!(frame["data"]["code"], "authentication_failed");
                    auth_errors += 1;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket was not closed");
    assert!(auth_errors >= 2);
    assert!(hub.registry().is_empty().await);
}

#[tokio::test]
async fn test_agent_event_before_authentication_rejected() {
    let (addr, _hub) = start_test_server().await;
    let url = format!("ws://{addr}/ws/agent");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    send(&mut ws, "worker:output", json!({ "taskId": "t1" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "authentication_failed");
    assert_eq!(err["event"], "worker:output");
}

#[tokio::test]
async fn test_unknown_event_returns_structured_error() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;

    send(&mut web, "agent:authenticate", json!({})).await;
    let err = expect_event(&mut web, "error").await;
    assert_eq!(err["success"], false);
    assert_eq!(err["code"], "protocol_error");
    assert!(err["message"].as_str().unwrap().contains("Unknown event"));
}

#[tokio::test]
async fn test_explicit_disconnect_closes_agent() {
    let (addr, hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;
    let mut agent = connect_agent(&addr, "a1").await;

    send(&mut web, "agent:disconnect", json!({ "agentId": "a1" })).await;
    expect_event(&mut agent, "agent:disconnect").await;
    expect_event(&mut web, "agent:disconnected").await;
    let result = expect_event(&mut web, "agent:disconnect_result").await;
    assert_eq!(result["success"], true);
    assert!(hub.registry().lookup("a1").await.is_none());
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_worker_output_reaches_session() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;
    let mut agent = connect_agent(&addr, "a1").await;

    send(&mut web, "session:join", json!({ "sessionId": "s1" })).await;
    expect_event(&mut web, "session:joined").await;

    send(
        &mut agent,
        "worker:output",
        json!({ "taskId": "t1", "sessionId": "s1", "chunk": "compiling" }),
    )
    .await;
    let output = expect_event(&mut web, "worker:output").await;
    assert_eq!(output["chunk"], "compiling");
    assert_eq!(output["agentId"], "a1");
}

#[tokio::test]
async fn test_worker_command_forwarded_to_agent() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;
    let mut agent = connect_agent(&addr, "a1").await;

    send(
        &mut web,
        "worker:input",
        json!({ "agentId": "a1", "taskId": "t1", "sessionId": "s1", "input": "yes" }),
    )
    .await;
    let forwarded = expect_event(&mut agent, "worker:input").await;
    assert_eq!(forwarded["input"], "yes");

    send(
        &mut web,
        "worker:start",
        json!({ "agentId": "ghost", "taskId": "t2" }),
    )
    .await;
    let err = expect_event(&mut web, "error").await;
    assert_eq!(err["code"], "not_connected");
    assert_eq!(err["message"], "Agent not connected: ghost");
}

#[tokio::test]
async fn test_history_roundtrip() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;
    let mut agent = connect_agent(&addr, "a1").await;

    send(
        &mut web,
        "history:request",
        json!({ "sessionId": "s1", "agentId": "a1", "claudeSessionId": "c-9" }),
    )
    .await;
    let request = expect_event(&mut agent, "history:request").await;
    assert_eq!(request["claudeSessionId"], "c-9");
    let request_id = request["requestId"].as_str().unwrap().to_string();

    send(
        &mut agent,
        "history:response",
        json!({
            "requestId": request_id,
            "sessionId": "s1",
            "success": true,
            "messages": [{ "role": "user", "content": "hi" }],
        }),
    )
    .await;
    let response = expect_event(&mut web, "history:response").await;
    assert_eq!(response["success"], true);
    assert_eq!(response["messages"][0]["content"], "hi");
}

#[tokio::test]
async fn test_history_for_offline_agent_fails_immediately() {
    let (addr, hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;

    send(
        &mut web,
        "history:request",
        json!({ "sessionId": "s1", "agentId": "a2" }),
    )
    .await;
    let response = expect_event(&mut web, "history:response").await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "Agent not connected");
    assert!(hub.pending().is_empty().await);
}

// ---------------------------------------------------------------------------
// Tasks, monitoring, batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_task_lifecycle_over_sockets() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;
    let mut agent = connect_agent(&addr, "a1").await;

    send(&mut web, "session:join", json!({ "sessionId": "s-task" })).await;
    expect_event(&mut web, "session:joined").await;

    send(
        &mut web,
        "task:submit",
        json!({ "prompt": "fix the build", "sessionId": "s-task", "repositoryId": "repo-1" }),
    )
    .await;
    let assign = expect_event(&mut agent, "task:assign").await;
    assert_eq!(assign["prompt"], "fix the build");
    assert_eq!(assign["repository"]["credentials"]["token"], "s3cr3t");
    let task_id = assign["taskId"].as_str().unwrap().to_string();

    // Published by the dispatcher before the submit reply goes out.
    let assigned = expect_event(&mut web, "task:assigned").await;
    assert_eq!(assigned["agentId"], "a1");
    assert!(assigned["repository"]["credentials"].is_null());
    let submitted = expect_event(&mut web, "task:submitted").await;
    assert_eq!(submitted["success"], true);
    assert_eq!(submitted["task"]["status"], "assigned");

    send(&mut agent, "task:started", json!({ "taskId": task_id })).await;
    expect_event(&mut web, "task:started").await;

    send(
        &mut agent,
        "task:completed",
        json!({ "taskId": task_id, "output": { "summary": "green" }, "durationMs": 1200 }),
    )
    .await;
    let completed = expect_event(&mut web, "task:completed").await;
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["result"]["output"]["summary"], "green");

    send(&mut web, "task:cancel", json!({ "taskId": task_id })).await;
    let err = expect_event(&mut web, "error").await;
    assert_eq!(err["code"], "invalid_state_transition");
}

#[tokio::test]
async fn test_test_connection_for_unknown_agent() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;

    send(&mut web, "agent:test_connection", json!({ "agentId": "a2" })).await;
    let result = expect_event(&mut web, "agent:test_connection_result").await;
    assert_eq!(result["agentId"], "a2");
    assert_eq!(result["success"], false);
    assert_eq!(result["message"], "Agent not connected");
}

#[tokio::test]
async fn test_monitoring_subscription_groups() {
    let (addr, hub) = start_test_server().await;
    let (mut web, transport_id) = connect_web(&addr).await;

    send(
        &mut web,
        "monitoring:subscribe",
        json!({ "agentIds": ["a1"], "types": ["health"] }),
    )
    .await;
    let subscribed = expect_event(&mut web, "monitoring:subscribed").await;
    assert_eq!(subscribed["groups"], json!(["monitoring:health:a1"]));

    let tid = transport_id.parse().unwrap();
    assert_eq!(
        hub.sessions().sessions_of(tid).await,
        vec!["monitoring:health:a1".to_string()]
    );

    send(
        &mut web,
        "monitoring:unsubscribe",
        json!({ "agentIds": ["a1"], "types": ["health"] }),
    )
    .await;
    expect_event(&mut web, "monitoring:unsubscribed").await;
    assert!(hub.sessions().sessions_of(tid).await.is_empty());

    send(
        &mut web,
        "monitoring:subscribe",
        json!({ "agentIds": ["a1"], "types": ["health", "alerts"] }),
    )
    .await;
    let error = expect_event(&mut web, "error").await;
    assert_eq!(error["code"], "protocol_error");
    assert_eq!(error["event"], "monitoring:subscribe");
    assert!(hub.sessions().sessions_of(tid).await.is_empty());
}

#[tokio::test]
async fn test_batch_delete_skips_connected_agent() {
    let (addr, _hub) = start_test_server().await;
    let (mut web, _) = connect_web(&addr).await;
    let _agent = connect_agent(&addr, "a1").await;

    send(
        &mut web,
        "agent:batch",
        json!({ "type": "delete", "targetIds": ["a1", "a2", "ghost"], "payload": {} }),
    )
    .await;
    let result = expect_event(&mut web, "agent:batch_result").await;
    assert_eq!(result["totalCount"], 3);
    assert_eq!(result["successCount"], 1);
    assert_eq!(result["skippedCount"], 1);
    assert_eq!(result["failureCount"], 1);
}
