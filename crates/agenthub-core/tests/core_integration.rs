#![allow(clippy::unwrap_used, clippy::expect_used)]

use agenthub_core::*;

// ---------------------------------------------------------------------------
// 1. Task record wire format
// ---------------------------------------------------------------------------

#[test]
fn task_serializes_camel_case() {
    let task = Task::from_new(NewTask {
        prompt: "add a README".to_string(),
        session_id: Some("sess-1".to_string()),
        max_retries: 3,
        required_capabilities: vec!["claude".to_string()],
        ..Default::default()
    });

    let json = serde_json::to_value(&task).unwrap();
    assert_eq!(json["status"], "pending");
    assert_eq!(json["sessionId"], "sess-1");
    assert_eq!(json["maxRetries"], 3);
    assert_eq!(json["retryCount"], 0);
    assert_eq!(json["requiredCapabilities"][0], "claude");

    let back: Task = serde_json::from_value(json).unwrap();
    assert_eq!(back.id, task.id);
    assert_eq!(back.status, TaskStatus::Pending);
}

// ---------------------------------------------------------------------------
// 2. Error Display and codes
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_codes() {
    let err = HubError::NotConnected("a1".to_string());
    assert_eq!(err.to_string(), "Agent not connected: a1");
    assert_eq!(err.code(), "not_connected");

    let err = HubError::Authentication("bad secret".to_string());
    assert_eq!(err.code(), "authentication_failed");

    let err = HubError::RequestTimeout("history".to_string());
    assert_eq!(err.to_string(), "Request timed out: history");

    let io: HubError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
    assert_eq!(io.code(), "io_error");
}

// ---------------------------------------------------------------------------
// 3. Directory task lifecycle through the trait object
// ---------------------------------------------------------------------------

#[tokio::test]
async fn directory_task_roundtrip_via_trait_object() {
    let dir: Box<dyn DirectoryService> = Box::new(InMemoryDirectory::new());

    let task = dir
        .create_task(NewTask {
            prompt: "refactor".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut stored = dir.get_task(&task.id).await.unwrap().unwrap();
    stored.status = TaskStatus::Completed;
    dir.save_task(&stored).await.unwrap();

    let result = TaskResult {
        success: true,
        output: serde_json::json!({"summary": "done"}),
        error: None,
        duration_ms: 1200,
    };
    dir.persist_task_result(&task.id, &result).await.unwrap();

    let finished = dir.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.result, Some(result));
    assert!(dir.list_pending_tasks().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// 4. Repository snapshots keep credentials only when asked
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repository_snapshot_with_credentials() {
    let dir = InMemoryDirectory::new();
    dir.insert_repository(RepositorySnapshot {
        id: "repo".to_string(),
        url: "https://git.example.com/repo.git".to_string(),
        branch: None,
        credentials: Some(RepositoryCredentials {
            username: Some("ci".to_string()),
            token: Some("tok".to_string()),
        }),
        config: serde_json::Value::Null,
    })
    .await;

    let snapshot = dir
        .get_repository_with_credentials("repo")
        .await
        .unwrap()
        .unwrap();
    assert!(snapshot.credentials.is_some());
    assert!(snapshot.redacted().credentials.is_none());
    assert!(dir
        .get_repository_with_credentials("missing")
        .await
        .unwrap()
        .is_none());
}
