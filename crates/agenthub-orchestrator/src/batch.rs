use crate::registry::AgentRegistry;
use agenthub_core::{
    AgentStatus, BatchItemResult, BatchOperation, BatchOperationType, BatchResult,
    DirectoryService, HubError, HubResult, StatusChange,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
struct StatusPayload {
    status: AgentStatus,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct TagsPayload {
    tags: Vec<String>,
}

/// Applies bulk mutations to agent records, one target at a time.
///
/// A failing item never aborts the rest of the batch.
pub struct BatchExecutor {
    directory: Arc<dyn DirectoryService>,
    registry: Arc<AgentRegistry>,
}

impl BatchExecutor {
    pub fn new(directory: Arc<dyn DirectoryService>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            directory,
            registry,
        }
    }

    pub async fn execute(&self, operation: &BatchOperation) -> BatchResult {
        let mut items = Vec::with_capacity(operation.target_ids.len());
        for target_id in &operation.target_ids {
            let item = match operation.op_type {
                BatchOperationType::Delete => self.delete(target_id).await,
                BatchOperationType::UpdateStatus => {
                    self.update_status(target_id, &operation.payload).await
                }
                BatchOperationType::UpdateTags => {
                    self.update_tags(target_id, &operation.payload).await
                }
            };
            items.push(item.unwrap_or_else(|e| {
                warn!(target_id = %target_id, error = %e, "Batch item failed");
                BatchItemResult::failure(target_id.as_str(), e.to_string())
            }));
        }

        let result = BatchResult::from_items(items);
        info!(
            op = ?operation.op_type,
            total = result.total_count,
            succeeded = result.success_count,
            failed = result.failure_count,
            skipped = result.skipped_count,
            "Batch operation executed"
        );
        result
    }

    async fn delete(&self, target_id: &str) -> HubResult<BatchItemResult> {
        let record = self
            .directory
            .get_agent(target_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("agent {target_id}")))?;

        let live = self.registry.lookup(target_id).await.is_some();
        if live || record.status == AgentStatus::Connected {
            return Ok(BatchItemResult::skipped(target_id, "connected"));
        }

        self.directory.delete_agent(target_id).await?;
        Ok(BatchItemResult::success(target_id))
    }

    async fn update_status(
        &self,
        target_id: &str,
        payload: &serde_json::Value,
    ) -> HubResult<BatchItemResult> {
        let StatusPayload { status, reason } = StatusPayload::deserialize(payload)?;
        let change = StatusChange {
            reason: Some(reason.unwrap_or_else(|| "Batch status update".into())),
            latency_ms: None,
        };
        self.directory
            .update_agent_status(target_id, status, change)
            .await?;
        Ok(BatchItemResult::success(target_id))
    }

    async fn update_tags(
        &self,
        target_id: &str,
        payload: &serde_json::Value,
    ) -> HubResult<BatchItemResult> {
        let TagsPayload { tags } = TagsPayload::deserialize(payload)?;
        self.directory.update_agent_tags(target_id, tags).await?;
        Ok(BatchItemResult::success(target_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::AgentMeta;
    use agenthub_core::{AgentRecord, BatchItemOutcome, InMemoryDirectory, MonitoringConfig};
    use serde_json::json;
    use uuid::Uuid;

    fn agent(id: &str, status: AgentStatus) -> AgentRecord {
        AgentRecord {
            id: id.into(),
            name: id.into(),
            secret_key: format!("{id}-key"),
            status,
            tags: vec![],
            capabilities: vec![],
            monitoring: MonitoringConfig::default(),
            last_seen_at: None,
        }
    }

    async fn setup() -> (Arc<InMemoryDirectory>, Arc<AgentRegistry>, BatchExecutor) {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.insert_agent(agent("live", AgentStatus::Connected)).await;
        directory.insert_agent(agent("idle", AgentStatus::Offline)).await;
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register("live", Uuid::new_v4(), AgentMeta::default())
            .await;
        let executor = BatchExecutor::new(directory.clone(), registry.clone());
        (directory, registry, executor)
    }

    fn op(op_type: BatchOperationType, ids: &[&str], payload: serde_json::Value) -> BatchOperation {
        BatchOperation {
            op_type,
            target_ids: ids.iter().map(ToString::to_string).collect(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_delete_skips_connected() {
        let (directory, _, executor) = setup().await;
        let result = executor
            .execute(&op(BatchOperationType::Delete, &["live", "idle"], json!({})))
            .await;
        assert_eq!(result.total_count, 2);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.per_item[0].reason.as_deref(), Some("connected"));
        assert!(directory.get_agent("idle").await.unwrap().is_none());
        assert!(directory.get_agent("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_per_item_isolation() {
        let (_, _, executor) = setup().await;
        let result = executor
            .execute(&op(
                BatchOperationType::UpdateTags,
                &["ghost", "idle"],
                json!({"tags": ["gpu"]}),
            ))
            .await;
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.per_item[0].outcome, BatchItemOutcome::Failure);
        assert_eq!(
            result.success_count + result.failure_count + result.skipped_count,
            result.total_count
        );
    }

    #[tokio::test]
    async fn test_update_status() {
        let (directory, _, executor) = setup().await;
        let result = executor
            .execute(&op(
                BatchOperationType::UpdateStatus,
                &["idle"],
                json!({"status": "error", "reason": "maintenance"}),
            ))
            .await;
        assert_eq!(result.success_count, 1);
        let record = directory.get_agent("idle").await.unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn test_bad_payload_fails_every_item() {
        let (_, _, executor) = setup().await;
        let result = executor
            .execute(&op(
                BatchOperationType::UpdateStatus,
                &["idle", "live"],
                json!({"status": "sleeping"}),
            ))
            .await;
        assert_eq!(result.failure_count, 2);
    }
}
