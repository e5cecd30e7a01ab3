use serde::{Deserialize, Serialize};

/// Kind of bulk mutation applied to a set of agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperationType {
    /// Delete agent records. Live agents are skipped.
    Delete,
    /// Set the directory status of each agent. Payload: `{"status": "..."}`.
    UpdateStatus,
    /// Replace the tags of each agent. Payload: `{"tags": [...]}`.
    UpdateTags,
}

/// An administrative bulk operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    #[serde(rename = "type")]
    pub op_type: BatchOperationType,
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Per-item outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemOutcome {
    Success,
    Failure,
    Skipped,
}

/// Result for one target of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub target_id: String,
    pub outcome: BatchItemOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchItemResult {
    /// The item was applied.
    pub fn success(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            outcome: BatchItemOutcome::Success,
            reason: None,
        }
    }

    /// The item failed; other items are unaffected.
    pub fn failure(target_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            outcome: BatchItemOutcome::Failure,
            reason: Some(reason.into()),
        }
    }

    /// The item was deliberately not applied.
    pub fn skipped(target_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            outcome: BatchItemOutcome::Skipped,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregated outcome of a batch.
///
/// `success_count + failure_count + skipped_count == total_count` always holds
/// because the counts are derived from `per_item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub total_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub per_item: Vec<BatchItemResult>,
}

impl BatchResult {
    /// Aggregate per-item results.
    pub fn from_items(per_item: Vec<BatchItemResult>) -> Self {
        let count = |outcome: BatchItemOutcome| {
            per_item.iter().filter(|i| i.outcome == outcome).count()
        };
        Self {
            total_count: per_item.len(),
            success_count: count(BatchItemOutcome::Success),
            failure_count: count(BatchItemOutcome::Failure),
            skipped_count: count(BatchItemOutcome::Skipped),
            per_item,
        }
    }
}
