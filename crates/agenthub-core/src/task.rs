use crate::agent::SelectionStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
///
/// `pending -> assigned -> running -> {completed | failed}`, with `cancelled`
/// reachable from any non-terminal state. A failed task with retries left is
/// moved back to `pending` by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for an agent.
    Pending,
    /// Handed to an agent, not yet acknowledged.
    Assigned,
    /// The agent reported that execution started.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error and no retries left.
    Failed,
    /// Withdrawn before reaching a terminal state.
    Cancelled,
}

impl TaskStatus {
    /// Returns true for states no operation may leave.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A task record as stored by the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Capability tags an agent must carry to receive this task.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh `pending` task from a submission.
    pub fn from_new(new: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            agent_id: None,
            session_id: new.session_id,
            repository_id: new.repository_id,
            prompt: new.prompt,
            model: new.model,
            required_capabilities: new.required_capabilities,
            strategy: new.strategy,
            retry_count: 0,
            max_retries: new.max_retries,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a failure should send the task back to `pending`.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Submission payload used to create a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub strategy: Option<SelectionStrategy>,
}

/// Outcome reported by an agent for a finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Credentials for cloning a repository. Only ever sent over the
/// authenticated agent channel.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl std::fmt::Debug for RepositoryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryCredentials")
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Repository, credential and config snapshot fetched at assignment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySnapshot {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub credentials: Option<RepositoryCredentials>,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl RepositorySnapshot {
    /// Copy without credentials, safe to fan out to web clients.
    pub fn redacted(&self) -> Self {
        Self {
            credentials: None,
            ..self.clone()
        }
    }
}
