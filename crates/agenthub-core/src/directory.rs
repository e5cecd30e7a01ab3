use crate::agent::{AgentRecord, AgentStatus, StatusChange};
use crate::error::{HubError, HubResult};
use crate::health::AlertRule;
use crate::task::{NewTask, RepositorySnapshot, Task, TaskResult, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence layer for agent, repository, task and alert-rule records.
///
/// The hub never writes to storage except through this trait. Every call may
/// suspend; callers must not hold in-memory hub locks across it.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Resolve an agent by its secret key.
    async fn find_agent_by_secret(&self, secret_key: &str) -> HubResult<Option<AgentRecord>>;
    /// Fetch an agent record.
    async fn get_agent(&self, agent_id: &str) -> HubResult<Option<AgentRecord>>;
    /// Record a connectivity status change.
    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        change: StatusChange,
    ) -> HubResult<()>;
    /// Replace an agent's tags.
    async fn update_agent_tags(&self, agent_id: &str, tags: Vec<String>) -> HubResult<()>;
    /// Delete an agent record.
    async fn delete_agent(&self, agent_id: &str) -> HubResult<()>;
    /// Repository snapshot including clone credentials.
    async fn get_repository_with_credentials(
        &self,
        repository_id: &str,
    ) -> HubResult<Option<RepositorySnapshot>>;
    /// Create a `pending` task.
    async fn create_task(&self, new: NewTask) -> HubResult<Task>;
    /// Fetch a task.
    async fn get_task(&self, task_id: &str) -> HubResult<Option<Task>>;
    /// Overwrite a task record.
    async fn save_task(&self, task: &Task) -> HubResult<()>;
    /// Store the final result of a task.
    async fn persist_task_result(&self, task_id: &str, result: &TaskResult) -> HubResult<()>;
    /// All tasks currently in `pending`, oldest first.
    async fn list_pending_tasks(&self) -> HubResult<Vec<Task>>;
    /// Enabled alert rules that apply to the agent.
    async fn list_enabled_alert_rules(&self, agent_id: &str) -> HubResult<Vec<AlertRule>>;
}

/// Directory service kept entirely in memory.
///
/// Used by the binary when no external directory is configured (seeded from
/// the config file) and by tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    agents: RwLock<HashMap<String, AgentRecord>>,
    repositories: RwLock<HashMap<String, RepositorySnapshot>>,
    tasks: RwLock<HashMap<String, Task>>,
    alert_rules: RwLock<Vec<AlertRule>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the directory in one go.
    pub fn seeded(
        agents: Vec<AgentRecord>,
        repositories: Vec<RepositorySnapshot>,
        alert_rules: Vec<AlertRule>,
    ) -> Self {
        Self {
            agents: RwLock::new(agents.into_iter().map(|a| (a.id.clone(), a)).collect()),
            repositories: RwLock::new(
                repositories.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ),
            tasks: RwLock::new(HashMap::new()),
            alert_rules: RwLock::new(alert_rules),
        }
    }

    pub async fn insert_agent(&self, agent: AgentRecord) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    pub async fn insert_repository(&self, repository: RepositorySnapshot) {
        self.repositories
            .write()
            .await
            .insert(repository.id.clone(), repository);
    }

    pub async fn insert_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    pub async fn insert_alert_rule(&self, rule: AlertRule) {
        self.alert_rules.write().await.push(rule);
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn find_agent_by_secret(&self, secret_key: &str) -> HubResult<Option<AgentRecord>> {
        if secret_key.is_empty() {
            return Ok(None);
        }
        let agents = self.agents.read().await;
        Ok(agents.values().find(|a| a.secret_key == secret_key).cloned())
    }

    async fn get_agent(&self, agent_id: &str) -> HubResult<Option<AgentRecord>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        _change: StatusChange,
    ) -> HubResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| HubError::NotFound(format!("agent {agent_id}")))?;
        agent.status = status;
        agent.last_seen_at = Some(Utc::now());
        Ok(())
    }

    async fn update_agent_tags(&self, agent_id: &str, tags: Vec<String>) -> HubResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| HubError::NotFound(format!("agent {agent_id}")))?;
        agent.tags = tags;
        Ok(())
    }

    async fn delete_agent(&self, agent_id: &str) -> HubResult<()> {
        self.agents
            .write()
            .await
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| HubError::NotFound(format!("agent {agent_id}")))
    }

    async fn get_repository_with_credentials(
        &self,
        repository_id: &str,
    ) -> HubResult<Option<RepositorySnapshot>> {
        Ok(self.repositories.read().await.get(repository_id).cloned())
    }

    async fn create_task(&self, new: NewTask) -> HubResult<Task> {
        let task = Task::from_new(new);
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: &str) -> HubResult<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn save_task(&self, task: &Task) -> HubResult<()> {
        let mut stored = task.clone();
        stored.updated_at = Utc::now();
        self.tasks.write().await.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn persist_task_result(&self, task_id: &str, result: &TaskResult) -> HubResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| HubError::NotFound(format!("task {task_id}")))?;
        task.result = Some(result.clone());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn list_pending_tasks(&self) -> HubResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut pending: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        Ok(pending)
    }

    async fn list_enabled_alert_rules(&self, agent_id: &str) -> HubResult<Vec<AlertRule>> {
        let rules = self.alert_rules.read().await;
        Ok(rules
            .iter()
            .filter(|r| r.enabled && r.applies_to(agent_id))
            .cloned()
            .collect())
    }
}
