use crate::config::DispatchConfig;
use crate::registry::{AgentRegistry, ConnectedAgent};
use crate::selector::{AgentSelector, SelectionCriteria};
use crate::sessions::SessionRouter;
use agenthub_core::{
    DirectoryService, HubError, HubResult, NewTask, RepositorySnapshot, SelectionStrategy, Task,
    TaskResult, TaskStatus,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<HubResult<T>>;

/// A task lifecycle request for the dispatcher actor.
///
/// Every command carries its own reply channel; the dispatcher processes
/// commands strictly one at a time, so transitions on a task never interleave.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Create a `pending` task and try to assign it right away.
    Submit { new: NewTask, reply: Reply<Task> },
    /// Assign a `pending` task, to `agent_id` or to the selector's pick.
    /// Replies `None` when no agent is available.
    Assign {
        task_id: String,
        agent_id: Option<String>,
        strategy: Option<SelectionStrategy>,
        reply: Reply<Option<Task>>,
    },
    /// `assigned -> running`, reported by the holding agent.
    Start {
        task_id: String,
        agent_id: String,
        reply: Reply<Task>,
    },
    /// `running -> completed`, reported by the holding agent.
    Complete {
        task_id: String,
        agent_id: String,
        result: TaskResult,
        reply: Reply<Task>,
    },
    /// `running -> failed`, or back to `pending` while retries remain.
    Fail {
        task_id: String,
        agent_id: String,
        error: String,
        duration_ms: u64,
        reply: Reply<Task>,
    },
    /// Any non-terminal state `-> cancelled`.
    Cancel { task_id: String, reply: Reply<Task> },
    /// Offer every pending task to the selector. Replies with the number assigned.
    SchedulePending { reply: Reply<usize> },
}

/// Cloneable front door to the dispatcher actor.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchCommand>,
}

impl DispatchHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> DispatchCommand) -> HubResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| HubError::Unavailable("task dispatcher stopped".into()))?;
        rx.await
            .map_err(|_| HubError::Unavailable("task dispatcher dropped the request".into()))?
    }

    pub async fn submit(&self, new: NewTask) -> HubResult<Task> {
        self.call(|reply| DispatchCommand::Submit { new, reply }).await
    }

    pub async fn assign(
        &self,
        task_id: &str,
        agent_id: Option<String>,
        strategy: Option<SelectionStrategy>,
    ) -> HubResult<Option<Task>> {
        let task_id = task_id.to_string();
        self.call(|reply| DispatchCommand::Assign {
            task_id,
            agent_id,
            strategy,
            reply,
        })
        .await
    }

    /// `agent_id` is the reporting agent; it must hold the task.
    pub async fn start(&self, task_id: &str, agent_id: &str) -> HubResult<Task> {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        self.call(|reply| DispatchCommand::Start {
            task_id,
            agent_id,
            reply,
        })
        .await
    }

    pub async fn complete(
        &self,
        task_id: &str,
        agent_id: &str,
        result: TaskResult,
    ) -> HubResult<Task> {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        self.call(|reply| DispatchCommand::Complete {
            task_id,
            agent_id,
            result,
            reply,
        })
        .await
    }

    pub async fn fail(
        &self,
        task_id: &str,
        agent_id: &str,
        error: &str,
        duration_ms: u64,
    ) -> HubResult<Task> {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        let error = error.to_string();
        self.call(|reply| DispatchCommand::Fail {
            task_id,
            agent_id,
            error,
            duration_ms,
            reply,
        })
        .await
    }

    pub async fn cancel(&self, task_id: &str) -> HubResult<Task> {
        let task_id = task_id.to_string();
        self.call(|reply| DispatchCommand::Cancel { task_id, reply })
            .await
    }

    pub async fn schedule_pending(&self) -> HubResult<usize> {
        self.call(|reply| DispatchCommand::SchedulePending { reply })
            .await
    }
}

/// Owns every task state transition.
pub struct TaskDispatcher {
    config: DispatchConfig,
    directory: Arc<dyn DirectoryService>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionRouter>,
    selector: Arc<AgentSelector>,
}

impl TaskDispatcher {
    pub fn new(
        config: DispatchConfig,
        directory: Arc<dyn DirectoryService>,
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionRouter>,
        selector: Arc<AgentSelector>,
    ) -> Self {
        Self {
            config,
            directory,
            registry,
            sessions,
            selector,
        }
    }

    /// Start the actor. It stops once every handle is dropped.
    pub fn spawn(self) -> (DispatchHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(self.config.command_buffer.max(1));
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                self.handle(command).await;
            }
            debug!("Task dispatcher stopped");
        });
        (DispatchHandle { tx }, handle)
    }

    async fn handle(&self, command: DispatchCommand) {
        // A dropped reply receiver only means the caller went away.
        match command {
            DispatchCommand::Submit { new, reply } => {
                let _ = reply.send(self.submit(new).await);
            }
            DispatchCommand::Assign {
                task_id,
                agent_id,
                strategy,
                reply,
            } => {
                let _ = reply.send(self.assign(&task_id, agent_id.as_deref(), strategy).await);
            }
            DispatchCommand::Start {
                task_id,
                agent_id,
                reply,
            } => {
                let _ = reply.send(self.start(&task_id, &agent_id).await);
            }
            DispatchCommand::Complete {
                task_id,
                agent_id,
                result,
                reply,
            } => {
                let _ = reply.send(self.complete(&task_id, &agent_id, result).await);
            }
            DispatchCommand::Fail {
                task_id,
                agent_id,
                error,
                duration_ms,
                reply,
            } => {
                let _ = reply.send(self.fail(&task_id, &agent_id, &error, duration_ms).await);
            }
            DispatchCommand::Cancel { task_id, reply } => {
                let _ = reply.send(self.cancel(&task_id).await);
            }
            DispatchCommand::SchedulePending { reply } => {
                let _ = reply.send(self.schedule_pending().await);
            }
        }
    }

    async fn load(&self, task_id: &str) -> HubResult<Task> {
        self.directory
            .get_task(task_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("task {task_id}")))
    }

    fn require(task: &Task, expected: TaskStatus, operation: &'static str) -> HubResult<()> {
        if task.status == expected {
            Ok(())
        } else {
            Err(HubError::InvalidStateTransition {
                task_id: task.id.clone(),
                from: task.status,
                operation,
            })
        }
    }

    fn require_holder(task: &Task, reporter: &str) -> HubResult<()> {
        if task.agent_id.as_deref() == Some(reporter) {
            Ok(())
        } else {
            Err(HubError::NotTaskOwner {
                task_id: task.id.clone(),
                agent_id: reporter.to_string(),
            })
        }
    }

    fn criteria(&self, task: &Task, strategy: Option<SelectionStrategy>) -> SelectionCriteria {
        SelectionCriteria::new(
            strategy
                .or(task.strategy)
                .unwrap_or(self.config.default_strategy),
            self.config.max_load,
        )
        .with_capabilities(task.required_capabilities.clone())
    }

    async fn submit(&self, new: NewTask) -> HubResult<Task> {
        let task = self.directory.create_task(new).await?;
        info!(task_id = %task.id, "Task created");
        self.sessions
            .publish(
                task.session_id.as_deref(),
                "task:created",
                json!({
                    "taskId": task.id,
                    "sessionId": task.session_id,
                    "status": task.status,
                }),
            )
            .await;

        let criteria = self.criteria(&task, None);
        match self.selector.select(&criteria).await {
            Some(agent) => self.assign_to(task, &agent).await,
            None => {
                debug!(task_id = %task.id, "No agent available, task stays pending");
                Ok(task)
            }
        }
    }

    async fn assign(
        &self,
        task_id: &str,
        agent_id: Option<&str>,
        strategy: Option<SelectionStrategy>,
    ) -> HubResult<Option<Task>> {
        let task = self.load(task_id).await?;
        Self::require(&task, TaskStatus::Pending, "assign")?;

        let agent = match agent_id {
            Some(id) => self
                .registry
                .lookup(id)
                .await
                .ok_or_else(|| HubError::NotConnected(id.to_string()))?,
            None => match self.selector.select(&self.criteria(&task, strategy)).await {
                Some(agent) => agent,
                None => {
                    debug!(task_id = %task_id, "No agent available, task stays pending");
                    return Ok(None);
                }
            },
        };

        self.assign_to(task, &agent).await.map(Some)
    }

    /// Hand a pending task to `agent`. On failure the task is left pending.
    async fn assign_to(&self, mut task: Task, agent: &ConnectedAgent) -> HubResult<Task> {
        let repository = match &task.repository_id {
            Some(id) => Some(
                self.directory
                    .get_repository_with_credentials(id)
                    .await?
                    .ok_or_else(|| HubError::NotFound(format!("repository {id}")))?,
            ),
            None => None,
        };

        task.status = TaskStatus::Assigned;
        task.agent_id = Some(agent.agent_id.clone());
        task.updated_at = Utc::now();
        self.directory.save_task(&task).await?;
        self.registry.increment_load(&agent.agent_id).await;

        // Credentials only travel over the authenticated agent channel.
        let sent = self
            .sessions
            .publish_to_agent(
                &agent.agent_id,
                "task:assign",
                json!({
                    "taskId": task.id,
                    "sessionId": task.session_id,
                    "prompt": task.prompt,
                    "model": task.model,
                    "repository": repository,
                }),
            )
            .await;

        if let Err(e) = sent {
            warn!(task_id = %task.id, agent_id = %agent.agent_id, error = %e, "Assignment not delivered, reverting");
            self.registry.decrement_load(&agent.agent_id).await;
            task.status = TaskStatus::Pending;
            task.agent_id = None;
            task.updated_at = Utc::now();
            self.directory.save_task(&task).await?;
            return Err(e);
        }

        info!(task_id = %task.id, agent_id = %agent.agent_id, "Task assigned");
        self.sessions
            .publish(
                task.session_id.as_deref(),
                "task:assigned",
                json!({
                    "taskId": task.id,
                    "agentId": agent.agent_id,
                    "sessionId": task.session_id,
                    "status": task.status,
                    "repository": repository.as_ref().map(RepositorySnapshot::redacted),
                }),
            )
            .await;
        Ok(task)
    }

    async fn start(&self, task_id: &str, reporter: &str) -> HubResult<Task> {
        let mut task = self.load(task_id).await?;
        Self::require(&task, TaskStatus::Assigned, "start")?;
        Self::require_holder(&task, reporter)?;

        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        self.directory.save_task(&task).await?;

        self.sessions
            .publish(
                task.session_id.as_deref(),
                "task:started",
                json!({ "taskId": task.id, "agentId": task.agent_id, "status": task.status }),
            )
            .await;
        Ok(task)
    }

    async fn complete(&self, task_id: &str, reporter: &str, result: TaskResult) -> HubResult<Task> {
        let mut task = self.load(task_id).await?;
        Self::require(&task, TaskStatus::Running, "complete")?;
        Self::require_holder(&task, reporter)?;

        // The result goes in first: a failed write leaves the task running.
        self.directory.persist_task_result(&task.id, &result).await?;
        task.status = TaskStatus::Completed;
        task.result = Some(result.clone());
        task.updated_at = Utc::now();
        self.directory.save_task(&task).await?;
        if let Some(agent_id) = &task.agent_id {
            self.registry.decrement_load(agent_id).await;
        }

        info!(task_id = %task.id, duration_ms = result.duration_ms, "Task completed");
        self.sessions
            .publish(
                task.session_id.as_deref(),
                "task:completed",
                json!({
                    "taskId": task.id,
                    "agentId": task.agent_id,
                    "status": task.status,
                    "result": result,
                }),
            )
            .await;
        Ok(task)
    }

    async fn fail(
        &self,
        task_id: &str,
        reporter: &str,
        error: &str,
        duration_ms: u64,
    ) -> HubResult<Task> {
        let mut task = self.load(task_id).await?;
        Self::require(&task, TaskStatus::Running, "fail")?;
        Self::require_holder(&task, reporter)?;

        let agent_id = task.agent_id.clone();
        let will_retry = task.can_retry();
        task.last_error = Some(error.to_string());
        task.updated_at = Utc::now();

        if will_retry {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            task.agent_id = None;
            self.directory.save_task(&task).await?;
        } else {
            task.status = TaskStatus::Failed;
            let result = TaskResult {
                success: false,
                output: serde_json::Value::Null,
                error: Some(error.to_string()),
                duration_ms,
            };
            self.directory.persist_task_result(&task.id, &result).await?;
            task.result = Some(result);
            self.directory.save_task(&task).await?;
        }
        if let Some(agent_id) = &agent_id {
            self.registry.decrement_load(agent_id).await;
        }

        warn!(
            task_id = %task.id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            will_retry,
            error = %error,
            "Task failed"
        );
        self.sessions
            .publish(
                task.session_id.as_deref(),
                "task:failed",
                json!({
                    "taskId": task.id,
                    "agentId": agent_id,
                    "error": error,
                    "durationMs": duration_ms,
                    "retryCount": task.retry_count,
                    "willRetry": will_retry,
                }),
            )
            .await;

        if !will_retry {
            return Ok(task);
        }

        let criteria = self.criteria(&task, None);
        match self.selector.select(&criteria).await {
            Some(agent) => match self.assign_to(task.clone(), &agent).await {
                Ok(reassigned) => Ok(reassigned),
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Retry assignment failed, task stays pending");
                    Ok(task)
                }
            },
            None => Ok(task),
        }
    }

    async fn cancel(&self, task_id: &str) -> HubResult<Task> {
        let mut task = self.load(task_id).await?;
        if task.status.is_terminal() {
            return Err(HubError::InvalidStateTransition {
                task_id: task.id.clone(),
                from: task.status,
                operation: "cancel",
            });
        }

        let holder = match task.status {
            TaskStatus::Assigned | TaskStatus::Running => task.agent_id.clone(),
            _ => None,
        };
        task.status = TaskStatus::Cancelled;
        task.updated_at = Utc::now();
        self.directory.save_task(&task).await?;

        if let Some(agent_id) = &holder {
            self.registry.decrement_load(agent_id).await;
            if let Err(e) = self
                .sessions
                .publish_to_agent(agent_id, "task:cancel", json!({ "taskId": task.id }))
                .await
            {
                debug!(task_id = %task.id, agent_id = %agent_id, error = %e, "Cancel not delivered to agent");
            }
        }

        info!(task_id = %task.id, "Task cancelled");
        self.sessions
            .publish(
                task.session_id.as_deref(),
                "task:cancelled",
                json!({ "taskId": task.id, "agentId": holder, "status": task.status }),
            )
            .await;
        Ok(task)
    }

    async fn schedule_pending(&self) -> HubResult<usize> {
        if self.registry.is_empty().await {
            return Ok(0);
        }
        let pending = self.directory.list_pending_tasks().await?;
        let mut assigned = 0;
        for task in pending {
            let criteria = self.criteria(&task, None);
            let Some(agent) = self.selector.select(&criteria).await else {
                continue;
            };
            let task_id = task.id.clone();
            match self.assign_to(task, &agent).await {
                Ok(_) => assigned += 1,
                Err(e) => warn!(task_id = %task_id, error = %e, "Scheduled assignment failed"),
            }
        }
        if assigned > 0 {
            info!(assigned, "Scheduling pass assigned pending tasks");
        }
        Ok(assigned)
    }
}
