use crate::task::TaskStatus;
use thiserror::Error;

/// A convenience `Result` alias using [`HubError`].
pub type HubResult<T> = Result<T, HubError>;

/// Top-level error type for the hub.
///
/// Handler-level errors never cross the protocol boundary as-is: the gateway
/// turns them into a structured `{success: false, message, code}` event for
/// the originating transport.
#[derive(Error, Debug)]
pub enum HubError {
    /// Bad secret key or agent name mismatch.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The target agent has no live registry entry.
    #[error("Agent not connected: {0}")]
    NotConnected(String),

    /// A task operation was attempted from a state that forbids it.
    #[error("Invalid state transition for task {task_id}: cannot {operation} from {from}")]
    InvalidStateTransition {
        /// The task the operation targeted.
        task_id: String,
        /// The status the task was in when the operation was rejected.
        from: TaskStatus,
        /// The rejected operation (`assign`, `start`, ...).
        operation: &'static str,
    },

    /// An agent reported progress on a task assigned to someone else.
    #[error("Task {task_id} is not assigned to agent {agent_id}")]
    NotTaskOwner {
        /// The task the report targeted.
        task_id: String,
        /// The agent that sent the report.
        agent_id: String,
    },

    /// A pending request or probe exceeded its deadline.
    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The directory service failed to serve a call.
    #[error("Directory error: {0}")]
    Directory(String),

    /// A hub component stopped serving requests (shutdown in progress).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A malformed or unknown protocol event.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Stable machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Authentication(_) => "authentication_failed",
            HubError::NotConnected(_) => "not_connected",
            HubError::InvalidStateTransition { .. } => "invalid_state_transition",
            HubError::NotTaskOwner { .. } => "not_task_owner",
            HubError::RequestTimeout(_) => "request_timeout",
            HubError::NotFound(_) => "not_found",
            HubError::Directory(_) => "directory_error",
            HubError::Unavailable(_) => "unavailable",
            HubError::Protocol(_) => "protocol_error",
            HubError::Config(_) => "config_error",
            HubError::Json(_) => "serialization_error",
            HubError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = HubError::InvalidStateTransition {
            task_id: "t-1".into(),
            from: TaskStatus::Pending,
            operation: "complete",
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition for task t-1: cannot complete from pending"
        );
        assert_eq!(err.code(), "invalid_state_transition");
    }

    #[test]
    fn test_json_error_from() {
        let parse = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: HubError = parse.into();
        assert_eq!(err.code(), "serialization_error");
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
