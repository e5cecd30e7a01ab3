//! Core types and error definitions for the agenthub orchestration hub.
//!
//! This crate holds everything shared between the hub, the gateway and the
//! binary: the error taxonomy, the records owned by the directory service,
//! and the [`DirectoryService`] trait through which the hub reaches storage.
//!
//! # Main types
//!
//! - [`HubError`]: Unified error enum; [`HubError::code`] is sent to clients.
//! - [`HubResult`]: Convenience alias for `Result<T, HubError>`.
//! - [`Task`] / [`TaskStatus`]: Task records and their lifecycle.
//! - [`AgentRecord`] / [`AgentStatus`]: Persistent agent records.
//! - [`AlertRule`] / [`HealthRecord`]: Health evaluation inputs and outputs.
//! - [`BatchOperation`] / [`BatchResult`]: Bulk administrative mutations.
//! - [`DirectoryService`] / [`InMemoryDirectory`]: The persistence boundary.

/// Persistent agent records and selection strategies.
pub mod agent;
/// Bulk operation requests and aggregated results.
pub mod batch;
/// The directory service boundary and its in-memory implementation.
pub mod directory;
/// Error taxonomy.
pub mod error;
/// Health metrics, alert rules and health records.
pub mod health;
/// Task records and lifecycle states.
pub mod task;

pub use agent::{AgentRecord, AgentStatus, MonitoringConfig, SelectionStrategy, StatusChange};
pub use batch::{BatchItemOutcome, BatchItemResult, BatchOperation, BatchOperationType, BatchResult};
pub use directory::{DirectoryService, InMemoryDirectory};
pub use error::{HubError, HubResult};
pub use health::{
    AlertCondition, AlertRule, FiredAlert, HealthMetrics, HealthRecord, HealthStatus, Severity,
};
pub use task::{NewTask, RepositoryCredentials, RepositorySnapshot, Task, TaskResult, TaskStatus};
