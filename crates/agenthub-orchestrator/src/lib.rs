//! The real-time orchestration hub.
//!
//! Tracks which agents and web clients are connected, routes worker output
//! to the sessions that asked for it, dispatches tasks to agents through a
//! single actor, and continuously checks agent health against alert rules.
//!
//! # Main types
//!
//! - [`Hub`]: Owns every component; one instance per process.
//! - [`ConnectionManager`]: Outbound channel of every live transport.
//! - [`AgentRegistry`]: Agent identity to live transport, latest-write-wins.
//! - [`SessionRouter`]: Session-scoped fan-out with broadcast fallback.
//! - [`DedupCache`]: Time-window suppression of repeated assistant messages.
//! - [`AgentSelector`]: Load-balancing strategies over healthy agents.
//! - [`TaskDispatcher`] / [`DispatchHandle`]: The task lifecycle actor.
//! - [`HealthMonitor`]: Periodic probes, alert rules and health history.
//! - [`BatchExecutor`]: Bulk agent mutations with per-item results.
//! - [`HubConfig`]: Tunables, all defaulted.

/// Bulk operations over agent records.
pub mod batch;
/// Hub tunables.
pub mod config;
/// Transport bookkeeping and the wire envelope.
pub mod connection;
/// Assistant-message deduplication.
pub mod dedup;
/// Task lifecycle actor.
pub mod dispatch;
/// Health checks, alerting and health history.
pub mod health;
/// The hub itself.
pub mod hub;
/// Request/response correlation.
pub mod pending;
/// Live agent registry.
pub mod registry;
/// Agent selection strategies.
pub mod selector;
/// Session membership and fan-out.
pub mod sessions;

pub use batch::BatchExecutor;
pub use config::{AuthConfig, DedupConfig, DispatchConfig, HealthConfig, HubConfig, RequestConfig};
pub use connection::{Connection, ConnectionManager, OutboundEvent, TransportId, TransportKind};
pub use dedup::{assistant_text, DedupCache};
pub use dispatch::{DispatchCommand, DispatchHandle, TaskDispatcher};
pub use health::{AlertEvaluator, CheckOutcome, HealthMonitor, HealthStore};
pub use hub::{ConnectionTestResult, HistoryOutcome, Hub};
pub use pending::{PendingRequest, PendingRequests, ProbeReply, ProbeTracker};
pub use registry::{AgentMeta, AgentRegistry, ConnectedAgent};
pub use selector::{AgentSelector, SelectionCriteria};
pub use sessions::{Delivery, SessionRouter};
