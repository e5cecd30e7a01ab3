use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connectivity status of an agent as tracked by the directory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// A live, authenticated transport is registered for the agent.
    Connected,
    /// No live transport, or health checks escalated to offline.
    Offline,
    /// The agent is reachable but reported a critical condition.
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Connected => write!(f, "connected"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// Per-agent health-check settings. Unset values fall back to hub defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: None,
            probe_timeout_secs: None,
        }
    }
}

/// Persistent agent record owned by the directory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub secret_key: String,
    #[serde(default = "default_status")]
    pub status: AgentStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

fn default_status() -> AgentStatus {
    AgentStatus::Offline
}

/// Metadata attached to a status update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl StatusChange {
    /// Status change carrying only a reason.
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            latency_ms: None,
        }
    }
}

/// Agent selection strategy for the load balancer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Rotate through the filtered candidate set.
    #[default]
    RoundRobin,
    /// Fewest concurrently assigned tasks.
    LeastConnections,
    /// Smallest last measured probe latency; unknown counts as infinite.
    LowestLatency,
    /// Most CPU and memory headroom from the latest heartbeat.
    ResourceBased,
    /// Uniformly random candidate.
    Random,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionStrategy::RoundRobin => write!(f, "round_robin"),
            SelectionStrategy::LeastConnections => write!(f, "least_connections"),
            SelectionStrategy::LowestLatency => write!(f, "lowest_latency"),
            SelectionStrategy::ResourceBased => write!(f, "resource_based"),
            SelectionStrategy::Random => write!(f, "random"),
        }
    }
}
