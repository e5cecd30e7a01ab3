use agenthub_core::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the in-memory hub. Every field has a default, so partial
/// sections (or none at all) are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub requests: RequestConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Assistant-message deduplication windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_suppression_window")]
    pub suppression_window_secs: u64,
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl DedupConfig {
    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: default_suppression_window(),
            retention_secs: default_retention(),
        }
    }
}

/// Health-check defaults, overridable per agent by its monitoring config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Consecutive failed probes before an agent is marked offline.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_health_retention")]
    pub retention_hours: u64,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval(),
            probe_timeout_secs: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            retention_hours: default_health_retention(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

/// Correlated request/response settings (history requests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Task dispatch and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval_secs: u64,
    #[serde(default)]
    pub default_strategy: SelectionStrategy,
    /// Maximum concurrently assigned tasks per agent.
    #[serde(default = "default_max_load")]
    pub max_load: usize,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            schedule_interval_secs: default_schedule_interval(),
            default_strategy: SelectionStrategy::default(),
            max_load: default_max_load(),
            command_buffer: default_command_buffer(),
        }
    }
}

/// Agent authentication policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Failed `agent:authenticate` attempts before the transport is closed.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
        }
    }
}

fn default_suppression_window() -> u64 {
    15
}
fn default_retention() -> u64 {
    300
}
fn default_interval() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_health_retention() -> u64 {
    24
}
fn default_purge_interval() -> u64 {
    600
}
fn default_request_timeout() -> u64 {
    10
}
fn default_schedule_interval() -> u64 {
    15
}
fn default_max_load() -> usize {
    4
}
fn default_command_buffer() -> usize {
    256
}
fn default_max_failed_attempts() -> u32 {
    3
}
