use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Self-reported agent metrics, taken from heartbeat and pong payloads.
///
/// Unknown keys are kept in `extra` so alert rules can target custom metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HealthMetrics {
    /// Look up a metric by the name used in alert rules.
    pub fn value(&self, metric: &str) -> Option<f64> {
        match metric {
            "cpu" | "cpu_usage" => self.cpu,
            "memory" | "mem" | "memory_usage" => self.memory,
            "disk" | "disk_usage" => self.disk,
            "latency" | "response_time" => self.latency,
            "queue_size" | "queueSize" => self.queue_size,
            "error_rate" | "errorRate" => self.error_rate,
            other => self.extra.get(other).and_then(serde_json::Value::as_f64),
        }
    }
}

/// Comparison operator of an alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    GreaterThan,
    LessThan,
    Equals,
    NotEquals,
}

impl AlertCondition {
    /// True when `value <op> threshold` holds.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::GreaterThan => value > threshold,
            AlertCondition::LessThan => value < threshold,
            AlertCondition::Equals => (value - threshold).abs() < f64::EPSILON,
            AlertCondition::NotEquals => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCondition::GreaterThan => write!(f, ">"),
            AlertCondition::LessThan => write!(f, "<"),
            AlertCondition::Equals => write!(f, "=="),
            AlertCondition::NotEquals => write!(f, "!="),
        }
    }
}

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A threshold rule evaluated against fresh metrics on every health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub id: String,
    /// Restricts the rule to one agent; `None` applies it to every agent.
    #[serde(default)]
    pub agent_id: Option<String>,
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default)]
    pub cooldown_minutes: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    /// Whether this rule applies to the given agent.
    pub fn applies_to(&self, agent_id: &str) -> bool {
        self.agent_id.as_deref().map_or(true, |id| id == agent_id)
    }
}

/// An alert produced by a rule whose condition held and whose cooldown elapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredAlert {
    pub rule_id: String,
    pub agent_id: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub condition: AlertCondition,
    pub severity: Severity,
    pub message: String,
    pub fired_at: DateTime<Utc>,
}

/// Overall health verdict recorded for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Offline,
}

impl HealthStatus {
    /// Status implied by a set of fired alerts on a reachable agent.
    ///
    /// Info alerts do not degrade health.
    pub fn from_alerts(alerts: &[FiredAlert]) -> Self {
        match alerts.iter().map(|a| a.severity).max() {
            Some(Severity::Critical) => HealthStatus::Critical,
            Some(Severity::Warning) => HealthStatus::Warning,
            Some(Severity::Info) | None => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Result of one health check. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub connected: bool,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    pub metrics: HealthMetrics,
    #[serde(default)]
    pub alerts: Vec<FiredAlert>,
}
