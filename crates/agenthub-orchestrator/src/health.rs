use crate::config::HealthConfig;
use crate::connection::TransportId;
use crate::pending::ProbeTracker;
use crate::registry::AgentRegistry;
use crate::sessions::SessionRouter;
use agenthub_core::{
    AgentStatus, AlertRule, DirectoryService, FiredAlert, HealthMetrics, HealthRecord,
    HealthStatus, HubError, HubResult, MonitoringConfig, StatusChange,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session group receiving every `agent:health` record.
pub const MONITORING_HEALTH: &str = "monitoring:health";

/// Name of the monitoring group for `kind`, optionally scoped to one agent.
pub fn monitoring_group(kind: &str, agent_id: Option<&str>) -> String {
    match agent_id {
        Some(id) => format!("monitoring:{kind}:{id}"),
        None => format!("monitoring:{kind}"),
    }
}

// ---------------------------------------------------------------------------
// HealthStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    records: HashMap<String, VecDeque<HealthRecord>>,
    latest: HashMap<String, HealthStatus>,
}

/// Append-only, age-bounded health history per agent.
pub struct HealthStore {
    retention: chrono::Duration,
    inner: RwLock<StoreInner>,
}

impl HealthStore {
    pub fn new(retention: chrono::Duration) -> Self {
        Self {
            retention,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Append a record and drop that agent's records older than the retention.
    pub async fn append(&self, record: HealthRecord) {
        let cutoff = record.timestamp - self.retention;
        let mut inner = self.inner.write().await;
        inner
            .latest
            .insert(record.agent_id.clone(), record.status);
        let history = inner.records.entry(record.agent_id.clone()).or_default();
        while history.front().is_some_and(|r| r.timestamp < cutoff) {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Purge every agent's records older than the retention. Returns how many were dropped.
    pub async fn purge_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut inner = self.inner.write().await;
        let mut purged = 0;
        for history in inner.records.values_mut() {
            let before = history.len();
            history.retain(|r| r.timestamp >= cutoff);
            purged += before - history.len();
        }
        inner.records.retain(|_, history| !history.is_empty());
        purged
    }

    pub async fn purge(&self) -> usize {
        self.purge_at(Utc::now()).await
    }

    pub async fn latest_status(&self, agent_id: &str) -> Option<HealthStatus> {
        self.inner.read().await.latest.get(agent_id).copied()
    }

    /// Records for one agent, oldest first.
    pub async fn history(&self, agent_id: &str) -> Vec<HealthRecord> {
        self.inner
            .read()
            .await
            .records
            .get(agent_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget the cached verdict so a re-registered agent starts fresh.
    pub async fn reset_status(&self, agent_id: &str) {
        self.inner.write().await.latest.remove(agent_id);
    }

    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.values().map(VecDeque::len).sum()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
        inner.latest.clear();
    }
}

// ---------------------------------------------------------------------------
// AlertEvaluator
// ---------------------------------------------------------------------------

/// Evaluates alert rules against fresh metrics, enforcing per-rule cooldowns.
#[derive(Default)]
pub struct AlertEvaluator {
    last_fired: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn evaluate(
        &self,
        agent_id: &str,
        rules: &[AlertRule],
        metrics: &HealthMetrics,
    ) -> Vec<FiredAlert> {
        self.evaluate_at(agent_id, rules, metrics, Utc::now()).await
    }

    /// Rules that are disabled, scoped to another agent, or reference a metric
    /// the agent did not report are skipped.
    pub async fn evaluate_at(
        &self,
        agent_id: &str,
        rules: &[AlertRule],
        metrics: &HealthMetrics,
        now: DateTime<Utc>,
    ) -> Vec<FiredAlert> {
        let mut last_fired = self.last_fired.lock().await;
        let mut fired = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled && r.applies_to(agent_id)) {
            let Some(value) = metrics.value(&rule.metric) else {
                continue;
            };
            if !rule.condition.holds(value, rule.threshold) {
                continue;
            }

            let key = (agent_id.to_string(), rule.id.clone());
            let cooldown = chrono::Duration::minutes(rule.cooldown_minutes as i64);
            if let Some(last) = last_fired.get(&key) {
                if now - *last < cooldown {
                    debug!(agent_id = %agent_id, rule_id = %rule.id, "Alert in cooldown");
                    continue;
                }
            }
            last_fired.insert(key, now);

            fired.push(FiredAlert {
                rule_id: rule.id.clone(),
                agent_id: agent_id.to_string(),
                metric: rule.metric.clone(),
                value,
                threshold: rule.threshold,
                condition: rule.condition,
                severity: rule.severity,
                message: format!(
                    "{} is {value:.2} ({} {})",
                    rule.metric, rule.condition, rule.threshold
                ),
                fired_at: now,
            });
        }
        fired
    }

    pub async fn clear(&self) {
        self.last_fired.lock().await.clear();
    }
}

// ---------------------------------------------------------------------------
// HealthMonitor
// ---------------------------------------------------------------------------

/// Outcome of a single health check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub record: HealthRecord,
    /// The failure threshold was reached; scheduled checks stop.
    pub escalated: bool,
    /// Probe error message, if the probe failed.
    pub error: Option<String>,
}

struct Timer {
    transport_id: TransportId,
    handle: JoinHandle<()>,
}

/// Periodic per-agent connectivity probes, metric evaluation and alerting.
pub struct HealthMonitor {
    config: HealthConfig,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionRouter>,
    directory: Arc<dyn DirectoryService>,
    probes: Arc<ProbeTracker>,
    store: Arc<HealthStore>,
    evaluator: AlertEvaluator,
    timers: Mutex<HashMap<String, Timer>>,
    failures: Mutex<HashMap<String, u32>>,
    /// Last connectivity reported to the directory, per agent.
    connectivity: Mutex<HashMap<String, bool>>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionRouter>,
        directory: Arc<dyn DirectoryService>,
        probes: Arc<ProbeTracker>,
        store: Arc<HealthStore>,
    ) -> Self {
        Self {
            config,
            registry,
            sessions,
            directory,
            probes,
            store,
            evaluator: AlertEvaluator::new(),
            timers: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            connectivity: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<HealthStore> {
        &self.store
    }

    /// Start scheduled checks for a freshly registered agent.
    ///
    /// Any timer left over from a previous registration is cancelled first.
    pub async fn start(
        self: &Arc<Self>,
        agent_id: &str,
        transport_id: TransportId,
        monitoring: &MonitoringConfig,
    ) {
        self.stop(agent_id).await;
        self.failures.lock().await.remove(agent_id);
        self.connectivity
            .lock()
            .await
            .insert(agent_id.to_string(), true);
        self.store.reset_status(agent_id).await;

        if !monitoring.enabled {
            debug!(agent_id = %agent_id, "Health monitoring disabled for agent");
            return;
        }

        let period = Duration::from_secs(
            monitoring
                .interval_secs
                .unwrap_or(self.config.default_interval_secs)
                .max(1),
        );
        let probe_timeout = Duration::from_secs(
            monitoring
                .probe_timeout_secs
                .unwrap_or(self.config.probe_timeout_secs),
        );

        let monitor = Arc::clone(self);
        let id = agent_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the agent just connected.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match monitor.check_agent(&id, probe_timeout).await {
                    Ok(outcome) if outcome.escalated => break,
                    Ok(_) => {}
                    Err(e) => warn!(agent_id = %id, error = %e, "Health check failed"),
                }
            }
            monitor.release_timer(&id, transport_id).await;
        });

        self.timers.lock().await.insert(
            agent_id.to_string(),
            Timer {
                transport_id,
                handle,
            },
        );
        info!(agent_id = %agent_id, interval_secs = period.as_secs(), "Health monitoring started");
    }

    /// Cancel the agent's timer. Returns false if none was running.
    pub async fn stop(&self, agent_id: &str) -> bool {
        let timer = self.timers.lock().await.remove(agent_id);
        match timer {
            Some(timer) => {
                timer.handle.abort();
                debug!(agent_id = %agent_id, "Health monitoring stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel the timer bound to a disconnecting transport, if it is still the
    /// agent's current one.
    pub async fn stop_for_transport(&self, agent_id: &str, transport_id: TransportId) -> bool {
        let mut timers = self.timers.lock().await;
        if timers
            .get(agent_id)
            .is_some_and(|t| t.transport_id == transport_id)
        {
            if let Some(timer) = timers.remove(agent_id) {
                timer.handle.abort();
                return true;
            }
        }
        false
    }

    /// Called by an escalated loop on its way out; never aborts the caller.
    async fn release_timer(&self, agent_id: &str, transport_id: TransportId) {
        let mut timers = self.timers.lock().await;
        if timers
            .get(agent_id)
            .is_some_and(|t| t.transport_id == transport_id)
        {
            timers.remove(agent_id);
        }
    }

    pub async fn is_monitoring(&self, agent_id: &str) -> bool {
        self.timers.lock().await.contains_key(agent_id)
    }

    pub async fn active_timers(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Abort every timer (shutdown).
    pub async fn stop_all(&self) {
        let mut timers = self.timers.lock().await;
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        self.failures.lock().await.clear();
        self.connectivity.lock().await.clear();
        self.evaluator.clear().await;
    }

    /// Run one check using the configured probe timeout.
    pub async fn check_now(&self, agent_id: &str) -> HubResult<CheckOutcome> {
        self.check_agent(agent_id, Duration::from_secs(self.config.probe_timeout_secs))
            .await
    }

    /// Probe, evaluate, record and publish one health check for `agent_id`.
    pub async fn check_agent(
        &self,
        agent_id: &str,
        probe_timeout: Duration,
    ) -> HubResult<CheckOutcome> {
        match self.probe(agent_id, probe_timeout).await {
            Ok((latency_ms, reported)) => {
                self.failures.lock().await.remove(agent_id);
                self.registry.record_latency(agent_id, latency_ms).await;
                if let Some(metrics) = &reported {
                    self.registry.record_metrics(agent_id, metrics.clone()).await;
                }

                let mut metrics = match reported {
                    Some(m) => m,
                    None => self
                        .registry
                        .lookup(agent_id)
                        .await
                        .and_then(|a| a.metrics)
                        .unwrap_or_default(),
                };
                metrics.latency.get_or_insert(latency_ms as f64);

                let rules = self.directory.list_enabled_alert_rules(agent_id).await?;
                let alerts = self.evaluator.evaluate(agent_id, &rules, &metrics).await;
                let record = HealthRecord {
                    agent_id: agent_id.to_string(),
                    timestamp: Utc::now(),
                    status: HealthStatus::from_alerts(&alerts),
                    connected: true,
                    latency_ms: Some(latency_ms),
                    metrics,
                    alerts,
                };

                self.publish(&record).await;
                let change = StatusChange {
                    reason: Some("Health check succeeded".into()),
                    latency_ms: Some(latency_ms),
                };
                self.update_connectivity(agent_id, true, change).await?;

                Ok(CheckOutcome {
                    record,
                    escalated: false,
                    error: None,
                })
            }
            Err(e) => {
                let failures = {
                    let mut map = self.failures.lock().await;
                    let count = map.entry(agent_id.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                let escalated = failures >= self.config.failure_threshold;
                warn!(
                    agent_id = %agent_id,
                    failures,
                    threshold = self.config.failure_threshold,
                    error = %e,
                    "Connectivity probe failed"
                );

                let record = HealthRecord {
                    agent_id: agent_id.to_string(),
                    timestamp: Utc::now(),
                    status: if escalated {
                        HealthStatus::Offline
                    } else {
                        HealthStatus::Warning
                    },
                    connected: false,
                    latency_ms: None,
                    metrics: HealthMetrics::default(),
                    alerts: Vec::new(),
                };
                self.publish(&record).await;

                if escalated {
                    self.update_connectivity(
                        agent_id,
                        false,
                        StatusChange::reason(format!(
                            "{failures} consecutive failed health checks"
                        )),
                    )
                    .await?;
                }

                Ok(CheckOutcome {
                    record,
                    escalated,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Send `agent:ping` and wait for the matching pong.
    async fn probe(
        &self,
        agent_id: &str,
        probe_timeout: Duration,
    ) -> HubResult<(u64, Option<HealthMetrics>)> {
        let request_id = Uuid::new_v4().to_string();
        let waiter = self.probes.register(&request_id).await;
        let sent_at = Instant::now();

        if let Err(e) = self
            .sessions
            .publish_to_agent(agent_id, "agent:ping", json!({ "requestId": request_id }))
            .await
        {
            self.probes.cancel(&request_id).await;
            return Err(e);
        }

        match tokio::time::timeout(probe_timeout, waiter).await {
            Ok(Ok(reply)) => {
                let latency = reply.received_at.saturating_duration_since(sent_at);
                Ok((latency.as_millis() as u64, reply.metrics))
            }
            Ok(Err(_)) => Err(HubError::NotConnected(agent_id.to_string())),
            Err(_) => {
                self.probes.cancel(&request_id).await;
                Err(HubError::RequestTimeout(format!(
                    "probe to {agent_id} after {}s",
                    probe_timeout.as_secs()
                )))
            }
        }
    }

    async fn publish(&self, record: &HealthRecord) {
        self.store.append(record.clone()).await;

        let payload = serde_json::to_value(record).unwrap_or_default();
        self.sessions
            .publish_strict(MONITORING_HEALTH, "agent:health", payload.clone())
            .await;
        self.sessions
            .publish_strict(
                &monitoring_group("health", Some(&record.agent_id)),
                "agent:health",
                payload,
            )
            .await;

        if record.alerts.is_empty() {
            return;
        }
        for alert in &record.alerts {
            warn!(
                agent_id = %alert.agent_id,
                rule_id = %alert.rule_id,
                severity = ?alert.severity,
                "{}",
                alert.message
            );
        }
        self.sessions
            .broadcast(
                "agent:alerts",
                json!({ "agentId": record.agent_id, "alerts": record.alerts }),
            )
            .await;
    }

    /// Report a connectivity change to the directory and web clients.
    async fn update_connectivity(
        &self,
        agent_id: &str,
        connected: bool,
        change: StatusChange,
    ) -> HubResult<()> {
        let previous = self
            .connectivity
            .lock()
            .await
            .insert(agent_id.to_string(), connected);
        if previous == Some(connected) {
            return Ok(());
        }

        let status = if connected {
            AgentStatus::Connected
        } else {
            AgentStatus::Offline
        };
        info!(agent_id = %agent_id, %status, "Agent connectivity changed");
        self.directory
            .update_agent_status(agent_id, status, change.clone())
            .await?;
        self.sessions
            .broadcast(
                "agent:status_changed",
                json!({
                    "agentId": agent_id,
                    "status": status,
                    "reason": change.reason,
                    "latencyMs": change.latency_ms,
                }),
            )
            .await;
        Ok(())
    }

    /// Forget per-agent counters when an agent leaves.
    pub async fn forget(&self, agent_id: &str) {
        self.failures.lock().await.remove(agent_id);
        self.connectivity.lock().await.remove(agent_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agenthub_core::{AlertCondition, Severity};

    fn rule(id: &str, metric: &str, threshold: f64, cooldown: u64) -> AlertRule {
        AlertRule {
            id: id.into(),
            agent_id: None,
            metric: metric.into(),
            condition: AlertCondition::GreaterThan,
            threshold,
            severity: Severity::Warning,
            cooldown_minutes: cooldown,
            enabled: true,
        }
    }

    fn record_at(agent_id: &str, timestamp: DateTime<Utc>) -> HealthRecord {
        HealthRecord {
            agent_id: agent_id.into(),
            timestamp,
            status: HealthStatus::Healthy,
            connected: true,
            latency_ms: Some(5),
            metrics: HealthMetrics::default(),
            alerts: vec![],
        }
    }

    #[tokio::test]
    async fn test_alert_cooldown() {
        let evaluator = AlertEvaluator::new();
        let rules = vec![rule("cpu-high", "cpu", 90.0, 5)];
        let hot = HealthMetrics {
            cpu: Some(95.0),
            ..Default::default()
        };
        let t0 = Utc::now();

        assert_eq!(evaluator.evaluate_at("a1", &rules, &hot, t0).await.len(), 1);
        assert!(evaluator
            .evaluate_at("a1", &rules, &hot, t0 + chrono::Duration::minutes(3))
            .await
            .is_empty());
        // Cooldown is per agent.
        assert_eq!(evaluator.evaluate_at("a2", &rules, &hot, t0).await.len(), 1);
        assert_eq!(
            evaluator
                .evaluate_at("a1", &rules, &hot, t0 + chrono::Duration::minutes(6))
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rules_skip_missing_metric_and_disabled() {
        let evaluator = AlertEvaluator::new();
        let mut disabled = rule("r2", "cpu", 10.0, 0);
        disabled.enabled = false;
        let mut scoped = rule("r3", "cpu", 10.0, 0);
        scoped.agent_id = Some("other".into());
        let rules = vec![rule("r1", "disk", 10.0, 0), disabled, scoped];
        let metrics = HealthMetrics {
            cpu: Some(50.0),
            ..Default::default()
        };
        assert!(evaluator.evaluate("a1", &rules, &metrics).await.is_empty());
    }

    #[tokio::test]
    async fn test_fired_alert_message() {
        let evaluator = AlertEvaluator::new();
        let metrics = HealthMetrics {
            memory: Some(97.5),
            ..Default::default()
        };
        let fired = evaluator
            .evaluate("a1", &[rule("mem", "memory", 90.0, 0)], &metrics)
            .await;
        assert_eq!(fired[0].message, "memory is 97.50 (> 90)");
        assert_eq!(fired[0].value, 97.5);
    }

    #[tokio::test]
    async fn test_store_purges_by_age() {
        let store = HealthStore::new(chrono::Duration::hours(24));
        let now = Utc::now();
        store
            .append(record_at("a1", now - chrono::Duration::hours(30)))
            .await;
        store
            .append(record_at("a2", now - chrono::Duration::hours(25)))
            .await;
        store.append(record_at("a1", now)).await;
        // Appending for a1 trimmed a1's stale record only.
        assert_eq!(store.history("a1").await.len(), 1);
        assert_eq!(store.record_count().await, 2);

        assert_eq!(store.purge_at(now).await, 1);
        assert!(store.history("a2").await.is_empty());
        assert_eq!(store.latest_status("a1").await, Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_reset_status() {
        let store = HealthStore::new(chrono::Duration::hours(1));
        store.append(record_at("a1", Utc::now())).await;
        store.reset_status("a1").await;
        assert!(store.latest_status("a1").await.is_none());
        assert_eq!(store.history("a1").await.len(), 1);
    }

    #[test]
    fn test_monitoring_group_names() {
        assert_eq!(monitoring_group("health", None), "monitoring:health");
        assert_eq!(monitoring_group("health", Some("a1")), "monitoring:health:a1");
    }
}
