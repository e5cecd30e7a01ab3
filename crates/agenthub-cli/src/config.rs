//! `agenthub.toml` loading.
//!
//! Hub tunables live in top-level tables (`[dedup]`, `[health]`, ...), and
//! the in-memory directory is seeded from `[[agents]]`, `[[repositories]]`
//! and `[[alert_rules]]`. Every field has a default.

use agenthub_core::{
    AgentRecord, AgentStatus, AlertCondition, AlertRule, InMemoryDirectory, MonitoringConfig,
    RepositoryCredentials, RepositorySnapshot, Severity,
};
use agenthub_orchestrator::{
    AuthConfig, DedupConfig, DispatchConfig, HealthConfig, HubConfig, RequestConfig,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct AgenthubConfig {
    #[serde(default)]
    pub server: ServerConfig,
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
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
    #[serde(default)]
    pub repositories: Vec<RepositorySeed>,
    #[serde(default)]
    pub alert_rules: Vec<AlertRuleSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSeed {
    pub id: String,
    pub name: String,
    pub secret_key: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub monitoring: MonitoringSeed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringSeed {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
}

impl Default for MonitoringSeed {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: None,
            probe_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositorySeed {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub credentials: Option<RepositoryCredentials>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertRuleSeed {
    pub id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default)]
    pub cooldown_minutes: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl From<AgentSeed> for AgentRecord {
    fn from(seed: AgentSeed) -> Self {
        AgentRecord {
            id: seed.id,
            name: seed.name,
            secret_key: seed.secret_key,
            status: AgentStatus::Offline,
            tags: seed.tags,
            capabilities: seed.capabilities,
            monitoring: MonitoringConfig {
                enabled: seed.monitoring.enabled,
                interval_secs: seed.monitoring.interval_secs,
                probe_timeout_secs: seed.monitoring.probe_timeout_secs,
            },
            last_seen_at: None,
        }
    }
}

impl From<RepositorySeed> for RepositorySnapshot {
    fn from(seed: RepositorySeed) -> Self {
        RepositorySnapshot {
            id: seed.id,
            url: seed.url,
            branch: seed.branch,
            credentials: seed.credentials,
            config: serde_json::Value::Null,
        }
    }
}

impl From<AlertRuleSeed> for AlertRule {
    fn from(seed: AlertRuleSeed) -> Self {
        AlertRule {
            id: seed.id,
            agent_id: seed.agent_id,
            metric: seed.metric,
            condition: seed.condition,
            threshold: seed.threshold,
            severity: seed.severity,
            cooldown_minutes: seed.cooldown_minutes,
            enabled: seed.enabled,
        }
    }
}

impl AgenthubConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for agent in &self.agents {
            anyhow::ensure!(seen.insert(&agent.id), "duplicate agent id '{}'", agent.id);
            anyhow::ensure!(
                !agent.secret_key.is_empty(),
                "agent '{}' has an empty secret_key",
                agent.id
            );
        }
        let mut secrets = HashSet::new();
        for agent in &self.agents {
            anyhow::ensure!(
                secrets.insert(&agent.secret_key),
                "agent '{}' reuses another agent's secret_key",
                agent.id
            );
        }
        anyhow::ensure!(self.dispatch.max_load > 0, "dispatch.max_load must be at least 1");
        anyhow::ensure!(
            self.dispatch.command_buffer > 0,
            "dispatch.command_buffer must be at least 1"
        );
        anyhow::ensure!(
            self.health.failure_threshold > 0,
            "health.failure_threshold must be at least 1"
        );
        Ok(())
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            dedup: self.dedup.clone(),
            health: self.health.clone(),
            requests: self.requests.clone(),
            dispatch: self.dispatch.clone(),
            auth: self.auth.clone(),
        }
    }

    /// Build the in-memory directory from the seed tables.
    pub fn directory(&self) -> InMemoryDirectory {
        InMemoryDirectory::seeded(
            self.agents.iter().cloned().map(Into::into).collect(),
            self.repositories.iter().cloned().map(Into::into).collect(),
            self.alert_rules.iter().cloned().map(Into::into).collect(),
        )
    }

    /// Resolved settings as TOML, seeds summarized and secrets left out.
    pub fn summary(&self) -> anyhow::Result<String> {
        #[derive(Serialize)]
        struct Seeds {
            agents: Vec<String>,
            repositories: Vec<String>,
            alert_rules: usize,
        }
        #[derive(Serialize)]
        struct Summary<'a> {
            server: &'a ServerConfig,
            #[serde(flatten)]
            hub: HubConfig,
            seeds: Seeds,
        }

        let summary = Summary {
            server: &self.server,
            hub: self.hub_config(),
            seeds: Seeds {
                agents: self.agents.iter().map(|a| a.id.clone()).collect(),
                repositories: self.repositories.iter().map(|r| r.id.clone()).collect(),
                alert_rules: self.alert_rules.len(),
            },
        };
        Ok(toml::to_string_pretty(&summary)?)
    }
}
