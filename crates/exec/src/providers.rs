//! Capability traits the executor consumes.  Implementations live with the
//! monitoring backend; tests use in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    AgentProfile, Backup, CommandStatus, ContainerUpdate, DiscoveryInfo, Finding, HostInfo,
    KnowledgeEntry, MetricBaseline, MetricPoint, MetricsSummary, Pattern, PbsInstance,
    UnifiedResource, UnifiedType,
};
use crate::state::Snapshot;

// ── Fleet state ──────────────────────────────────────────────────────────────

pub trait StateProvider: Send + Sync {
    /// The current snapshot.  Callers keep the `Arc` for one invocation.
    fn snapshot(&self) -> Arc<Snapshot>;
}

// ── Command policy ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    RequireApproval,
    /// Never approvable.
    Block,
}

pub trait CommandPolicy: Send + Sync {
    fn evaluate(&self, command: &str) -> PolicyDecision;
}

// ── Agents ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAgent {
    pub agent_id: String,
    /// Advisory; may collide with guest names.
    pub hostname: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ConnectedAgent {
    /// Hostname, or the id when the agent reported none.
    pub fn label(&self) -> &str {
        let name = self.hostname.trim();
        if name.is_empty() { self.agent_id.trim() } else { name }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    /// `host`, `container` or `vm`.
    pub target_type: String,
    /// VMID for guests, empty for hosts.
    pub target_id: String,
}

impl CommandPayload {
    pub fn host(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            target_type: "host".to_string(),
            target_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// stdout, then stderr on its own line when present.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("command canceled")]
    Canceled,
    #[error("agent {0} is not connected")]
    AgentUnavailable(String),
    #[error("agent transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait AgentServer: Send + Sync {
    fn connected_agents(&self) -> Vec<ConnectedAgent>;

    async fn execute_command(
        &self,
        agent_id: &str,
        payload: CommandPayload,
    ) -> Result<CommandOutput, DispatchError>;
}

// ── Metrics ──────────────────────────────────────────────────────────────────

pub trait MetricsHistoryProvider: Send + Sync {
    fn resource_metrics(&self, resource_id: &str, hours: u32) -> Vec<MetricPoint>;
    fn metrics_summary(&self, resource_id: &str, hours: u32) -> Option<MetricsSummary>;
    /// Metric name to learned baseline.
    fn baselines(&self, resource_id: &str) -> Vec<(String, MetricBaseline)>;
    fn patterns(&self) -> Vec<Pattern>;
}

// ── Storage ──────────────────────────────────────────────────────────────────

pub trait BackupProvider: Send + Sync {
    fn backups(&self) -> Vec<Backup>;
    fn pbs_instances(&self) -> Vec<PbsInstance>;
}

pub trait DiskHealthProvider: Send + Sync {
    fn hosts(&self) -> Vec<HostInfo>;
}

pub trait UnifiedResourceProvider: Send + Sync {
    fn resources_by_type(&self, kind: UnifiedType) -> Vec<UnifiedResource>;
}

// ── Docker updates ───────────────────────────────────────────────────────────

#[async_trait]
pub trait UpdatesProvider: Send + Sync {
    fn pending_updates(&self, host_id: Option<&str>) -> Vec<ContainerUpdate>;
    async fn trigger_update_check(&self, host_id: &str) -> anyhow::Result<CommandStatus>;
    async fn update_container(&self, host_id: &str, container_id: &str, container_name: &str) -> anyhow::Result<CommandStatus>;
    fn update_actions_enabled(&self) -> bool;
}

// ── Metadata, findings, profiles ─────────────────────────────────────────────

pub trait MetadataUpdater: Send + Sync {
    fn set_resource_url(&self, resource_type: &str, resource_id: &str, url: &str) -> anyhow::Result<()>;
}

pub trait FindingsManager: Send + Sync {
    fn active_findings(&self) -> Vec<Finding>;
    fn resolve_finding(&self, finding_id: &str, note: &str) -> anyhow::Result<()>;
    fn dismiss_finding(&self, finding_id: &str, reason: &str, note: &str) -> anyhow::Result<()>;
}

pub trait AgentProfileManager: Send + Sync {
    fn list_profiles(&self) -> Vec<AgentProfile>;
}

// ── Discovery and knowledge ──────────────────────────────────────────────────

#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    fn get(&self, resource_type: &str, host_id: &str, resource_id: &str) -> Option<DiscoveryInfo>;
    fn list(&self, resource_type: Option<&str>, host_id: Option<&str>) -> Vec<DiscoveryInfo>;
    /// Run a fresh discovery for one resource.
    async fn trigger(&self, resource_type: &str, host_id: &str, resource_id: &str) -> anyhow::Result<DiscoveryInfo>;
}

pub trait KnowledgeStoreProvider: Send + Sync {
    fn save_note(&self, resource_id: &str, category: &str, note: &str) -> anyhow::Result<KnowledgeEntry>;
    fn knowledge(&self, resource_id: &str, category: Option<&str>) -> Vec<KnowledgeEntry>;
}

// ── Wiring ───────────────────────────────────────────────────────────────────

/// Optional collaborators.  A missing provider hides the tools that need it.
#[derive(Clone, Default)]
pub struct Providers {
    pub state: Option<Arc<dyn StateProvider>>,
    pub policy: Option<Arc<dyn CommandPolicy>>,
    pub agents: Option<Arc<dyn AgentServer>>,
    pub metrics: Option<Arc<dyn MetricsHistoryProvider>>,
    pub backups: Option<Arc<dyn BackupProvider>>,
    pub disk_health: Option<Arc<dyn DiskHealthProvider>>,
    pub updates: Option<Arc<dyn UpdatesProvider>>,
    pub metadata: Option<Arc<dyn MetadataUpdater>>,
    pub findings: Option<Arc<dyn FindingsManager>>,
    pub profiles: Option<Arc<dyn AgentProfileManager>>,
    pub discovery: Option<Arc<dyn DiscoveryProvider>>,
    pub knowledge: Option<Arc<dyn KnowledgeStoreProvider>>,
    pub unified: Option<Arc<dyn UnifiedResourceProvider>>,
}

impl Providers {
    /// Snapshot from the state provider, or an empty one.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    pub fn connected_agents(&self) -> Vec<ConnectedAgent> {
        self.agents
            .as_ref()
            .map(|a| a.connected_agents())
            .unwrap_or_default()
    }

    pub fn policy_decision(&self, command: &str) -> PolicyDecision {
        self.policy
            .as_ref()
            .map(|p| p.evaluate(command))
            .unwrap_or(PolicyDecision::Allow)
    }

    /// Names of the capabilities present, for `pulse_query capabilities`.
    pub fn present(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut add = |present: bool, name: &'static str| {
            if present {
                names.push(name);
            }
        };
        add(self.state.is_some(), "state");
        add(self.policy.is_some(), "policy");
        add(self.agents.is_some(), "agents");
        add(self.metrics.is_some(), "metrics_history");
        add(self.backups.is_some(), "backups");
        add(self.disk_health.is_some(), "disk_health");
        add(self.updates.is_some(), "updates");
        add(self.metadata.is_some(), "metadata");
        add(self.findings.is_some(), "findings");
        add(self.profiles.is_some(), "agent_profiles");
        add(self.discovery.is_some(), "discovery");
        add(self.knowledge.is_some(), "knowledge");
        add(self.unified.is_some(), "unified_resources");
        names
    }
}
