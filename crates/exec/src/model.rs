//! Fleet records as the providers report them.  Plain data; the only logic
//! lives in `state` (resolution) and the tool handlers (flattening).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Proxmox ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub status: String,
    /// 0.0 – 1.0
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem_used: u64,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub uptime_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_temperature: Option<f64>,
}

/// A VM or an LXC container; which one depends on the list it sits in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Guest {
    pub id: String,
    pub vmid: u32,
    pub name: String,
    pub node: String,
    pub status: String,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem_used: u64,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<GuestDisk>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestDisk {
    pub mountpoint: String,
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: String,
    pub name: String,
    pub node: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub used: u64,
    pub total: u64,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CephCluster {
    pub id: String,
    pub name: String,
    pub health: String,
    pub osds_up: u32,
    pub osds_total: u32,
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationJob {
    pub id: String,
    pub vmid: u32,
    pub source: String,
    pub target: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestSnapshot {
    pub vmid: u32,
    pub guest: String,
    pub node: String,
    pub name: String,
    pub taken_at: DateTime<Utc>,
}

// ── Hosts (agent-reported) ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: String,
    pub hostname: String,
    pub status: String,
    /// Proxmox node id this host agent runs on, when it is a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<NetInterface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disk_io: Vec<DiskIo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<PhysicalDisk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raid: Vec<RaidArray>,
    /// Sensor name to degrees Celsius.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub temperatures: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetInterface {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIo {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalDisk {
    pub device: String,
    pub model: String,
    /// `PASSED`, `FAILED` or empty when unknown.
    pub health: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Percent of rated endurance remaining, SSDs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wearout: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaidArray {
    pub device: String,
    pub level: String,
    pub state: String,
    pub devices: Vec<String>,
}

// ── Docker ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerHost {
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub containers: Vec<DockerContainer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swarm: Option<SwarmInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<DockerService>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<DockerTask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    /// `running`, `exited`, …
    pub state: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwarmInfo {
    pub node_id: String,
    pub role: String,
    pub cluster_id: String,
    pub managers: u32,
    pub workers: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerService {
    pub id: String,
    pub name: String,
    pub image: String,
    pub mode: String,
    pub desired: u32,
    pub running: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerTask {
    pub id: String,
    pub service: String,
    pub node: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerUpdate {
    pub host_id: String,
    pub container_id: String,
    pub container_name: String,
    pub image: String,
    pub current_digest: String,
    pub latest_digest: String,
}

/// A command queued on a Docker agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub id: String,
    pub kind: String,
    pub status: String,
}

// ── Kubernetes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesCluster {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Agent that can run `kubectl` against the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<KubernetesNode>,
    #[serde(default)]
    pub pods: Vec<KubernetesPod>,
    #[serde(default)]
    pub deployments: Vec<KubernetesDeployment>,
}

impl KubernetesCluster {
    pub fn label(&self) -> &str {
        if !self.display_name.is_empty() {
            &self.display_name
        } else if !self.name.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesNode {
    pub name: String,
    pub ready: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub kubelet_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesPod {
    pub name: String,
    pub namespace: String,
    pub node: String,
    pub phase: String,
    #[serde(default)]
    pub restarts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesDeployment {
    pub name: String,
    pub namespace: String,
    pub desired: u32,
    pub ready: u32,
}

// ── Mail gateway ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PmgInstance {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub mail: MailStats,
    #[serde(default)]
    pub queues: Vec<MailQueue>,
    #[serde(default)]
    pub quarantine: Quarantine,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailStats {
    pub inbound: u64,
    pub outbound: u64,
    pub spam_in: u64,
    pub spam_out: u64,
    pub virus_in: u64,
    pub virus_out: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailQueue {
    pub node: String,
    pub active: u64,
    pub deferred: u64,
    pub hold: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quarantine {
    pub spam: u64,
    pub virus: u64,
}

// ── Alerts and findings ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub resource_id: String,
    pub resource_name: String,
    /// `cpu`, `memory`, `disk`, …
    pub kind: String,
    /// `warning` or `critical`.
    pub level: String,
    pub message: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub resource_id: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

// ── Backups ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub vmid: u32,
    pub node: String,
    pub storage: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PbsInstance {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub datastores: Vec<String>,
    #[serde(default)]
    pub jobs: Vec<PbsJob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PbsJob {
    pub id: String,
    /// `backup`, `sync`, `verify`, `prune` or `garbage_collection`.
    pub kind: String,
    pub store: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

// ── Metrics ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    #[serde(default)]
    pub disk: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_memory: f64,
    pub max_memory: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBaseline {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub resource_id: String,
    pub description: String,
    pub confidence: f64,
}

// ── Discovery and knowledge ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub host_id: String,
    pub hostname: String,
    pub service_type: String,
    pub service_name: String,
    #[serde(default)]
    pub service_version: String,
    #[serde(default)]
    pub cli_access: String,
    #[serde(default)]
    pub facts: Vec<DiscoveryFact>,
    #[serde(default)]
    pub config_paths: Vec<String>,
    #[serde(default)]
    pub log_paths: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryFact {
    pub category: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub resource_id: String,
    pub category: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

// ── Unified resources ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedType {
    Storage,
    Ceph,
    PhysicalDisk,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResource {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub assigned_agents: Vec<String>,
}
