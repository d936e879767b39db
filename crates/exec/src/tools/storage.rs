//! `pulse_storage`: pools, backups, snapshots, Ceph, replication, PBS jobs,
//! RAID and disk health.
//!
//! | Type             | Source                                  |
//! |------------------|-----------------------------------------|
//! | `pools`          | unified resources, else state           |
//! | `backups`        | backup provider                         |
//! | `snapshots`      | state                                   |
//! | `ceph`           | unified resources, else state           |
//! | `replication`    | state                                   |
//! | `pbs_jobs`       | backup provider                         |
//! | `raid`           | disk health, else agent-reported hosts  |
//! | `disk_health`    | disk health, else agent-reported hosts  |
//! | `resource_disks` | state (guest filesystems)               |

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{bad_args, json_result};
use crate::executor::ToolContext;
use crate::model::{Guest, HostInfo, UnifiedType};
use crate::state::Snapshot;

const TOOL: &str = "pulse_storage";
const TYPES: &[&str] = &[
    "pools",
    "backups",
    "snapshots",
    "ceph",
    "replication",
    "pbs_jobs",
    "raid",
    "disk_health",
    "resource_disks",
];
const JOB_TYPES: &[&str] = &["backup", "sync", "verify", "prune", "garbage"];
const DEFAULT_LIMIT: usize = 100;
const GIB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Default, Deserialize)]
struct StorageParams {
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    storage_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    guest_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    vm_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    instance: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    node: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    cluster: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    job_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    state: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_type: Option<String>,
    #[serde(default)]
    min_usage: Option<f64>,
    #[serde(default, deserialize_with = "lenient::int")]
    limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    offset: Option<i64>,
}

impl StorageParams {
    fn page(&self) -> (usize, usize) {
        let limit = self.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(DEFAULT_LIMIT);
        let offset = self.offset.filter(|o| *o > 0).map(|o| o as usize).unwrap_or(0);
        (limit, offset)
    }

    fn host_matches(&self, host: &HostInfo) -> bool {
        self.host
            .as_deref()
            .is_none_or(|want| host.hostname == want || host.id == want)
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}

pub struct StorageTool;

#[async_trait]
impl Tool<ToolContext> for StorageTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Query storage pools, backups, snapshots, Ceph, replication, PBS jobs, RAID and disk \
                          health. Use the \"type\" parameter to select what to query."
                .into(),
            params: vec![
                ToolParam::required("type", "Storage type to query").one_of(TYPES),
                ToolParam::optional("storage_id", "Filter by storage ID or name (pools)"),
                ToolParam::optional("resource_id", "Filter by VM/container ID (backups, resource_disks)"),
                ToolParam::optional("guest_id", "Filter by guest VMID (snapshots)"),
                ToolParam::optional("vm_id", "Filter by VMID (replication)"),
                ToolParam::optional("instance", "Filter by PBS instance (pbs_jobs)"),
                ToolParam::optional("node", "Filter by node name"),
                ToolParam::optional("host", "Filter by host (raid, disk_health)"),
                ToolParam::optional("cluster", "Filter by Ceph cluster name"),
                ToolParam::optional("job_type", "Filter PBS jobs by type").one_of(JOB_TYPES),
                ToolParam::optional("state", "Filter RAID arrays by state: clean, degraded, rebuilding"),
                ToolParam::optional("resource_type", "Filter by guest type: vm or lxc (resource_disks)"),
                ToolParam::optional("min_usage", "Only show guests with a filesystem above this usage percent")
                    .typed(ParamType::Number),
                ToolParam::optional("limit", "Maximum number of results (default: 100)").typed(ParamType::Integer),
                ToolParam::optional("offset", "Number of results to skip").typed(ParamType::Integer),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Read,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        let p = cx.providers();
        p.state.is_some() || p.unified.is_some() || p.backups.is_some() || p.disk_health.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: StorageParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let snapshot = cx.providers().snapshot();
        match params.kind.as_deref().unwrap_or_default() {
            "pools" => pools(cx, &snapshot, &params),
            "backups" => backups(cx, &params),
            "snapshots" => snapshots(&snapshot, &params),
            "ceph" => ceph(cx, &snapshot, &params),
            "replication" => replication(&snapshot, &params),
            "pbs_jobs" => pbs_jobs(cx, &params),
            "raid" => raid(&agent_hosts(cx, &snapshot), &params),
            "disk_health" => disk_health(&agent_hosts(cx, &snapshot), &params),
            "resource_disks" => resource_disks(&snapshot, &params),
            other => CallToolResult::error(format!("unknown type: {other}. Use: {}", TYPES.join(", "))),
        }
    }
}

fn agent_hosts(cx: &ToolContext, snapshot: &Snapshot) -> Vec<HostInfo> {
    match cx.providers().disk_health.as_ref() {
        Some(p) => p.hosts(),
        None => snapshot.hosts.clone(),
    }
}

// ── Pools and Ceph ───────────────────────────────────────────────────────────

fn pools(cx: &ToolContext, snapshot: &Snapshot, params: &StorageParams) -> CallToolResult {
    let (limit, offset) = params.page();
    let wanted = |id: &str, name: &str| params.storage_id.as_deref().is_none_or(|s| s == id || s == name);

    let all: Vec<Value> = match cx.providers().unified.as_ref() {
        Some(unified) => unified
            .resources_by_type(UnifiedType::Storage)
            .into_iter()
            .filter(|r| wanted(&r.id, &r.name))
            .filter(|r| params.node.as_deref().is_none_or(|n| r.parent.as_deref() == Some(n)))
            .map(|r| {
                json!({
                    "id": r.id,
                    "name": r.name,
                    "node": r.parent,
                    "status": r.status,
                    "usage_percent": r.metrics.get("usage_percent").copied().unwrap_or_default(),
                })
            })
            .collect(),
        None => snapshot
            .storage
            .iter()
            .filter(|s| wanted(&s.id, &s.name))
            .filter(|s| params.node.as_deref().is_none_or(|n| s.node == n))
            .map(|s| {
                json!({
                    "id": s.id,
                    "name": s.name,
                    "node": s.node,
                    "type": s.kind,
                    "status": s.status,
                    "shared": s.shared,
                    "usage_percent": percent(s.used, s.total),
                    "used_gb": gib(s.used),
                    "total_gb": gib(s.total),
                })
            })
            .collect(),
    };
    let total = all.len();
    let page: Vec<Value> = all.into_iter().skip(offset).take(limit).collect();
    json_result(json!({"pools": page, "total": total, "limit": limit, "offset": offset}))
}

fn ceph(cx: &ToolContext, snapshot: &Snapshot, params: &StorageParams) -> CallToolResult {
    let wanted = |name: &str| params.cluster.as_deref().is_none_or(|c| c == name);
    let clusters: Vec<Value> = match cx.providers().unified.as_ref() {
        Some(unified) => unified
            .resources_by_type(UnifiedType::Ceph)
            .into_iter()
            .filter(|r| wanted(&r.name))
            .map(|r| json!({"name": r.name, "health": r.status, "details": r.metrics}))
            .collect(),
        None => snapshot
            .ceph_clusters
            .iter()
            .filter(|c| wanted(&c.name))
            .map(|c| {
                json!({
                    "name": c.name,
                    "health": c.health,
                    "details": {
                        "osd_count": c.osds_total,
                        "osds_up": c.osds_up,
                        "osds_down": c.osds_total.saturating_sub(c.osds_up),
                        "used_bytes": c.used,
                        "total_bytes": c.total,
                        "available_bytes": c.total.saturating_sub(c.used),
                        "usage_percent": percent(c.used, c.total),
                    },
                })
            })
            .collect(),
    };
    if clusters.is_empty() {
        return match params.cluster.as_deref() {
            Some(name) => CallToolResult::text(format!("Ceph cluster '{name}' not found.")),
            None => CallToolResult::text("No Ceph clusters found. Ceph may not be configured or data is not yet available."),
        };
    }
    json_result(json!({"clusters": clusters, "total": clusters.len()}))
}

// ── Backups and snapshots ────────────────────────────────────────────────────

fn backups(cx: &ToolContext, params: &StorageParams) -> CallToolResult {
    let Some(provider) = cx.providers().backups.as_ref() else {
        return CallToolResult::text("Backup information not available.");
    };
    let (limit, offset) = params.page();
    let vmid = params.resource_id.as_deref();

    let mut all = provider.backups();
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let matching: Vec<_> = all
        .iter()
        .filter(|b| vmid.is_none_or(|v| b.vmid.to_string() == v))
        .filter(|b| params.node.as_deref().is_none_or(|n| b.node == n))
        .collect();
    let total = matching.len();
    let page: Vec<Value> = matching
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|b| {
            json!({
                "id": b.id,
                "vmid": b.vmid,
                "node": b.node,
                "storage": b.storage,
                "size_gb": gib(b.size),
                "backup_time": b.created_at,
                "verified": b.verified,
            })
        })
        .collect();

    let servers: Vec<Value> = provider
        .pbs_instances()
        .iter()
        .map(|p| json!({"name": p.name, "status": p.status, "datastores": p.datastores}))
        .collect();
    json_result(json!({"backups": page, "total": total, "pbs_servers": servers}))
}

fn snapshots(snapshot: &Snapshot, params: &StorageParams) -> CallToolResult {
    let (limit, offset) = params.page();
    let filtered: Vec<_> = snapshot
        .guest_snapshots
        .iter()
        .filter(|s| params.guest_id.as_deref().is_none_or(|g| s.vmid.to_string() == g))
        .filter(|s| params.node.as_deref().is_none_or(|n| s.node == n))
        .collect();
    let page: Vec<Value> = filtered
        .iter()
        .skip(offset)
        .take(limit)
        .map(|s| {
            json!({
                "vmid": s.vmid,
                "vm_name": s.guest,
                "node": s.node,
                "snapshot_name": s.name,
                "time": s.taken_at,
            })
        })
        .collect();
    json_result(json!({
        "snapshots": page,
        "total": snapshot.guest_snapshots.len(),
        "filtered": filtered.len(),
    }))
}

fn replication(snapshot: &Snapshot, params: &StorageParams) -> CallToolResult {
    if snapshot.replication_jobs.is_empty() {
        return CallToolResult::text("No replication jobs found. Replication may not be configured.");
    }
    let jobs: Vec<Value> = snapshot
        .replication_jobs
        .iter()
        .filter(|j| params.vm_id.as_deref().is_none_or(|v| j.vmid.to_string() == v))
        .map(|j| {
            let guest_name = snapshot.find_guest(&j.vmid.to_string()).map(|(g, _)| g.name.clone());
            json!({
                "id": j.id,
                "guest_id": j.vmid,
                "guest_name": guest_name,
                "source_node": j.source,
                "target_node": j.target,
                "status": j.status,
                "last_sync": j.last_sync,
                "error": j.error,
            })
        })
        .collect();
    if jobs.is_empty() {
        if let Some(vm) = params.vm_id.as_deref() {
            return CallToolResult::text(format!("No replication jobs found for VM {vm}."));
        }
    }
    json_result(json!({"jobs": jobs, "total": jobs.len()}))
}

fn pbs_jobs(cx: &ToolContext, params: &StorageParams) -> CallToolResult {
    let Some(provider) = cx.providers().backups.as_ref() else {
        return CallToolResult::text("Backup provider not available.");
    };
    let instances = provider.pbs_instances();
    if instances.is_empty() {
        return CallToolResult::text("No PBS instances found. PBS monitoring may not be configured.");
    }
    let job_type = params.job_type.as_deref().map(|t| match t {
        "garbage" => "garbage_collection",
        other => other,
    });
    let jobs: Vec<Value> = instances
        .iter()
        .filter(|p| params.instance.as_deref().is_none_or(|i| p.id == i || p.name == i))
        .flat_map(|p| p.jobs.iter().map(move |j| (p, j)))
        .filter(|(_, j)| job_type.is_none_or(|t| j.kind == t))
        .map(|(p, j)| {
            json!({
                "instance": p.name,
                "id": j.id,
                "type": j.kind,
                "store": j.store,
                "status": j.status,
                "last_run": j.last_run,
            })
        })
        .collect();
    json_result(json!({"instance": params.instance, "jobs": jobs, "total": jobs.len()}))
}

// ── Host disks ───────────────────────────────────────────────────────────────

fn raid(hosts: &[HostInfo], params: &StorageParams) -> CallToolResult {
    let summaries: Vec<Value> = hosts
        .iter()
        .filter(|h| params.host_matches(h))
        .filter_map(|h| {
            let arrays: Vec<_> = h
                .raid
                .iter()
                .filter(|r| params.state.as_deref().is_none_or(|s| r.state.eq_ignore_ascii_case(s)))
                .collect();
            (!arrays.is_empty()).then(|| json!({"hostname": h.hostname, "host_id": h.id, "arrays": arrays}))
        })
        .collect();
    if summaries.is_empty() {
        return match params.host.as_deref() {
            Some(host) => CallToolResult::text(format!("No RAID arrays found for host '{host}'.")),
            None => CallToolResult::text(
                "No RAID arrays found across any hosts. RAID monitoring requires host agents to be configured.",
            ),
        };
    }
    json_result(json!({"hosts": summaries, "total": summaries.len()}))
}

fn disk_health(hosts: &[HostInfo], params: &StorageParams) -> CallToolResult {
    if hosts.is_empty() {
        return CallToolResult::text("Disk health information not available.");
    }
    let summaries: Vec<Value> = hosts
        .iter()
        .filter(|h| params.host_matches(h))
        .filter(|h| !h.disks.is_empty() || !h.raid.is_empty())
        .map(|h| json!({"hostname": h.hostname, "smart": h.disks, "raid": h.raid}))
        .collect();
    json_result(json!({"hosts": summaries}))
}

fn guest_disks(guest: &Guest, kind: &str) -> Option<Value> {
    if guest.disks.is_empty() {
        return None;
    }
    let disks: Vec<Value> = guest
        .disks
        .iter()
        .map(|d| {
            json!({
                "mountpoint": d.mountpoint,
                "total_bytes": d.total,
                "used_bytes": d.used,
                "free_bytes": d.total.saturating_sub(d.used),
                "usage": percent(d.used, d.total),
            })
        })
        .collect();
    Some(json!({
        "id": guest.id,
        "vmid": guest.vmid,
        "name": guest.name,
        "type": kind,
        "node": guest.node,
        "disks": disks,
    }))
}

fn max_usage(guest: &Guest) -> f64 {
    guest
        .disks
        .iter()
        .map(|d| percent(d.used, d.total))
        .fold(0.0, f64::max)
}

fn resource_disks(snapshot: &Snapshot, params: &StorageParams) -> CallToolResult {
    let kind = params.resource_type.as_deref().map(str::to_lowercase);
    let min_usage = params.min_usage.unwrap_or_default();
    let wanted = |g: &Guest| {
        params
            .resource_id
            .as_deref()
            .is_none_or(|r| g.id == r || g.vmid.to_string() == r)
            && params.node.as_deref().is_none_or(|n| g.node == n)
            && (min_usage <= 0.0 || max_usage(g) >= min_usage)
    };

    let mut resources = Vec::new();
    if kind.as_deref().is_none_or(|k| k == "vm") {
        resources.extend(snapshot.vms.iter().filter(|g| wanted(g)).filter_map(|g| guest_disks(g, "vm")));
    }
    if kind.as_deref().is_none_or(|k| k == "lxc") {
        resources.extend(snapshot.containers.iter().filter(|g| wanted(g)).filter_map(|g| guest_disks(g, "lxc")));
    }
    if resources.is_empty() {
        return match params.resource_id.as_deref() {
            Some(id) => CallToolResult::text(format!(
                "No disk data found for resource '{id}'. Guest agent may not be installed or disk info unavailable."
            )),
            None => CallToolResult::text(
                "No disk data available for any VMs or containers. Disk details require guest agents to be installed and running.",
            ),
        };
    }
    json_result(json!({"total": resources.len(), "resources": resources}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GuestDisk, RaidArray};

    fn guest(vmid: u32, used: u64, total: u64) -> Guest {
        Guest {
            id: format!("qemu/{vmid}"),
            vmid,
            name: format!("guest{vmid}"),
            node: "pve1".into(),
            status: "running".into(),
            disks: vec![GuestDisk {
                mountpoint: "/".into(),
                used,
                total,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn usage_guards_zero_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn resource_disks_filters_by_usage() {
        let snapshot = Snapshot {
            vms: vec![guest(100, 90, 100), guest(101, 10, 100)],
            ..Default::default()
        };
        let params = StorageParams {
            min_usage: Some(80.0),
            ..Default::default()
        };
        let out = resource_disks(&snapshot, &params).json_content().unwrap();
        assert_eq!(out["total"], 1);
        assert_eq!(out["resources"][0]["vmid"], 100);
        assert_eq!(out["resources"][0]["disks"][0]["free_bytes"], 10);
    }

    #[test]
    fn resource_disks_reports_missing_guest() {
        let params = StorageParams {
            resource_id: Some("999".into()),
            ..Default::default()
        };
        let out = resource_disks(&Snapshot::default(), &params);
        assert!(out.text_content().starts_with("No disk data found for resource '999'"));
    }

    #[test]
    fn raid_state_filter_is_case_insensitive() {
        let hosts = vec![HostInfo {
            id: "h1".into(),
            hostname: "nas".into(),
            raid: vec![
                RaidArray {
                    device: "/dev/md0".into(),
                    level: "raid1".into(),
                    state: "clean".into(),
                    devices: vec!["sda1".into(), "sdb1".into()],
                },
                RaidArray {
                    device: "/dev/md1".into(),
                    level: "raid5".into(),
                    state: "degraded".into(),
                    devices: vec![],
                },
            ],
            ..Default::default()
        }];
        let params = StorageParams {
            state: Some("DEGRADED".into()),
            ..Default::default()
        };
        let out = raid(&hosts, &params).json_content().unwrap();
        assert_eq!(out["hosts"][0]["arrays"].as_array().unwrap().len(), 1);
        assert_eq!(out["hosts"][0]["arrays"][0]["device"], "/dev/md1");

        let missing = StorageParams {
            host: Some("other".into()),
            ..Default::default()
        };
        assert_eq!(raid(&hosts, &missing).text_content(), "No RAID arrays found for host 'other'.");
    }

    #[test]
    fn replication_reports_empty_filter() {
        let snapshot = Snapshot {
            replication_jobs: vec![crate::model::ReplicationJob {
                id: "100-0".into(),
                vmid: 100,
                source: "pve1".into(),
                target: "pve2".into(),
                status: "ok".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let params = StorageParams {
            vm_id: Some("200".into()),
            ..Default::default()
        };
        assert_eq!(replication(&snapshot, &params).text_content(), "No replication jobs found for VM 200.");
    }
}
