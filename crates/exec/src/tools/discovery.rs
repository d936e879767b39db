//! `pulse_discovery`: what services run on a resource, where their config
//! and logs live, and how to reach a shell there.

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::query::{register_docker_container, register_guest};
use super::{bad_args, json_result};
use crate::context::ResourceRegistration;
use crate::executor::{ToolContext, dispatch_failure};
use crate::model::DiscoveryInfo;
use crate::providers::DispatchError;
use crate::state::{ResourceKind, Snapshot, trim_slash};

const TOOL: &str = "pulse_discovery";
const RESOURCE_TYPES: &[&str] = &["vm", "lxc", "docker", "host"];
const DEFAULT_LIMIT: usize = 50;

/// Log, config and data locations for well-known services, used when the
/// discovery itself found none.
const SERVICE_PATHS: &[(&str, &[&str], &[&str])] = &[
    ("jellyfin", &["/var/log/jellyfin/", "/config/log/"], &["/etc/jellyfin/", "/config/"]),
    (
        "plex",
        &["/var/lib/plexmediaserver/Library/Application Support/Plex Media Server/Logs/"],
        &["/var/lib/plexmediaserver/Library/Application Support/Plex Media Server/"],
    ),
    ("sonarr", &["/config/logs/"], &["/config/"]),
    ("radarr", &["/config/logs/"], &["/config/"]),
    ("prowlarr", &["/config/logs/"], &["/config/"]),
    (
        "postgresql",
        &["/var/log/postgresql/", "/var/lib/postgresql/data/log/"],
        &["/etc/postgresql/", "/var/lib/postgresql/data/"],
    ),
    ("mysql", &["/var/log/mysql/"], &["/etc/mysql/"]),
    ("mariadb", &["/var/log/mysql/"], &["/etc/mysql/"]),
    ("nginx", &["/var/log/nginx/"], &["/etc/nginx/"]),
    ("homeassistant", &["/config/home-assistant.log"], &["/config/"]),
    ("frigate", &["/config/logs/"], &["/config/"]),
    ("redis", &["/var/log/redis/"], &["/etc/redis/"]),
    ("grafana", &["/var/log/grafana/"], &["/etc/grafana/"]),
    ("prometheus", &["/var/log/prometheus/"], &["/etc/prometheus/"]),
];

pub(crate) fn common_service_paths(service_type: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
    let normalized = service_type.to_lowercase();
    SERVICE_PATHS
        .iter()
        .find(|(key, _, _)| normalized.contains(key))
        .map(|(_, logs, config)| (*logs, *config))
}

pub(crate) fn cli_access_pattern(resource_type: &str, host_id: &str, resource_id: &str) -> String {
    match resource_type {
        "lxc" => format!("LXC container on Proxmox node '{host_id}' (VMID {resource_id})"),
        "vm" => format!("VM on Proxmox node '{host_id}' (VMID {resource_id})"),
        "docker" => format!("Docker container '{resource_id}' on host '{host_id}'"),
        "host" => format!("Host '{host_id}'"),
        _ => String::new(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    host_id: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    service_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    limit: Option<i64>,
}

pub struct DiscoveryTool;

#[async_trait]
impl Tool<ToolContext> for DiscoveryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Discovered service information for a VM, LXC, Docker container or host: service \
                          type and version, config and log paths, CLI access and facts. Use before proposing \
                          remediation commands."
                .into(),
            params: vec![
                ToolParam::required("action", "get one discovery or list them").one_of(&["get", "list"]),
                ToolParam::optional("resource_type", "For get: the resource class").one_of(RESOURCE_TYPES),
                ToolParam::optional("resource_id", "For get: VMID, container name or hostname"),
                ToolParam::optional("host_id", "For get: node or host the resource runs on"),
                ToolParam::optional("type", "For list: filter by resource class").one_of(RESOURCE_TYPES),
                ToolParam::optional("host", "For list: filter by host or node"),
                ToolParam::optional("service_type", "For list: filter by service type or name"),
                ToolParam::optional("limit", "For list: maximum number of results")
                    .typed(ParamType::Integer)
                    .default_value("50"),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Read,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().discovery.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: DiscoveryParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        match params.action.as_deref().unwrap_or_default() {
            "get" => get(cx, &params).await,
            "list" => list(cx, &params),
            other => CallToolResult::error(format!("unknown action: {other}. Use: get, list")),
        }
    }
}

/// Guest names become VMIDs on the given node.
fn resolve_vmid(snapshot: &Snapshot, resource_type: &str, name: &str, host_id: &str) -> Option<String> {
    if name.parse::<u32>().is_ok() {
        return Some(name.to_string());
    }
    let list = if resource_type == "lxc" { &snapshot.containers } else { &snapshot.vms };
    list.iter()
        .find(|g| g.name.eq_ignore_ascii_case(name) && g.node == host_id)
        .map(|g| g.vmid.to_string())
}

/// Register the resource the model just asked about and mark it as
/// explicitly accessed.
fn note_access(cx: &ToolContext, snapshot: &Snapshot, resource_type: &str, resource_id: &str, host_id: &str) {
    let session = &cx.session;
    let id = match resource_type {
        "lxc" | "vm" => snapshot
            .find_guest(resource_id)
            .filter(|(g, is_ct)| *is_ct == (resource_type == "lxc") && g.node == host_id)
            .map(|(g, is_ct)| register_guest(session, g, is_ct)),
        "docker" => snapshot
            .find_docker_container(resource_id)
            .map(|(h, c)| register_docker_container(session, snapshot, h, c)),
        _ => Some(session.add_resolved_resource(
            ResourceRegistration::new(ResourceKind::Host, host_id, host_id).host(host_id),
        )),
    };
    if let Some(id) = id {
        session.mark_explicit_access(&id);
        debug!(tool = TOOL, resource_id = %id, "explicit access");
    }
}

async fn get(cx: &ToolContext, params: &DiscoveryParams) -> CallToolResult {
    let Some(provider) = cx.providers().discovery.clone() else {
        return CallToolResult::text("Discovery service not available.");
    };
    let Some(resource_type) = params.resource_type.as_deref() else {
        return CallToolResult::error("resource_type is required");
    };
    let Some(resource_id) = params.resource_id.as_deref() else {
        return CallToolResult::error("resource_id is required");
    };
    let Some(host_id) = params.host_id.as_deref() else {
        return CallToolResult::error("host_id is required - use the 'node' field from search or get results");
    };
    if !RESOURCE_TYPES.contains(&resource_type) {
        return CallToolResult::error(format!("invalid resource_type: {resource_type}. Use vm, lxc, docker, or host"));
    }

    let snapshot = cx.providers().snapshot();
    let resource_id = if matches!(resource_type, "lxc" | "vm") && cx.providers().state.is_some() {
        match resolve_vmid(&snapshot, resource_type, resource_id, host_id) {
            Some(vmid) => vmid,
            None => {
                return CallToolResult::error(format!(
                    "could not resolve resource name '{resource_id}' to a VMID on host '{host_id}'"
                ));
            }
        }
    } else {
        resource_id.to_string()
    };
    note_access(cx, &snapshot, resource_type, &resource_id, host_id);

    let cli_access = cli_access_pattern(resource_type, host_id, &resource_id);
    let discovery = match provider.get(resource_type, host_id, &resource_id) {
        Some(d) => d,
        None => {
            let triggered = tokio::select! {
                biased;
                _ = cx.cancel.cancelled() => return dispatch_failure(DispatchError::Canceled),
                res = provider.trigger(resource_type, host_id, &resource_id) => res,
            };
            match triggered {
                Ok(d) => d,
                Err(err) => {
                    warn!(tool = TOOL, resource_type, resource_id = %resource_id, error = %err, "discovery failed");
                    return json_result(json!({
                        "found": false,
                        "resource_type": resource_type,
                        "resource_id": resource_id,
                        "host_id": host_id,
                        "cli_access": cli_access,
                        "message": format!("Discovery failed: {err}"),
                        "hint": "Use pulse_read with action='exec' to investigate. Try checking /var/log/ for logs.",
                    }));
                }
            }
        }
    };

    json_result(render(&discovery, cli_access))
}

fn render(d: &DiscoveryInfo, fallback_cli: String) -> serde_json::Value {
    let mut config_paths: Vec<String> = d.config_paths.clone();
    let mut log_paths: Vec<String> = d.log_paths.clone();
    if let Some((logs, config)) = common_service_paths(&d.service_type) {
        if config_paths.is_empty() {
            config_paths = config.iter().map(|s| s.to_string()).collect();
        }
        if log_paths.is_empty() {
            log_paths = logs.iter().map(|s| s.to_string()).collect();
        }
    }
    json!({
        "found": true,
        "id": d.id,
        "resource_type": d.resource_type,
        "resource_id": d.resource_id,
        "host_id": d.host_id,
        "hostname": d.hostname,
        "service_type": d.service_type,
        "service_name": d.service_name,
        "service_version": d.service_version,
        "cli_access": if d.cli_access.is_empty() { fallback_cli } else { d.cli_access.clone() },
        "config_paths": config_paths,
        "log_paths": log_paths,
        "facts": d.facts,
        "ports": d.ports,
        "discovered_at": d.discovered_at,
    })
}

fn list(cx: &ToolContext, params: &DiscoveryParams) -> CallToolResult {
    let Some(provider) = cx.providers().discovery.as_ref() else {
        return CallToolResult::text("Discovery service not available.");
    };
    let limit = params.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(DEFAULT_LIMIT);
    let mut discoveries = provider.list(params.kind.as_deref(), params.host.as_deref());
    if let Some(filter) = params.service_type.as_deref() {
        let filter = filter.to_lowercase();
        discoveries.retain(|d| {
            d.service_type.to_lowercase().contains(&filter) || d.service_name.to_lowercase().contains(&filter)
        });
    }
    let total = discoveries.len();
    discoveries.truncate(limit);

    let summaries: Vec<_> = discoveries
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "resource_type": d.resource_type,
                "resource_id": trim_slash(&d.resource_id),
                "host_id": d.host_id,
                "hostname": d.hostname,
                "service_type": d.service_type,
                "service_name": d.service_name,
                "service_version": d.service_version,
                "fact_count": d.facts.len(),
            })
        })
        .collect();
    json_result(json!({"discoveries": summaries, "total": total}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Guest;

    #[test]
    fn service_path_fallbacks() {
        let (logs, config) = common_service_paths("Jellyfin 10.8").unwrap();
        assert_eq!(logs[0], "/var/log/jellyfin/");
        assert_eq!(config[1], "/config/");
        assert!(common_service_paths("custom-app").is_none());
    }

    #[test]
    fn cli_access_describes_the_resource() {
        assert_eq!(
            cli_access_pattern("lxc", "pve1", "141"),
            "LXC container on Proxmox node 'pve1' (VMID 141)"
        );
        assert_eq!(cli_access_pattern("host", "delly", "delly"), "Host 'delly'");
        assert_eq!(cli_access_pattern("pod", "a", "b"), "");
    }

    #[test]
    fn guest_names_resolve_to_vmids_on_their_node() {
        let snapshot = Snapshot {
            containers: vec![Guest {
                vmid: 141,
                name: "Jellyfin".into(),
                node: "pve1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(resolve_vmid(&snapshot, "lxc", "jellyfin", "pve1").as_deref(), Some("141"));
        assert_eq!(resolve_vmid(&snapshot, "lxc", "jellyfin", "pve2"), None);
        assert_eq!(resolve_vmid(&snapshot, "vm", "101", "any").as_deref(), Some("101"));
    }
}
