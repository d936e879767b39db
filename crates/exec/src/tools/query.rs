//! `pulse_query`: inventory lookups over the fleet snapshot.
//!
//! Everything a query returns is registered in the session's resolved
//! context so later action tools can target it.  Only `get` counts as the
//! model looking at one resource on purpose; the bulk actions leave the
//! explicit-access clock alone.

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{bad_args, json_result, read_only_refusal, writes_allowed};
use crate::context::{ResolvedContext, ResourceRegistration};
use crate::executor::ToolContext;
use crate::model::{DockerContainer, DockerHost, Guest, Node};
use crate::state::{ResourceKind, Snapshot, trim_slash};

const TOOL: &str = "pulse_query";
const ACTIONS: &[&str] = &["search", "get", "list", "topology", "health", "capabilities", "set_url"];
const SEARCH_TYPES: &[&str] = &["node", "vm", "container", "docker", "docker_host"];
const LIST_TYPES: &[&str] = &["nodes", "vms", "containers", "docker"];
const DEFAULT_SEARCH_LIMIT: usize = 20;
const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    query: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    offset: Option<i64>,
}

impl QueryParams {
    fn page(&self, default_limit: usize) -> (usize, usize) {
        let limit = self.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(default_limit);
        let offset = self.offset.filter(|o| *o > 0).map(|o| o as usize).unwrap_or(0);
        (limit, offset)
    }

    fn status_matches(&self, status: &str) -> bool {
        self.status.as_deref().is_none_or(|want| status.eq_ignore_ascii_case(want))
    }
}

pub struct QueryTool;

#[async_trait]
impl Tool<ToolContext> for QueryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Query infrastructure: search resources by name, get one resource in detail, list \
                          or map the topology, summarize health, or report server capabilities. Use this \
                          to identify targets before running commands."
                .into(),
            params: vec![
                ToolParam::required("action", "What to query").one_of(ACTIONS),
                ToolParam::optional("query", "For search: substring of a name, ID or image"),
                ToolParam::optional("type", "For search or list: resource class filter"),
                ToolParam::optional("resource_type", "For get or set_url: node, vm, container, docker or docker_host"),
                ToolParam::optional("resource_id", "For get or set_url: name, ID or VMID"),
                ToolParam::optional("status", "Status filter (running, stopped, online...)"),
                ToolParam::optional("url", "For set_url: the URL to attach to the resource"),
                ToolParam::optional("limit", "Maximum number of results").typed(ParamType::Integer),
                ToolParam::optional("offset", "Number of results to skip").typed(ParamType::Integer),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Mixed,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().state.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: QueryParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let snapshot = cx.providers().snapshot();
        match params.action.as_deref().unwrap_or_default() {
            "search" => search(&cx.session, &snapshot, &params),
            "get" => get(&cx.session, &snapshot, &params),
            "list" => list(&cx.session, &snapshot, &params),
            "topology" => topology(&cx.session, &snapshot),
            "health" => health(cx, &snapshot),
            "capabilities" => capabilities(cx),
            "set_url" => set_url(cx, &snapshot, &params),
            other => CallToolResult::error(format!(
                "unknown action: {other}. Use: search, get, list, topology, health, capabilities, set_url"
            )),
        }
    }
}

// ── Resolved-context registration ────────────────────────────────────────────

pub(crate) fn register_node(session: &ResolvedContext, node: &Node) -> String {
    session.add_resolved_resource(
        ResourceRegistration::new(ResourceKind::Node, &node.name, &node.name)
            .node(&node.name)
            .alias(&node.id),
    )
}

pub(crate) fn register_guest(session: &ResolvedContext, guest: &Guest, is_container: bool) -> String {
    let kind = if is_container { ResourceKind::Lxc } else { ResourceKind::Vm };
    session.add_resolved_resource(
        ResourceRegistration::new(kind, guest.vmid.to_string(), &guest.name)
            .node(&guest.node)
            .vmid(guest.vmid)
            .alias(&guest.id)
            .alias(guest.vmid.to_string()),
    )
}

/// A Docker host running inside a guest inherits that guest's node.
fn docker_node(snapshot: &Snapshot, host: &DockerHost) -> String {
    let loc = snapshot.resolve_resource(&host.hostname);
    if loc.found { loc.node } else { String::new() }
}

pub(crate) fn register_docker_host(session: &ResolvedContext, snapshot: &Snapshot, host: &DockerHost) -> String {
    let mut reg = ResourceRegistration::new(ResourceKind::DockerHost, &host.id, &host.hostname)
        .node(docker_node(snapshot, host))
        .host(&host.hostname)
        .alias(&host.display_name);
    reg.agent_id = host.agent_id.clone().unwrap_or_default();
    session.add_resolved_resource(reg)
}

pub(crate) fn register_docker_container(
    session: &ResolvedContext,
    snapshot: &Snapshot,
    host: &DockerHost,
    container: &DockerContainer,
) -> String {
    let mut reg = ResourceRegistration::new(ResourceKind::DockerContainer, &container.id, trim_slash(&container.name))
        .node(docker_node(snapshot, host))
        .host(&host.hostname)
        .alias(&container.id);
    reg.agent_id = host.agent_id.clone().unwrap_or_default();
    session.add_resolved_resource(reg)
}

// ── Summaries ────────────────────────────────────────────────────────────────

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { used as f64 / total as f64 * 100.0 }
}

fn node_summary(node: &Node) -> Value {
    json!({
        "type": "node",
        "id": node.id,
        "name": node.name,
        "status": node.status,
        "cpu_percent": node.cpu * 100.0,
        "memory_percent": percent(node.mem_used, node.mem_total),
        "uptime_secs": node.uptime_secs,
    })
}

fn guest_summary(guest: &Guest, is_container: bool) -> Value {
    json!({
        "type": if is_container { "container" } else { "vm" },
        "id": guest.id,
        "vmid": guest.vmid,
        "name": guest.name,
        "status": guest.status,
        "node": guest.node,
        "cpu_percent": guest.cpu * 100.0,
        "memory_percent": percent(guest.mem_used, guest.mem_total),
        "tags": guest.tags,
    })
}

fn docker_host_summary(host: &DockerHost) -> Value {
    json!({
        "type": "docker_host",
        "id": host.id,
        "hostname": host.hostname,
        "display_name": host.display_name,
        "status": host.status,
        "container_count": host.containers.len(),
        "swarm": host.swarm.is_some(),
    })
}

fn container_summary(host: &DockerHost, c: &DockerContainer) -> Value {
    json!({
        "type": "docker",
        "id": c.id,
        "name": trim_slash(&c.name),
        "image": c.image,
        "state": c.state,
        "status": c.status,
        "host": host.hostname,
    })
}

// ── search ───────────────────────────────────────────────────────────────────

fn contains_ci(needle: &str, candidates: &[&str]) -> bool {
    candidates
        .iter()
        .any(|c| !c.is_empty() && c.to_lowercase().contains(needle))
}

fn search(session: &ResolvedContext, snapshot: &Snapshot, params: &QueryParams) -> CallToolResult {
    let query = params.query.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return CallToolResult::error("query is required");
    }
    let kind = params.kind.as_deref().unwrap_or_default();
    if !kind.is_empty() && !SEARCH_TYPES.contains(&kind) {
        return CallToolResult::error(format!(
            "invalid type: {kind}. Use node, vm, container, docker, or docker_host"
        ));
    }
    let wants = |k: &str| kind.is_empty() || kind == k;
    let needle = query.to_lowercase();
    let (limit, offset) = params.page(DEFAULT_SEARCH_LIMIT);

    // Each hit carries the closure that registers it, run only for the page.
    let mut hits: Vec<(Value, Box<dyn Fn(&ResolvedContext) -> String + '_>)> = Vec::new();

    if wants("node") {
        for node in &snapshot.nodes {
            if params.status_matches(&node.status) && contains_ci(&needle, &[&node.name, &node.id]) {
                hits.push((node_summary(node), Box::new(move |s| register_node(s, node))));
            }
        }
    }
    for (list, is_container, k) in [(&snapshot.vms, false, "vm"), (&snapshot.containers, true, "container")] {
        if !wants(k) {
            continue;
        }
        for guest in list {
            let vmid = guest.vmid.to_string();
            if params.status_matches(&guest.status) && contains_ci(&needle, &[&guest.name, &guest.id, &vmid]) {
                hits.push((
                    guest_summary(guest, is_container),
                    Box::new(move |s| register_guest(s, guest, is_container)),
                ));
            }
        }
    }
    for host in &snapshot.docker_hosts {
        if wants("docker_host")
            && params.status_matches(&host.status)
            && contains_ci(&needle, &[&host.hostname, &host.display_name, &host.id])
        {
            hits.push((
                docker_host_summary(host),
                Box::new(move |s| register_docker_host(s, snapshot, host)),
            ));
        }
        if wants("docker") {
            for c in &host.containers {
                if params.status_matches(&c.state) && contains_ci(&needle, &[&c.name, &c.id, &c.image]) {
                    hits.push((
                        container_summary(host, c),
                        Box::new(move |s| register_docker_container(s, snapshot, host, c)),
                    ));
                }
            }
        }
    }

    let total = hits.len();
    let matches: Vec<Value> = hits
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(summary, register)| {
            register(session);
            summary
        })
        .collect();
    debug!(tool = TOOL, query, total, returned = matches.len(), "search");
    json_result(json!({
        "query": query,
        "matches": matches,
        "total": total,
        "offset": offset,
        "limit": limit,
    }))
}

// ── get ──────────────────────────────────────────────────────────────────────

fn get(session: &ResolvedContext, snapshot: &Snapshot, params: &QueryParams) -> CallToolResult {
    let Some(resource_type) = params.resource_type.as_deref() else {
        return CallToolResult::error("resource_type is required");
    };
    let Some(resource_id) = params.resource_id.as_deref() else {
        return CallToolResult::error("resource_id is required");
    };

    let found: Option<(Value, String)> = match resource_type {
        "node" => snapshot
            .find_node(resource_id)
            .map(|n| (node_summary(n), register_node(session, n))),
        "vm" | "container" => {
            let list = if resource_type == "vm" { &snapshot.vms } else { &snapshot.containers };
            let is_container = resource_type == "container";
            list.iter()
                .find(|g| g.vmid.to_string() == resource_id || g.name == resource_id || g.id == resource_id)
                .map(|g| {
                    let mut summary = guest_summary(g, is_container);
                    summary["disks"] = json!(g.disks);
                    (summary, register_guest(session, g, is_container))
                })
        }
        "docker" => snapshot
            .docker_hosts
            .iter()
            .find_map(|h| {
                h.containers
                    .iter()
                    .find(|c| c.id == resource_id || trim_slash(&c.name) == resource_id || c.id.starts_with(resource_id))
                    .map(|c| (h, c))
            })
            .map(|(h, c)| (container_summary(h, c), register_docker_container(session, snapshot, h, c))),
        "docker_host" => snapshot.find_docker_host(resource_id).map(|h| {
            let mut summary = docker_host_summary(h);
            summary["containers"] = json!(h.containers.iter().map(|c| container_summary(h, c)).collect::<Vec<_>>());
            (summary, register_docker_host(session, snapshot, h))
        }),
        other => {
            return CallToolResult::error(format!(
                "invalid resource_type: {other}. Use 'node', 'vm', 'container', 'docker', or 'docker_host'"
            ));
        }
    };

    match found {
        Some((summary, id)) => {
            session.mark_explicit_access(&id);
            debug!(tool = TOOL, resource_id = %id, "explicit access");
            json_result(summary)
        }
        None => json_result(json!({
            "error": "not_found",
            "resource_id": resource_id,
            "type": resource_type,
        })),
    }
}

// ── list / topology / health ─────────────────────────────────────────────────

fn list(session: &ResolvedContext, snapshot: &Snapshot, params: &QueryParams) -> CallToolResult {
    let kind = params.kind.as_deref().unwrap_or_default();
    if !kind.is_empty() && !LIST_TYPES.contains(&kind) {
        return CallToolResult::error(format!("invalid type: {kind}. Use nodes, vms, containers, or docker"));
    }
    let wants = |k: &str| kind.is_empty() || kind == k;
    let (limit, offset) = params.page(DEFAULT_LIST_LIMIT);

    fn page<'a, T>(items: impl Iterator<Item = &'a T>, limit: usize, offset: usize) -> (Vec<&'a T>, usize)
    where
        T: 'a,
    {
        let all: Vec<&T> = items.collect();
        let total = all.len();
        (all.into_iter().skip(offset).take(limit).collect(), total)
    }

    let mut response = json!({});
    if wants("nodes") {
        let (nodes, total) = page(snapshot.nodes.iter().filter(|n| params.status_matches(&n.status)), limit, offset);
        for n in &nodes {
            register_node(session, n);
        }
        response["nodes"] = json!(nodes.iter().map(|n| node_summary(n)).collect::<Vec<_>>());
        response["total_nodes"] = json!(total);
    }
    for (list, is_container, key) in [(&snapshot.vms, false, "vms"), (&snapshot.containers, true, "containers")] {
        if !wants(key) {
            continue;
        }
        let (guests, total) = page(list.iter().filter(|g| params.status_matches(&g.status)), limit, offset);
        for g in &guests {
            register_guest(session, g, is_container);
        }
        response[key] = json!(guests.iter().map(|g| guest_summary(g, is_container)).collect::<Vec<_>>());
        response[format!("total_{key}")] = json!(total);
    }
    if wants("docker") {
        let (hosts, total) = page(snapshot.docker_hosts.iter().filter(|h| params.status_matches(&h.status)), limit, offset);
        for h in &hosts {
            register_docker_host(session, snapshot, h);
        }
        response["docker_hosts"] = json!(hosts.iter().map(|h| docker_host_summary(h)).collect::<Vec<_>>());
        response["total_docker_hosts"] = json!(total);
    }
    json_result(response)
}

fn topology(session: &ResolvedContext, snapshot: &Snapshot) -> CallToolResult {
    let nodes: Vec<Value> = snapshot
        .nodes
        .iter()
        .map(|node| {
            register_node(session, node);
            let on_node = |list: &[Guest], is_container: bool| -> Vec<Value> {
                list.iter()
                    .filter(|g| g.node == node.name)
                    .map(|g| {
                        register_guest(session, g, is_container);
                        guest_summary(g, is_container)
                    })
                    .collect()
            };
            let mut summary = node_summary(node);
            summary["vms"] = json!(on_node(&snapshot.vms, false));
            summary["containers"] = json!(on_node(&snapshot.containers, true));
            summary
        })
        .collect();

    let docker_hosts: Vec<Value> = snapshot
        .docker_hosts
        .iter()
        .map(|host| {
            register_docker_host(session, snapshot, host);
            let containers: Vec<Value> = host
                .containers
                .iter()
                .map(|c| {
                    register_docker_container(session, snapshot, host, c);
                    container_summary(host, c)
                })
                .collect();
            let mut summary = docker_host_summary(host);
            summary["containers"] = json!(containers);
            summary
        })
        .collect();

    json_result(json!({
        "nodes": nodes,
        "docker_hosts": docker_hosts,
        "summary": {
            "nodes": snapshot.nodes.len(),
            "vms": snapshot.vms.len(),
            "containers": snapshot.containers.len(),
            "docker_hosts": snapshot.docker_hosts.len(),
        },
    }))
}

fn count_status<'a>(statuses: impl Iterator<Item = &'a str>, want: &str) -> usize {
    statuses.filter(|s| s.eq_ignore_ascii_case(want)).count()
}

fn health(cx: &ToolContext, snapshot: &Snapshot) -> CallToolResult {
    for node in &snapshot.nodes {
        register_node(&cx.session, node);
    }
    let offline: Vec<&str> = snapshot
        .nodes
        .iter()
        .filter(|n| !n.status.eq_ignore_ascii_case("online"))
        .map(|n| n.name.as_str())
        .collect();
    let guests = snapshot.vms.iter().chain(&snapshot.containers);
    let running = count_status(guests.clone().map(|g| g.status.as_str()), "running");
    let unhealthy_hosts: Vec<&str> = snapshot
        .docker_hosts
        .iter()
        .filter(|h| !h.status.eq_ignore_ascii_case("online"))
        .map(|h| h.hostname.as_str())
        .collect();

    json_result(json!({
        "healthy": offline.is_empty() && unhealthy_hosts.is_empty(),
        "nodes": {"total": snapshot.nodes.len(), "offline": offline},
        "guests": {"total": snapshot.guest_count(), "running": running, "stopped": snapshot.guest_count() - running},
        "docker_hosts": {"total": snapshot.docker_hosts.len(), "unhealthy": unhealthy_hosts},
        "active_alerts": snapshot.active_alerts.len(),
        "connected_agents": cx.providers().connected_agents().len(),
    }))
}

// ── capabilities / set_url ───────────────────────────────────────────────────

fn capabilities(cx: &ToolContext) -> CallToolResult {
    let settings = cx.control();
    let agents = cx.providers().connected_agents();
    let profiles = cx
        .providers()
        .profiles
        .as_ref()
        .map(|p| p.list_profiles())
        .unwrap_or_default();
    json_result(json!({
        "control_level": settings.level.as_str(),
        "protected_guests": settings.protected_guests.len(),
        "strict_resolution": cx.core.strict_resolution(),
        "features": cx.providers().present(),
        "agent_count": agents.len(),
        "agents": agents,
        "agent_profiles": profiles,
    }))
}

fn set_url(cx: &ToolContext, snapshot: &Snapshot, params: &QueryParams) -> CallToolResult {
    let Some(updater) = cx.providers().metadata.as_ref() else {
        return CallToolResult::text("Metadata updater not available.");
    };
    let (Some(resource_type), Some(resource_id)) = (params.resource_type.as_deref(), params.resource_id.as_deref())
    else {
        return CallToolResult::error("resource_type and resource_id are required");
    };
    if !writes_allowed(cx) {
        return read_only_refusal(TOOL, "set_url");
    }
    let url = params.url.as_deref().unwrap_or_default().trim();
    if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
        return CallToolResult::error("url must start with http:// or https://");
    }
    if !snapshot.resolve_resource(resource_id).found && snapshot.find_docker_host(resource_id).is_none() {
        return CallToolResult::error(format!("resource '{resource_id}' not found"));
    }
    if let Err(err) = updater.set_resource_url(resource_type, resource_id, url) {
        return CallToolResult::error(format!("failed to set resource URL: {err}"));
    }
    info!(tool = TOOL, resource_type, resource_id, url, "resource URL updated");
    json_result(json!({
        "success": true,
        "resource_type": resource_type,
        "resource_id": resource_id,
        "url": url,
        "action": if url.is_empty() { "cleared" } else { "set" },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot {
            nodes: vec![Node {
                id: "node/pve1".into(),
                name: "pve1".into(),
                status: "online".into(),
                ..Default::default()
            }],
            containers: vec![
                Guest {
                    id: "pve1/lxc/141".into(),
                    vmid: 141,
                    name: "jellyfin".into(),
                    node: "pve1".into(),
                    status: "running".into(),
                    ..Default::default()
                },
                Guest {
                    id: "pve1/lxc/142".into(),
                    vmid: 142,
                    name: "jelly-backup".into(),
                    node: "pve1".into(),
                    status: "stopped".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn params(v: Value) -> QueryParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn search_registers_without_explicit_access() {
        let session = ResolvedContext::new("s");
        let snap = snapshot();
        let result = search(&session, &snap, &params(json!({"query": "JELLY"})));
        let body = result.json_content().unwrap();
        assert_eq!(body["total"], 2);
        assert!(session.by_alias("jellyfin").is_some());
        assert!(session.recently_accessed(std::time::Duration::from_secs(30)).is_empty());
    }

    #[test]
    fn search_pages_and_filters() {
        let session = ResolvedContext::new("s");
        let snap = snapshot();
        let body = search(&session, &snap, &params(json!({"query": "jelly", "status": "running"})))
            .json_content()
            .unwrap();
        assert_eq!(body["total"], 1);
        assert_eq!(body["matches"][0]["name"], "jellyfin");

        let body = search(&session, &snap, &params(json!({"query": "jelly", "limit": 1, "offset": 1})))
            .json_content()
            .unwrap();
        assert_eq!(body["matches"].as_array().unwrap().len(), 1);
        assert_eq!(body["matches"][0]["name"], "jelly-backup");

        assert!(search(&session, &snap, &params(json!({"query": "x", "type": "pod"}))).is_error);
    }

    #[test]
    fn get_marks_explicit_access() {
        let session = ResolvedContext::new("s");
        let snap = snapshot();
        let body = get(&session, &snap, &params(json!({"resource_type": "container", "resource_id": "141"})))
            .json_content()
            .unwrap();
        assert_eq!(body["name"], "jellyfin");
        assert!(session.was_recently_accessed("lxc:141", std::time::Duration::from_secs(30)));

        let missing = get(&session, &snap, &params(json!({"resource_type": "vm", "resource_id": "999"})))
            .json_content()
            .unwrap();
        assert_eq!(missing["error"], "not_found");
    }

    #[test]
    fn topology_registers_everything() {
        let session = ResolvedContext::new("s");
        let body = topology(&session, &snapshot()).json_content().unwrap();
        assert_eq!(body["nodes"][0]["containers"].as_array().unwrap().len(), 2);
        assert_eq!(session.len(), 3);
        assert!(session.by_alias("142").is_some());
    }
}
