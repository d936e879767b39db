//! `pulse_docker`: container lifecycle through the host's agent, image
//! updates through the updates provider, and Swarm state from the snapshot.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use pulse_approval::NewApproval;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{
    bad_args, format_docker_approval_needed, format_policy_blocked, json_result, read_only_refusal,
    redact_output, request_approval, writes_allowed,
};
use crate::executor::{ToolContext, dispatch_failure};
use crate::model::{CommandStatus, DockerContainer, DockerHost};
use crate::providers::{CommandPayload, DispatchError, PolicyDecision};
use crate::routing::{RoutingResult, resolve_route};
use crate::state::{ResourceKind, Snapshot, trim_slash};

const TOOL: &str = "pulse_docker";
const ACTIONS: &[&str] = &["control", "updates", "check_updates", "update", "services", "tasks", "swarm"];
const OPERATIONS: &[&str] = &["start", "stop", "restart"];

const VERIFY_ATTEMPTS: usize = 3;
const VERIFY_SETTLE: Duration = Duration::from_millis(500);

const RETRY_ATTEMPTS: usize = 3;
const RETRY_BASE: Duration = Duration::from_millis(25);
const RETRY_CAP: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Deserialize)]
struct DockerParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    container: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    operation: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    service: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    stack: Option<String>,
}

pub struct DockerTool;

#[async_trait]
impl Tool<ToolContext> for DockerTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Docker containers and Swarm: start/stop/restart containers, check and apply \
                          image updates, inspect Swarm services and tasks."
                .into(),
            params: vec![
                ToolParam::required("action", "What to do").one_of(ACTIONS),
                ToolParam::optional("container", "Container name or ID (control, update)"),
                ToolParam::optional("host", "Docker host name or ID"),
                ToolParam::optional("operation", "For control: the lifecycle operation").one_of(OPERATIONS),
                ToolParam::optional("service", "For tasks: filter by service name or ID"),
                ToolParam::optional("stack", "For services: filter by stack name"),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Mixed,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().state.is_some() || cx.providers().updates.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: DockerParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        match params.action.as_deref().unwrap_or_default() {
            "control" => control(cx, args, &params).await,
            "updates" => updates(cx, &params),
            "check_updates" => check_updates(cx, &params).await,
            "update" => update(cx, args, &params).await,
            "services" => services(cx, &params),
            "tasks" => tasks(cx, &params),
            "swarm" => swarm(cx, &params),
            other => CallToolResult::error(format!(
                "unknown action: {other}. Use: control, updates, check_updates, update, services, tasks, swarm"
            )),
        }
    }
}

// ── Lookup ───────────────────────────────────────────────────────────────────

fn host_matches(host: &DockerHost, name: &str) -> bool {
    host.hostname == name || host.id == name || (!host.display_name.is_empty() && host.display_name == name)
}

fn host_label(host: &DockerHost) -> &str {
    if host.display_name.is_empty() { &host.hostname } else { &host.display_name }
}

/// A container by name, id or id prefix, optionally on one host.  A name
/// present on several hosts is an error unless `host` narrows it down.
pub(crate) fn resolve_container<'a>(
    snapshot: &'a Snapshot,
    name: &str,
    host: Option<&str>,
) -> Result<(&'a DockerHost, &'a DockerContainer), String> {
    let mut matches: Vec<(&DockerHost, &DockerContainer)> = Vec::new();
    for h in snapshot
        .docker_hosts
        .iter()
        .filter(|h| host.is_none_or(|want| host_matches(h, want)))
    {
        let found = h
            .containers
            .iter()
            .find(|c| c.name == name || trim_slash(&c.name) == name || c.id == name)
            .or_else(|| {
                (name.len() >= 4)
                    .then(|| h.containers.iter().find(|c| c.id.starts_with(name)))
                    .flatten()
            });
        if let Some(c) = found {
            matches.push((h, c));
        }
    }

    match matches.as_slice() {
        [] => match host {
            Some(h) if !snapshot.docker_hosts.iter().any(|d| host_matches(d, h)) => {
                Err(format!("Docker host '{h}' not found"))
            }
            _ => Err(format!("no container named '{name}'")),
        },
        [one] => Ok(*one),
        many => {
            let hosts: Vec<&str> = many.iter().map(|(h, _)| host_label(h)).collect();
            Err(format!(
                "container '{name}' exists on multiple Docker hosts: {}. Specify host.",
                hosts.join(", ")
            ))
        }
    }
}

fn find_host<'a>(snapshot: &'a Snapshot, name: &str) -> Option<&'a DockerHost> {
    snapshot.docker_hosts.iter().find(|h| host_matches(h, name))
}

// ── control ──────────────────────────────────────────────────────────────────

fn unrouted_docker_host(snapshot: &Snapshot, host: &DockerHost) -> String {
    let loc = snapshot.resolve_resource(&host.hostname);
    match loc.kind.filter(ResourceKind::is_guest).or(loc.docker_host_kind) {
        Some(kind) => format!(
            "Docker host '{}' is a {} but no agent is available on its Proxmox host. Install Pulse \
             Unified Agent on the Proxmox node.",
            host.hostname,
            if kind == ResourceKind::Lxc { "LXC container" } else { "VM" }
        ),
        None => format!(
            "No agent available on Docker host '{}'. Install Pulse Unified Agent on the host to enable control.",
            host.hostname
        ),
    }
}

async fn control(cx: &ToolContext, args: &ToolArgs, params: &DockerParams) -> CallToolResult {
    let Some(container_name) = params.container.as_deref() else {
        return CallToolResult::error("container is required for control");
    };
    let Some(operation) = params.operation.as_deref() else {
        return CallToolResult::error("operation is required for control");
    };
    if !OPERATIONS.contains(&operation) {
        return CallToolResult::error(format!("invalid operation: {operation}. Use start, stop, or restart"));
    }
    if !writes_allowed(cx) {
        return CallToolResult::text("Docker control actions are not available in read-only mode.");
    }

    let snapshot = cx.providers().snapshot();
    if let Err(err) = cx.guards(TOOL, &snapshot).validate_resolved_resource(container_name, operation) {
        return err.into_result();
    }

    let (host, container) = match resolve_container(&snapshot, container_name, params.host.as_deref()) {
        Ok(found) => found,
        Err(err) => {
            return CallToolResult::text(format!("Could not find Docker container '{container_name}': {err}"));
        }
    };
    let name = trim_slash(&container.name);
    let command = format!("docker {operation} {name}");

    let preapproved = cx.consume_approval(args, &command, "docker", name).await;
    let decision = if preapproved {
        PolicyDecision::Allow
    } else {
        cx.providers().policy_decision(&command)
    };
    if decision == PolicyDecision::Block {
        return CallToolResult::text(format_policy_blocked(&command, "This command is blocked by security policy"));
    }

    let agents = cx.providers().connected_agents();
    let routing = resolve_route(&snapshot, &agents, &host.hostname);

    if let Some(reason) = cx.control().approval_reason(decision, preapproved) {
        info!(tool = TOOL, command = %command, host = %host.hostname, reason, "docker action needs approval");
        let agent_host = if routing.agent_hostname.is_empty() { &host.hostname } else { &routing.agent_hostname };
        let new = NewApproval::new(&command, "docker", name)
            .target_name(agent_host)
            .context(format!("{operation} Docker container {name}"));
        return request_approval(cx, new, |id| {
            format_docker_approval_needed(name, &host.hostname, operation, &command, id)
        })
        .await;
    }

    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }
    if !routing.is_routed() {
        return CallToolResult::text(unrouted_docker_host(&snapshot, host));
    }

    debug!(
        tool = TOOL,
        container = name,
        agent_id = %routing.agent_id,
        transport = routing.transport.as_str(),
        "routing docker control"
    );
    let out = match cx.dispatch(&routing.agent_id, payload_for(&routing, &command)).await {
        Ok(out) => out,
        Err(err) => return dispatch_failure(err),
    };
    let output = redact_output(&out.combined());

    let mut verification = match verify_container_state(cx, &routing, &container.id, operation).await {
        Ok(v) => v,
        Err(canceled) => return dispatch_failure(canceled),
    };
    let success = out.exit_code == 0;
    verification["ok"] = json!(success);

    let response = json!({
        "success": success,
        "action": "control",
        "operation": operation,
        "container": name,
        "container_id": container.id,
        "host": host.hostname,
        "command": command,
        "exit_code": out.exit_code,
        "output": output,
        "verification": verification,
    });
    CallToolResult::json_with_is_error(&response, !success)
}

fn payload_for(routing: &RoutingResult, command: &str) -> CommandPayload {
    CommandPayload {
        command: command.to_string(),
        target_type: routing.target_type.as_str().to_string(),
        target_id: routing.target_id.clone(),
    }
}

/// Parse `docker inspect -f '{{.State.Status}} {{.State.Running}}'`.
pub(crate) fn parse_inspect(output: &str) -> Option<(String, bool)> {
    let mut parts = output.split_whitespace();
    let status = parts.next()?.to_string();
    let running = parts.next()?.parse().ok()?;
    Some((status, running))
}

/// Poll `docker inspect` until the container settles.  Only cancellation
/// escapes; every other failure lands in the verification record.
async fn verify_container_state(
    cx: &ToolContext,
    routing: &RoutingResult,
    container_id: &str,
    operation: &str,
) -> Result<Value, DispatchError> {
    let want_running = operation != "stop";
    let command = format!("docker inspect -f '{{{{.State.Status}}}} {{{{.State.Running}}}}' '{container_id}'");
    let mut last = json!({"confirmed": false, "method": "docker_inspect", "command": command});

    for attempt in 0..VERIFY_ATTEMPTS {
        if attempt > 0 {
            tokio::select! {
                biased;
                _ = cx.cancel.cancelled() => return Err(DispatchError::Canceled),
                _ = tokio::time::sleep(VERIFY_SETTLE) => {}
            }
        }
        let out = match cx.dispatch(&routing.agent_id, payload_for(routing, &command)).await {
            Ok(out) => out,
            Err(DispatchError::Canceled) => return Err(DispatchError::Canceled),
            Err(err) => {
                last["note"] = json!(err.to_string());
                continue;
            }
        };
        let raw = out.stdout.trim().to_string();
        match parse_inspect(&raw).filter(|_| out.exit_code == 0) {
            Some((status, running)) => {
                let confirmed = running == want_running;
                last = json!({
                    "confirmed": confirmed,
                    "method": "docker_inspect",
                    "command": command,
                    "expected": {"running": want_running},
                    "observed": {"status": status, "running": running},
                });
                if confirmed {
                    break;
                }
            }
            None => {
                last = json!({
                    "confirmed": false,
                    "method": "docker_inspect",
                    "command": command,
                    "raw": raw,
                    "exit_code": out.exit_code,
                });
            }
        }
    }
    Ok(last)
}

// ── Updates ──────────────────────────────────────────────────────────────────

pub(crate) fn is_transient(err: &anyhow::Error) -> bool {
    const MARKERS: &[&str] = &[
        "temporary failure",
        "temporarily unavailable",
        "timeout",
        "timed out",
        "connection reset",
        "connection refused",
        "queue full",
        "resource busy",
        "database is locked",
        "deadlock",
        "eof",
        "try again",
    ];
    let msg = format!("{err:#}").to_lowercase();
    MARKERS.iter().any(|m| msg.contains(m))
}

/// Retry transient provider failures with capped exponential backoff.
pub(crate) async fn with_retry<F, Fut>(cx: &ToolContext, what: &str, mut op: F) -> anyhow::Result<CommandStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<CommandStatus>>,
{
    let mut delay = RETRY_BASE;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(status) => return Ok(status),
            Err(err) if attempt < RETRY_ATTEMPTS && is_transient(&err) => {
                warn!(tool = TOOL, what, attempt, error = %err, "transient failure, retrying");
                tokio::select! {
                    biased;
                    _ = cx.cancel.cancelled() => return Err(err),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(RETRY_CAP);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn updates(cx: &ToolContext, params: &DockerParams) -> CallToolResult {
    let Some(provider) = cx.providers().updates.as_ref() else {
        return CallToolResult::text("Docker update information not available. Ensure updates provider is configured.");
    };
    let snapshot = cx.providers().snapshot();
    let host_id = params
        .host
        .as_deref()
        .map(|h| find_host(&snapshot, h).map(|d| d.id.clone()).unwrap_or_else(|| h.to_string()));

    let updates = provider.pending_updates(host_id.as_deref());
    json_result(json!({
        "total": updates.len(),
        "updates": updates,
        "host_id": host_id.unwrap_or_default(),
    }))
}

async fn check_updates(cx: &ToolContext, params: &DockerParams) -> CallToolResult {
    let Some(provider) = cx.providers().updates.clone() else {
        return CallToolResult::text("Docker update information not available. Ensure updates provider is configured.");
    };
    let Some(host_name) = params.host.as_deref() else {
        return CallToolResult::error("host is required for check_updates");
    };
    let snapshot = cx.providers().snapshot();
    let Some(host) = find_host(&snapshot, host_name) else {
        return CallToolResult::text(format!("Docker host '{host_name}' not found."));
    };

    let status = match with_retry(cx, "check_updates", || provider.trigger_update_check(&host.id)).await {
        Ok(status) => status,
        Err(err) => return CallToolResult::text(format!("Failed to trigger update check: {err}")),
    };
    info!(tool = TOOL, host = %host.hostname, command_id = %status.id, "update check queued");
    json_result(json!({
        "success": true,
        "host_id": host.id,
        "host_name": host_label(host),
        "command_id": status.id,
        "message": "Update check command queued. Results will be available after the next agent report cycle (~30 seconds).",
        "command": status,
    }))
}

async fn update(cx: &ToolContext, args: &ToolArgs, params: &DockerParams) -> CallToolResult {
    let Some(provider) = cx.providers().updates.clone() else {
        return CallToolResult::text("Docker update information not available. Ensure updates provider is configured.");
    };
    let Some(container_name) = params.container.as_deref() else {
        return CallToolResult::error("container is required for update");
    };
    let Some(host_name) = params.host.as_deref() else {
        return CallToolResult::error("host is required for update");
    };
    if !writes_allowed(cx) {
        return read_only_refusal(TOOL, "update");
    }
    if !provider.update_actions_enabled() {
        return CallToolResult::text(
            "Docker container updates are disabled by server configuration. Ask an administrator to \
             enable update actions.",
        );
    }

    let snapshot = cx.providers().snapshot();
    if let Err(err) = cx.guards(TOOL, &snapshot).validate_resolved_resource(container_name, "update") {
        return err.into_result();
    }
    let (host, container) = match resolve_container(&snapshot, container_name, Some(host_name)) {
        Ok(found) => found,
        Err(err) => {
            return CallToolResult::text(format!("Could not find Docker container '{container_name}': {err}"));
        }
    };
    let name = trim_slash(&container.name);
    let command = format!("docker update {name}");

    let preapproved = cx.consume_approval(args, &command, "docker", &container.id).await;
    if let Some(reason) = cx.control().approval_reason(PolicyDecision::Allow, preapproved) {
        info!(tool = TOOL, container = name, host = %host.hostname, reason, "container update needs approval");
        let new = NewApproval::new(&command, "docker", &container.id)
            .target_name(&host.hostname)
            .context(format!("update Docker container {name}"));
        let display = format!("{command} (pull latest + recreate)");
        return request_approval(cx, new, |id| {
            format_docker_approval_needed(name, &host.hostname, "update", &display, id)
        })
        .await;
    }

    let result = with_retry(cx, "update", || provider.update_container(&host.id, &container.id, name)).await;
    let status = match result {
        Ok(status) => status,
        Err(err) => return CallToolResult::error(format!("failed to queue container update: {err}")),
    };
    info!(tool = TOOL, container = name, host = %host.hostname, command_id = %status.id, "container update queued");
    json_result(json!({
        "success": true,
        "host_id": host.id,
        "container_id": container.id,
        "container_name": name,
        "command_id": status.id,
        "message": format!(
            "Update command queued for container '{name}'. The agent will pull the latest image and recreate the container."
        ),
        "command": status,
    }))
}

// ── Swarm ────────────────────────────────────────────────────────────────────

fn swarm_host<'a>(snapshot: &'a Snapshot, params: &DockerParams) -> Result<&'a DockerHost, CallToolResult> {
    let Some(name) = params.host.as_deref() else {
        return Err(CallToolResult::error("host is required"));
    };
    find_host(snapshot, name).ok_or_else(|| CallToolResult::text(format!("Docker host '{name}' not found.")))
}

fn swarm(cx: &ToolContext, params: &DockerParams) -> CallToolResult {
    let snapshot = cx.providers().snapshot();
    let host = match swarm_host(&snapshot, params) {
        Ok(h) => h,
        Err(result) => return result,
    };
    match &host.swarm {
        Some(info) => json_result(json!({"host": host_label(host), "status": info})),
        None => CallToolResult::text(format!(
            "Docker host '{}' is not part of a Swarm cluster.",
            host_label(host)
        )),
    }
}

fn services(cx: &ToolContext, params: &DockerParams) -> CallToolResult {
    let snapshot = cx.providers().snapshot();
    let host = match swarm_host(&snapshot, params) {
        Ok(h) => h,
        Err(result) => return result,
    };
    if host.services.is_empty() {
        return CallToolResult::text(format!(
            "No Docker services found on host '{}'. The host may not be a Swarm manager.",
            host_label(host)
        ));
    }

    // Stack services are named `<stack>_<service>`.
    let stack_prefix = params.stack.as_deref().map(|s| format!("{s}_"));
    let services: Vec<_> = host
        .services
        .iter()
        .filter(|s| stack_prefix.as_deref().is_none_or(|p| s.name.starts_with(p)))
        .collect();
    json_result(json!({
        "host": host_label(host),
        "total": services.len(),
        "filtered": stack_prefix.is_some(),
        "services": services,
    }))
}

fn tasks(cx: &ToolContext, params: &DockerParams) -> CallToolResult {
    let snapshot = cx.providers().snapshot();
    let host = match swarm_host(&snapshot, params) {
        Ok(h) => h,
        Err(result) => return result,
    };
    let service = params.service.as_deref();
    let service_ids: Vec<&str> = match service {
        Some(want) => host
            .services
            .iter()
            .filter(|s| s.id == want || s.name == want)
            .map(|s| s.id.as_str())
            .collect(),
        None => Vec::new(),
    };
    let tasks: Vec<_> = host
        .tasks
        .iter()
        .filter(|t| service.is_none_or(|want| t.service == want || service_ids.contains(&t.service.as_str())))
        .collect();
    json_result(json!({
        "host": host_label(host),
        "service": service.unwrap_or_default(),
        "total": tasks.len(),
        "tasks": tasks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DockerService;

    fn container(id: &str, name: &str) -> DockerContainer {
        DockerContainer {
            id: id.into(),
            name: name.into(),
            state: "running".into(),
            ..Default::default()
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            docker_hosts: vec![
                DockerHost {
                    id: "dh-1".into(),
                    hostname: "docker01".into(),
                    containers: vec![container("abc123456789", "/nginx"), container("def000000000", "redis")],
                    services: vec![
                        DockerService {
                            id: "svc-1".into(),
                            name: "web_nginx".into(),
                            ..Default::default()
                        },
                        DockerService {
                            id: "svc-2".into(),
                            name: "db_postgres".into(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
                DockerHost {
                    id: "dh-2".into(),
                    hostname: "docker02".into(),
                    display_name: "Edge".into(),
                    containers: vec![container("fff111111111", "redis")],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn container_lookup_by_name_id_and_prefix() {
        let snap = snapshot();
        let (host, c) = resolve_container(&snap, "nginx", None).unwrap();
        assert_eq!(host.hostname, "docker01");
        assert_eq!(c.id, "abc123456789");
        assert_eq!(resolve_container(&snap, "abc1", None).unwrap().1.name, "/nginx");
        assert!(resolve_container(&snap, "ab", None).is_err());
    }

    #[test]
    fn ambiguous_container_needs_host() {
        let snap = snapshot();
        let err = resolve_container(&snap, "redis", None).unwrap_err();
        assert_eq!(err, "container 'redis' exists on multiple Docker hosts: docker01, Edge. Specify host.");

        let (host, _) = resolve_container(&snap, "redis", Some("Edge")).unwrap();
        assert_eq!(host.id, "dh-2");
        assert_eq!(
            resolve_container(&snap, "redis", Some("nowhere")).unwrap_err(),
            "Docker host 'nowhere' not found"
        );
    }

    #[test]
    fn inspect_output_parsing() {
        assert_eq!(parse_inspect("running true\n"), Some(("running".into(), true)));
        assert_eq!(parse_inspect("exited false"), Some(("exited".into(), false)));
        assert_eq!(parse_inspect("Error: No such object"), None);
    }

    #[test]
    fn transient_errors_are_recognized() {
        assert!(is_transient(&anyhow::anyhow!("database is locked")));
        assert!(is_transient(&anyhow::anyhow!("send: Queue Full")));
        assert!(!is_transient(&anyhow::anyhow!("host not found")));
    }
}
