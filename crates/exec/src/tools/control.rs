//! `pulse_control`: the write tool.  `type=command` runs an arbitrary shell
//! command on a routed target; `type=guest` starts, stops, restarts or
//! deletes a Proxmox guest through its node's agent.
//!
//! Gate order for a command: context validation, routing validation,
//! policy, target selection, routing, execution-context check, approval,
//! dispatch, redaction.

use async_trait::async_trait;
use pulse_approval::NewApproval;
use pulse_safety::classify;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::read::unrouted_message;
use super::{
    bad_args, format_approval_needed, format_control_approval_needed, format_policy_blocked,
    format_target_host_required, redact_output, request_approval,
};
use crate::executor::{ToolContext, dispatch_failure};
use crate::model::Guest;
use crate::providers::{CommandPayload, DispatchError, PolicyDecision};
use crate::routing::{RoutingResult, TargetType, find_agent_for_node, resolve_route};

const TOOL: &str = "pulse_control";
const GUEST_ACTIONS: &[&str] = &["start", "stop", "shutdown", "restart", "delete"];
const POLICY_BLOCK_REASON: &str = "This command is blocked by security policy";

#[derive(Debug, Default, Deserialize)]
struct ControlParams {
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    command: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    target_host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    guest_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    force: bool,
}

pub struct ControlTool;

#[async_trait]
impl Tool<ToolContext> for ControlTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "WRITE operations: control VMs/LXCs (start/stop/restart/delete) or execute \
                          state-modifying commands. For read-only operations use pulse_read. For Docker \
                          use pulse_docker."
                .into(),
            params: vec![
                ToolParam::required("type", "Control type").one_of(&["guest", "command"]),
                ToolParam::optional("guest_id", "For guest: VMID or name"),
                ToolParam::optional("action", "For guest: the lifecycle action").one_of(GUEST_ACTIONS),
                ToolParam::optional("command", "For command: the shell command to execute"),
                ToolParam::optional("target_host", "For command: hostname, LXC or VM name to run on"),
                ToolParam::optional("force", "For guest stop: skip the lock and force the stop")
                    .typed(ParamType::Boolean)
                    .default_value("false"),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Write,
                require_control: true,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().agents.is_some() && cx.providers().state.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: ControlParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        match params.kind.as_deref().unwrap_or_default() {
            "command" => run_command(cx, args, &params).await,
            "guest" => control_guest(cx, args, &params).await,
            other => CallToolResult::error(format!("unknown type: {other}. Use: guest, command")),
        }
    }
}

// ── type=command ─────────────────────────────────────────────────────────────

/// Fields the approval hash binds to.  Hosts bind to the agent, guests to
/// their VMID, so an approval cannot be replayed against another machine.
fn approval_target(target_host: &str, routing: &RoutingResult) -> (String, String, String) {
    let target_type = routing.target_type.as_str().to_string();
    let routed_id = routing.target_id.trim();
    let target_id = match routing.target_type {
        TargetType::Host if !routing.agent_id.trim().is_empty() => routing.agent_id.trim(),
        TargetType::Container | TargetType::Vm if !routed_id.is_empty() => routed_id,
        _ => target_host.trim(),
    };
    let name = [target_host, routing.agent_hostname.as_str(), routing.agent_id.as_str()]
        .into_iter()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default();
    (target_type, target_id.to_string(), name.to_string())
}

async fn run_command(cx: &ToolContext, args: &ToolArgs, params: &ControlParams) -> CallToolResult {
    let Some(command) = params.command.as_deref() else {
        return CallToolResult::error("command is required");
    };
    let target_host = params.target_host.as_deref().unwrap_or_default();
    let snapshot = cx.providers().snapshot();
    let guards = cx.guards(TOOL, &snapshot);

    if !target_host.is_empty() {
        match guards.validate_for_exec(target_host, command) {
            Err(err) => return err.into_result(),
            Ok(Some(warning)) => {
                warn!(tool = TOOL, target_host, %warning, "target not in resolved context; possible hallucination");
            }
            Ok(None) => {}
        }
        if let Err(err) = guards.validate_routing_context(target_host) {
            return err.into_result();
        }
    }

    let decision = cx.providers().policy_decision(command);
    if decision == PolicyDecision::Block {
        warn!(tool = TOOL, command, "command blocked by policy");
        return CallToolResult::text(format_policy_blocked(command, POLICY_BLOCK_REASON));
    }

    let agents = cx.providers().connected_agents();
    if target_host.is_empty() && agents.len() > 1 {
        return CallToolResult::text(format_target_host_required(&agents));
    }
    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }

    let routing = resolve_route(&snapshot, &agents, target_host);
    if !routing.is_routed() {
        if target_host.is_empty() {
            return CallToolResult::error("no agent available for target");
        }
        return CallToolResult::error(unrouted_message(cx, target_host, &routing));
    }

    if !target_host.is_empty() && classify(command).is_write() {
        if let Err(err) = guards.validate_write_execution_context(target_host, &routing) {
            return err.into_result();
        }
    }

    let (target_type, target_id, target_name) = approval_target(target_host, &routing);
    let preapproved = cx.consume_approval(args, command, &target_type, &target_id).await;
    let settings = cx.control();
    if let Some(reason) = settings.approval_reason(decision, preapproved) {
        info!(tool = TOOL, command, target_host, reason, "command needs approval");
        let new = NewApproval::new(command, &target_type, &target_id)
            .target_name(target_name)
            .context(reason);
        return request_approval(cx, new, |id| format_approval_needed(command, reason, id)).await;
    }

    debug!(
        tool = TOOL,
        target_host,
        agent_id = %routing.agent_id,
        agent_host = %routing.agent_hostname,
        resolved_kind = routing.resolved_kind_str(),
        resolved_node = %routing.resolved_node,
        transport = routing.transport.as_str(),
        target_id = %routing.target_id,
        "routing command execution"
    );

    let payload = CommandPayload {
        command: command.to_string(),
        target_type: routing.target_type.as_str().to_string(),
        target_id: routing.target_id.clone(),
    };
    let out = match cx.dispatch(&routing.agent_id, payload).await {
        Ok(out) => out,
        Err(err) => return dispatch_failure(err),
    };

    let success = out.exit_code == 0;
    let response = json!({
        "success": success,
        "type": "command",
        "command": command,
        "target_host": target_host,
        "exit_code": out.exit_code,
        "output": redact_output(&out.combined()),
        "execution": routing.provenance(target_host),
        "verification": {"ok": success, "method": "exit_code", "exit_code": out.exit_code},
    });
    CallToolResult::json_with_is_error(&response, !success)
}

// ── type=guest ───────────────────────────────────────────────────────────────

pub(crate) fn guest_command(tool: &str, vmid: u32, action: &str, force: bool) -> String {
    match action {
        "stop" if force => format!("{tool} stop {vmid} --skiplock"),
        "restart" => format!("{tool} reboot {vmid}"),
        "delete" => format!("{tool} destroy {vmid} --purge"),
        other => format!("{tool} {other} {vmid}"),
    }
}

/// Proxmox exits non-zero when the guest is already where we wanted it.
pub(crate) fn is_idempotent_noop(action: &str, output: &str) -> bool {
    let lower = output.to_lowercase();
    match action {
        "stop" | "shutdown" => lower.contains("not running"),
        "start" => lower.contains("already running"),
        _ => false,
    }
}

fn expected_state(action: &str) -> &'static str {
    match action {
        "start" | "restart" => "running",
        "stop" | "shutdown" => "stopped",
        "delete" => "deleted",
        _ => "",
    }
}

pub(crate) fn observed_state(status_output: &str) -> &'static str {
    let lower = status_output.to_lowercase();
    if lower.contains("status: running") {
        "running"
    } else if lower.contains("status: stopped") {
        "stopped"
    } else {
        ""
    }
}

async fn control_guest(cx: &ToolContext, args: &ToolArgs, params: &ControlParams) -> CallToolResult {
    let Some(guest_id) = params.guest_id.as_deref() else {
        return CallToolResult::error("guest_id is required");
    };
    let action = params.action.as_deref().unwrap_or_default();
    if !GUEST_ACTIONS.contains(&action) {
        return CallToolResult::error(format!(
            "invalid action: {action}. Use start, stop, shutdown, restart, or delete"
        ));
    }

    let snapshot = cx.providers().snapshot();
    if let Err(err) = cx.guards(TOOL, &snapshot).validate_resolved_resource(guest_id, action) {
        return err.into_result();
    }

    let Some((guest, is_container)) = snapshot.find_guest(guest_id) else {
        return CallToolResult::error(format!(
            "Could not find guest '{guest_id}': no VM or container found with ID or name '{guest_id}'"
        ));
    };

    let settings = cx.control();
    if settings.is_protected(guest.vmid, &guest.name) {
        warn!(tool = TOOL, vmid = guest.vmid, guest = %guest.name, "protected guest");
        return CallToolResult::error(format!(
            "Guest {} (VMID {}) is protected and cannot be controlled by Pulse Assistant.",
            guest.name, guest.vmid
        ));
    }

    let (tool, guest_type) = if is_container { ("pct", "lxc") } else { ("qm", "vm") };
    if action == "delete" && guest.status != "stopped" {
        return CallToolResult::error(format!(
            "Cannot delete {} (VMID {}) - it is currently {}. Stop it first, then try deleting again.",
            guest.name, guest.vmid, guest.status
        ));
    }

    let command = guest_command(tool, guest.vmid, action, params.force);
    let target_id = format!("{}:{}", guest.node, guest.vmid);
    let preapproved = cx.consume_approval(args, &command, guest_type, &target_id).await;

    let decision = if preapproved {
        PolicyDecision::Allow
    } else {
        cx.providers().policy_decision(&command)
    };
    if decision == PolicyDecision::Block {
        return CallToolResult::text(format_policy_blocked(&command, POLICY_BLOCK_REASON));
    }
    if settings.approval_reason(decision, preapproved).is_some() {
        info!(tool = TOOL, command = %command, guest = %guest.name, "guest action needs approval");
        let new = NewApproval::new(&command, guest_type, &target_id)
            .target_name(&guest.node)
            .context(format!("{action} guest {}", guest.name));
        return request_approval(cx, new, |id| {
            format_control_approval_needed(&guest.name, guest.vmid, action, &command, id)
        })
        .await;
    }

    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }
    let agents = cx.providers().connected_agents();
    let Some(agent_id) = find_agent_for_node(&snapshot, &agents, &guest.node) else {
        return CallToolResult::error(format!(
            "No agent available on node '{}'. Install Pulse Unified Agent on the Proxmox host to enable control.",
            guest.node
        ));
    };

    let out = match cx.dispatch(&agent_id, CommandPayload::host(&command)).await {
        Ok(out) => out,
        Err(err) => return dispatch_failure(err),
    };

    let mut output = out.combined();
    let mut exit_code = out.exit_code;
    if is_idempotent_noop(action, &output) {
        exit_code = 0;
        output.push_str("\n(idempotent: desired state already set)");
    }
    let output = redact_output(&output);

    let mut verification = match verify_guest_action(cx, &agent_id, tool, guest, action).await {
        Ok(v) => v,
        Err(canceled) => return dispatch_failure(canceled),
    };
    let success = exit_code == 0;
    verification["ok"] = json!(success);

    let response = json!({
        "success": success,
        "type": "guest",
        "guest": guest.name,
        "guest_id": guest.vmid.to_string(),
        "guest_type": guest_type,
        "node": guest.node,
        "action": action,
        "command": command,
        "exit_code": exit_code,
        "output": output,
        "verification": verification,
    });
    CallToolResult::json_with_is_error(&response, !success)
}

/// Probe `pct/qm status` on the same agent.  Only cancellation escapes.
async fn verify_guest_action(
    cx: &ToolContext,
    agent_id: &str,
    tool: &str,
    guest: &Guest,
    action: &str,
) -> Result<Value, DispatchError> {
    let expected = expected_state(action);
    let status_cmd = format!("{tool} status {}", guest.vmid);
    let out = match cx.dispatch(agent_id, CommandPayload::host(&status_cmd)).await {
        Ok(out) => out,
        Err(DispatchError::Canceled) => return Err(DispatchError::Canceled),
        Err(err) => {
            return Ok(json!({
                "confirmed": false,
                "method": "status",
                "command": status_cmd,
                "note": err.to_string(),
            }));
        }
    };

    let raw = format!("{}\n{}", out.stdout, out.stderr).trim().to_string();
    if action == "delete" {
        let lower = raw.to_lowercase();
        let gone = ["does not exist", "no such", "not found"].iter().any(|p| lower.contains(p));
        return Ok(json!({
            "confirmed": out.exit_code != 0 && gone,
            "method": "status",
            "command": status_cmd,
            "expected": expected,
            "raw": raw,
        }));
    }

    let observed = observed_state(&raw);
    Ok(json!({
        "confirmed": out.exit_code == 0 && !observed.is_empty() && observed == expected,
        "method": "status",
        "command": status_cmd,
        "expected": expected,
        "observed": observed,
        "raw": raw,
    }))
}
