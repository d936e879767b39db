//! The twelve `pulse_*` tools and the response helpers they share.
//!
//! | Tool               | Needs                                   | Access |
//! |--------------------|-----------------------------------------|--------|
//! | `pulse_query`      | state                                   | mixed  |
//! | `pulse_metrics`    | state or metrics history                | read   |
//! | `pulse_storage`    | state, unified, backups or disk health  | read   |
//! | `pulse_docker`     | state or updates                        | mixed  |
//! | `pulse_kubernetes` | state                                   | mixed  |
//! | `pulse_alerts`     | findings or state                       | mixed  |
//! | `pulse_read`       | agents                                  | read   |
//! | `pulse_control`    | agents and state                        | write  |
//! | `pulse_file_edit`  | agents                                  | mixed  |
//! | `pulse_discovery`  | discovery                               | read   |
//! | `pulse_knowledge`  | knowledge                               | mixed  |
//! | `pulse_pmg`        | state                                   | read   |

pub mod alerts;
pub mod control;
pub mod discovery;
pub mod docker;
pub mod file_edit;
pub mod knowledge;
pub mod kubernetes;
pub mod metrics;
pub mod pmg;
pub mod query;
pub mod read;
pub mod storage;

use pulse_approval::NewApproval;
use pulse_config::ControlLevel;
use pulse_safety::redact_sensitive_text;
use pulse_tools::{ArgError, CallToolResult, ToolRegistry};
use serde_json::{Value, json};
use tracing::warn;

use crate::executor::ToolContext;
use crate::providers::ConnectedAgent;
use crate::routing::format_agent_list;

const MAX_LISTED_AGENTS: usize = 6;

const HOW_TO_APPROVE_COMMAND: &str = "Click the approval button in the chat to execute this command.";
const HOW_TO_APPROVE_ACTION: &str = "Click the approval button in the chat to execute this action.";

/// Register every tool in listing order.
pub fn register_all(registry: &mut ToolRegistry<ToolContext>) {
    registry.register(Box::new(query::QueryTool));
    registry.register(Box::new(metrics::MetricsTool));
    registry.register(Box::new(storage::StorageTool));
    registry.register(Box::new(docker::DockerTool));
    registry.register(Box::new(kubernetes::KubernetesTool));
    registry.register(Box::new(alerts::AlertsTool));
    registry.register(Box::new(read::ReadTool));
    registry.register(Box::new(control::ControlTool));
    registry.register(Box::new(file_edit::FileEditTool));
    registry.register(Box::new(discovery::DiscoveryTool));
    registry.register(Box::new(knowledge::KnowledgeTool));
    registry.register(Box::new(pmg::PmgTool));
}

// ── Argument and output helpers ──────────────────────────────────────────────

pub(crate) fn bad_args(err: ArgError) -> CallToolResult {
    CallToolResult::error(err)
}

/// Handler-level refusal of a write action at `read_only`.
pub(crate) fn read_only_refusal(tool: &str, action: &str) -> CallToolResult {
    warn!(tool, action, "write action refused at read_only");
    CallToolResult::error(format!(
        "{action} is not available: control level is read_only. Use read actions only."
    ))
}

pub(crate) fn writes_allowed(cx: &ToolContext) -> bool {
    cx.control().level != ControlLevel::ReadOnly
}

/// Secrets replaced, with a trailing count when anything was found.
pub(crate) fn redact_output(output: &str) -> String {
    let (redacted, n) = redact_sensitive_text(output);
    if n == 0 {
        return redacted;
    }
    format!("{redacted}\n\n[redacted {n} sensitive value(s)]")
}

pub(crate) fn truncate_for_display(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

/// Empty `Vec`s render as `[]`, never `null`.
pub(crate) fn json_result(value: Value) -> CallToolResult {
    CallToolResult::json(&value)
}

// ── Approval and policy text ─────────────────────────────────────────────────

fn prefixed(prefix: &str, payload: Value) -> String {
    format!("{prefix}: {payload}")
}

pub(crate) fn format_approval_needed(command: &str, reason: &str, approval_id: &str) -> String {
    prefixed(
        "APPROVAL_REQUIRED",
        json!({
            "type": "approval_required",
            "approval_id": approval_id,
            "command": command,
            "reason": reason,
            "how_to_approve": HOW_TO_APPROVE_COMMAND,
            "do_not_retry": true,
        }),
    )
}

pub(crate) fn format_policy_blocked(command: &str, reason: &str) -> String {
    prefixed(
        "POLICY_BLOCKED",
        json!({
            "type": "policy_blocked",
            "command": command,
            "reason": reason,
            "do_not_retry": true,
        }),
    )
}

pub(crate) fn format_control_approval_needed(
    guest_name: &str,
    vmid: u32,
    action: &str,
    command: &str,
    approval_id: &str,
) -> String {
    prefixed(
        "APPROVAL_REQUIRED",
        json!({
            "type": "approval_required",
            "approval_id": approval_id,
            "guest_name": guest_name,
            "guest_vmid": vmid,
            "action": action,
            "command": command,
            "how_to_approve": HOW_TO_APPROVE_ACTION,
            "do_not_retry": true,
        }),
    )
}

pub(crate) fn format_docker_approval_needed(
    container: &str,
    host: &str,
    action: &str,
    command: &str,
    approval_id: &str,
) -> String {
    prefixed(
        "APPROVAL_REQUIRED",
        json!({
            "type": "approval_required",
            "approval_id": approval_id,
            "container_name": container,
            "docker_host": host,
            "action": action,
            "command": command,
            "how_to_approve": HOW_TO_APPROVE_ACTION,
            "do_not_retry": true,
        }),
    )
}

pub(crate) fn format_file_approval_needed(path: &str, host: &str, action: &str, size: usize, approval_id: &str) -> String {
    prefixed(
        "APPROVAL_REQUIRED",
        json!({
            "type": "approval_required",
            "approval_id": approval_id,
            "action": format!("file_{action}"),
            "path": path,
            "host": host,
            "size": size,
            "message": format!("File {action} operation requires approval"),
            "how_to_approve": HOW_TO_APPROVE_ACTION,
            "do_not_retry": true,
        }),
    )
}

pub(crate) fn format_target_host_required(agents: &[ConnectedAgent]) -> String {
    match format_agent_list(agents, MAX_LISTED_AGENTS) {
        Some(list) => format!("Multiple agents are connected. Please specify target_host. Available: {list}"),
        None => "Multiple agents are connected. Please specify target_host.".to_string(),
    }
}

pub(crate) fn format_available_agent_hosts(agents: &[ConnectedAgent]) -> String {
    match format_agent_list(agents, MAX_LISTED_AGENTS) {
        Some(list) => format!("Available targets: {list}"),
        None => "No agents are currently connected.".to_string(),
    }
}

/// Record a pending approval and render the text that asks for it.
pub(crate) async fn request_approval(
    cx: &ToolContext,
    new: NewApproval,
    render: impl FnOnce(&str) -> String,
) -> CallToolResult {
    match cx.request_approval(new).await {
        Ok(id) => CallToolResult::text(render(&id)),
        Err(err) => CallToolResult::error(format!("failed to create approval request: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents(n: usize) -> Vec<ConnectedAgent> {
        (0..n)
            .map(|i| ConnectedAgent {
                agent_id: format!("agent-{i}"),
                hostname: format!("host{i}"),
                capabilities: vec![],
            })
            .collect()
    }

    #[test]
    fn approval_text_is_prefixed_json() {
        let text = format_approval_needed("qm stop 101", "Control level requires approval", "abc");
        let body = text.strip_prefix("APPROVAL_REQUIRED: ").unwrap();
        let v: Value = serde_json::from_str(body).unwrap();
        assert_eq!(v["approval_id"], "abc");
        assert_eq!(v["do_not_retry"], true);

        let blocked = format_policy_blocked("rm -rf /", "denied");
        assert!(blocked.starts_with("POLICY_BLOCKED: "));
        assert!(!blocked.contains("approval_id"));
    }

    #[test]
    fn target_host_required_lists_at_most_six() {
        let msg = format_target_host_required(&agents(8));
        assert!(msg.starts_with("Multiple agents are connected. Please specify target_host. Available: host0"));
        assert!(msg.ends_with("host5 (+2 more)"));
        assert_eq!(
            format_target_host_required(&[]),
            "Multiple agents are connected. Please specify target_host."
        );
        assert_eq!(format_available_agent_hosts(&[]), "No agents are currently connected.");
    }

    #[test]
    fn redaction_appends_count() {
        assert_eq!(redact_output("load average: 0.1"), "load average: 0.1");
        let out = redact_output("password=hunter2 ok");
        assert!(!out.contains("hunter2"));
        assert!(out.ends_with("[redacted 1 sensitive value(s)]"));
    }

    #[test]
    fn display_truncation_marks_cut() {
        assert_eq!(truncate_for_display("abcdef", 3), "abc...");
        assert_eq!(truncate_for_display("abc", 3), "abc");
    }
}
