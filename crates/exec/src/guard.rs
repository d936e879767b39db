//! Pre-dispatch guards.
//!
//! | Guard                          | Blocks when                                          |
//! |--------------------------------|------------------------------------------------------|
//! | resolved resource (strict)     | a write targets something this session never saw     |
//! | routing context                | a node is targeted while a child was just referenced |
//! | write execution context        | a guest write would land on its node's filesystem    |
//!
//! Every block is a [`GuardError`] rendered through the uniform error
//! envelope.  Soft failures come back as warnings and never stop a call.

use std::time::Duration;

use pulse_audit::Telemetry;
use pulse_safety::{classify, is_write_action};
use pulse_tools::{CallToolResult, ToolResponse};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::warn;

use crate::context::ResolvedContext;
use crate::routing::{RoutingResult, TargetType, Transport};
use crate::state::{ResourceKind, Snapshot};

pub const STRICT_RESOLUTION: &str = "STRICT_RESOLUTION";
pub const ROUTING_MISMATCH: &str = "ROUTING_MISMATCH";
pub const EXECUTION_CONTEXT_UNAVAILABLE: &str = "EXECUTION_CONTEXT_UNAVAILABLE";

const CHILD_KINDS: &[ResourceKind] = &[ResourceKind::Lxc, ResourceKind::Vm, ResourceKind::DockerContainer];

const CONTEXT_UNAVAILABLE_HINT: &str = "Cannot write files to this target. The execution context \
(container/VM) is not reachable via pct exec/qm guest exec. Verify the agent is installed on the \
host node and the target is running.";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GuardError {
    #[error(
        "Resource '{resource_id}' has not been discovered in this session. Use pulse_query or \
         pulse_discovery to find it before running '{action}'."
    )]
    StrictResolution { resource_id: String, action: String },

    #[error(
        "target_host '{target_host}' is a Proxmox node, but you have discovered more specific \
         resources on it: [{}]. Did you mean to target one of these instead?",
        more_specific_resources.join(", ")
    )]
    RoutingMismatch {
        target_host: String,
        more_specific_resources: Vec<String>,
        child_kind: ResourceKind,
    },

    #[error("{message}")]
    ExecutionContextUnavailable {
        target_host: String,
        resolved_kind: ResourceKind,
        resolved_node: String,
        transport: String,
        message: String,
    },
}

impl GuardError {
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::StrictResolution { .. } => STRICT_RESOLUTION,
            GuardError::RoutingMismatch { .. } => ROUTING_MISMATCH,
            GuardError::ExecutionContextUnavailable { .. } => EXECUTION_CONTEXT_UNAVAILABLE,
        }
    }

    pub fn auto_recoverable(&self) -> bool {
        matches!(self, GuardError::RoutingMismatch { .. })
    }

    pub fn to_tool_response(&self) -> ToolResponse {
        let mut details = Map::new();
        match self {
            GuardError::StrictResolution { resource_id, action } => {
                details.insert("resource_id".into(), json!(resource_id));
                details.insert("action".into(), json!(action));
                details.insert("auto_recoverable".into(), json!(false));
                details.insert(
                    "recovery_hint".into(),
                    json!(format!("Discover '{resource_id}' with pulse_query first, then retry.")),
                );
            }
            GuardError::RoutingMismatch {
                target_host,
                more_specific_resources,
                child_kind,
            } => {
                details.insert("target_host".into(), json!(target_host));
                details.insert("more_specific_resources".into(), json!(more_specific_resources));
                details.insert("child_kind".into(), json!(child_kind.as_str()));
                details.insert("auto_recoverable".into(), json!(true));
                let suggestion = more_specific_resources.first().map(String::as_str).unwrap_or_default();
                details.insert(
                    "recovery_hint".into(),
                    json!(format!("Retry with target_host='{suggestion}'")),
                );
            }
            GuardError::ExecutionContextUnavailable {
                target_host,
                resolved_kind,
                resolved_node,
                transport,
                ..
            } => {
                details.insert("target_host".into(), json!(target_host));
                details.insert("resolved_kind".into(), json!(resolved_kind.as_str()));
                details.insert("resolved_node".into(), json!(resolved_node));
                details.insert("transport".into(), json!(transport));
                details.insert("auto_recoverable".into(), json!(false));
                details.insert("recovery_hint".into(), json!(CONTEXT_UNAVAILABLE_HINT));
            }
        }
        ToolResponse::blocked(self.code(), self.to_string(), details)
    }

    pub fn into_result(self) -> CallToolResult {
        self.to_tool_response().into()
    }
}

/// Everything the guards look at for one invocation.
pub struct Guards<'a> {
    pub tool: &'a str,
    pub snapshot: &'a Snapshot,
    pub session: &'a ResolvedContext,
    pub strict: bool,
    pub window: Duration,
    pub telemetry: Option<&'a dyn Telemetry>,
}

/// Passed, possibly with a warning to log.
pub type Validation = Result<Option<String>, GuardError>;

impl Guards<'_> {
    /// Control verbs (`start`, `write`, …) against a named resource.
    pub fn validate_resolved_resource(&self, target: &str, action: &str) -> Validation {
        if self.session.by_alias(target).is_some() {
            return Ok(None);
        }
        if is_write_action(action) && self.strict {
            return Err(self.strict_block(target, action));
        }
        let warning = format!("resource '{target}' was not discovered in this session");
        warn!(tool = self.tool, target, action, "{warning}");
        Ok(Some(warning))
    }

    /// A shell command against a named host.  Read-only commands are only
    /// refused in strict mode when the session has discovered nothing at all.
    pub fn validate_for_exec(&self, target: &str, command: &str) -> Validation {
        if self.session.by_alias(target).is_some() {
            return Ok(None);
        }
        let intent = classify(command);
        if intent.is_write() {
            return self.validate_resolved_resource(target, "exec");
        }
        if self.strict && !self.session.has_any_resources() {
            return Err(self.strict_block(target, "exec"));
        }
        let warning = format!("resource '{target}' was not discovered in this session");
        warn!(tool = self.tool, target, reason = %intent.reason, "{warning}");
        Ok(Some(warning))
    }

    fn strict_block(&self, target: &str, action: &str) -> GuardError {
        warn!(tool = self.tool, target, action, "strict resolution block");
        if let Some(t) = self.telemetry {
            t.record_strict_resolution_block(self.tool, action);
        }
        GuardError::StrictResolution {
            resource_id: target.to_string(),
            action: action.to_string(),
        }
    }

    /// Refuse node-level targets while the model has just been looking at a
    /// guest or container on that node.  Bulk discovery does not count.
    pub fn validate_routing_context(&self, target: &str) -> Result<(), GuardError> {
        if let Some(direct) = self.session.by_alias(target) {
            if direct.kind != Some(ResourceKind::Node) {
                return Ok(());
            }
        }

        let loc = self.snapshot.resolve_resource(target);
        if !loc.is_kind(ResourceKind::Node) {
            return Ok(());
        }

        let children = self.session.recent_children_of(&loc.node, CHILD_KINDS, self.window);
        let Some(first) = children.first() else {
            return Ok(());
        };
        let child_kind = first.kind.unwrap_or(ResourceKind::Lxc);
        let names: Vec<String> = children.iter().map(|c| c.name.clone()).collect();

        warn!(tool = self.tool, target, children = ?names, "routing mismatch block");
        if let Some(t) = self.telemetry {
            t.record_routing_mismatch_block(self.tool, ResourceKind::Node.as_str(), child_kind.as_str());
        }
        Err(GuardError::RoutingMismatch {
            target_host: target.to_string(),
            more_specific_resources: names,
            child_kind,
        })
    }

    /// After routing: a guest target must be reached from inside, never by
    /// running on the node directly.
    pub fn validate_write_execution_context(&self, target: &str, routing: &RoutingResult) -> Result<(), GuardError> {
        let loc = self.snapshot.resolve_resource(target);
        let Some(kind) = loc.kind.filter(|k| loc.found && k.is_guest()) else {
            return Ok(());
        };

        if routing.transport == Transport::Direct && routing.target_type == TargetType::Host {
            warn!(
                tool = self.tool,
                target,
                resolved_kind = kind.as_str(),
                agent_host = %routing.agent_hostname,
                "write would execute on the node instead of inside the guest"
            );
            return Err(GuardError::ExecutionContextUnavailable {
                target_host: target.to_string(),
                resolved_kind: kind,
                resolved_node: loc.node.clone(),
                transport: routing.transport.as_str().to_string(),
                message: format!(
                    "'{target}' is a {kind} on node '{node}', but the write would execute on the host \
                     node instead of inside the {kind}. The file would be written to the node's \
                     filesystem, not the {kind}'s filesystem.",
                    node = loc.node
                ),
            });
        }

        if !routing.is_routed() {
            return Err(GuardError::ExecutionContextUnavailable {
                target_host: target.to_string(),
                resolved_kind: kind,
                resolved_node: loc.node.clone(),
                transport: "none".to_string(),
                message: format!(
                    "'{target}' is a {kind} on node '{node}', but no agent is available on that node. \
                     Install the Pulse Unified Agent on '{node}' to enable file operations inside the {kind}.",
                    node = loc.node
                ),
            });
        }
        Ok(())
    }
}

/// `details` value helper for handlers building their own blocked envelopes.
pub(crate) fn details(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use pulse_audit::{AuditLog, ROUTING_MISMATCH_BLOCK, STRICT_RESOLUTION_BLOCK};

    use crate::context::ResourceRegistration;
    use crate::model::{Guest, Node};

    fn snapshot() -> Snapshot {
        Snapshot {
            nodes: vec![Node {
                id: "node-pve1".into(),
                name: "pve1".into(),
                status: "online".into(),
                ..Default::default()
            }],
            containers: vec![Guest {
                id: "pve1-141".into(),
                vmid: 141,
                name: "jellyfin".into(),
                node: "pve1".into(),
                status: "running".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn jellyfin() -> ResourceRegistration {
        ResourceRegistration::new(ResourceKind::Lxc, "141", "jellyfin")
            .node("pve1")
            .vmid(141)
    }

    fn guards<'a>(snap: &'a Snapshot, ctx: &'a ResolvedContext, strict: bool, log: &'a AuditLog) -> Guards<'a> {
        Guards {
            tool: "pulse_control",
            snapshot: snap,
            session: ctx,
            strict,
            window: Duration::from_secs(30),
            telemetry: Some(log),
        }
    }

    // ── Strict resolution ───────────────────────────────────────────────────

    #[test]
    fn strict_blocks_undiscovered_write() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let err = guards(&snap, &ctx, true, &log)
            .validate_resolved_resource("nginx", "restart")
            .unwrap_err();
        assert_eq!(err.code(), STRICT_RESOLUTION);
        assert_eq!(log.count(STRICT_RESOLUTION_BLOCK), 1);

        let resp = err.to_tool_response();
        assert!(!resp.ok);
        let e = resp.error.unwrap();
        assert_eq!(e.details["resource_id"], "nginx");
        assert_eq!(e.details["action"], "restart");
    }

    #[test]
    fn non_strict_only_warns() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let warning = guards(&snap, &ctx, false, &log)
            .validate_resolved_resource("nginx", "restart")
            .unwrap();
        assert!(warning.is_some());
        assert_eq!(log.count(STRICT_RESOLUTION_BLOCK), 0);
    }

    #[test]
    fn discovered_resource_passes() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        ctx.add_resolved_resource(jellyfin());
        let g = guards(&snap, &ctx, true, &log);
        assert_eq!(g.validate_resolved_resource("jellyfin", "stop"), Ok(None));
        assert_eq!(g.validate_for_exec("jellyfin", "rm -rf /tmp/x"), Ok(None));
    }

    #[test]
    fn read_only_exec_blocked_only_in_empty_strict_session() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let strict = guards(&snap, &ctx, true, &log);
        assert_eq!(strict.validate_for_exec("unknown", "ls /").unwrap_err().code(), STRICT_RESOLUTION);

        ctx.add_resolved_resource(jellyfin());
        assert!(strict.validate_for_exec("unknown", "ls /").unwrap().is_some());
        assert_eq!(
            strict.validate_for_exec("unknown", "systemctl restart nginx").unwrap_err().code(),
            STRICT_RESOLUTION
        );

        let lax = guards(&snap, &ctx, false, &log);
        assert!(lax.validate_for_exec("unknown", "systemctl restart nginx").unwrap().is_some());
    }

    // ── Routing context ─────────────────────────────────────────────────────

    #[test]
    fn recently_referenced_child_blocks_node_target() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let id = ctx.add_resolved_resource(jellyfin());
        ctx.mark_explicit_access(&id);

        let err = guards(&snap, &ctx, false, &log).validate_routing_context("pve1").unwrap_err();
        assert_eq!(err.code(), ROUTING_MISMATCH);
        assert!(err.auto_recoverable());
        assert_eq!(log.count(ROUTING_MISMATCH_BLOCK), 1);

        let e = err.to_tool_response().error.unwrap();
        assert_eq!(e.auto_recoverable, Some(true));
        assert_eq!(e.details["more_specific_resources"], json!(["jellyfin"]));
        assert!(e.recovery_hint.unwrap().contains("jellyfin"));
        assert!(e.message.contains("[jellyfin]"));
    }

    #[test]
    fn bulk_discovery_does_not_block_node_target() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        ctx.add_resolved_resource(jellyfin());
        assert_eq!(guards(&snap, &ctx, false, &log).validate_routing_context("pve1"), Ok(()));
    }

    #[test]
    fn stale_reference_does_not_block() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let id = ctx.add_resolved_resource(jellyfin());
        let old = Instant::now().checked_sub(Duration::from_secs(120)).unwrap();
        ctx.mark_explicit_access_at(&id, old);
        assert_eq!(guards(&snap, &ctx, false, &log).validate_routing_context("pve1"), Ok(()));
    }

    #[test]
    fn targeting_the_child_itself_passes() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let id = ctx.add_resolved_resource(jellyfin());
        ctx.mark_explicit_access(&id);
        assert_eq!(guards(&snap, &ctx, false, &log).validate_routing_context("jellyfin"), Ok(()));
    }

    // ── Write execution context ─────────────────────────────────────────────

    #[test]
    fn direct_transport_to_guest_is_refused() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let routing = RoutingResult {
            agent_id: "agent-jellyfin".into(),
            agent_hostname: "jellyfin".into(),
            resolved_kind: Some(ResourceKind::Host),
            ..Default::default()
        };
        let err = guards(&snap, &ctx, false, &log)
            .validate_write_execution_context("jellyfin", &routing)
            .unwrap_err();
        assert_eq!(err.code(), EXECUTION_CONTEXT_UNAVAILABLE);
        let e = err.to_tool_response().error.unwrap();
        assert_eq!(e.auto_recoverable, Some(false));
        assert_eq!(e.details["resolved_kind"], "lxc");
        assert_eq!(e.details["transport"], "direct");
    }

    #[test]
    fn unrouted_guest_reports_no_transport() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let routing = RoutingResult {
            target_type: TargetType::Container,
            transport: Transport::PctExec,
            target_id: "141".into(),
            ..Default::default()
        };
        let err = guards(&snap, &ctx, false, &log)
            .validate_write_execution_context("jellyfin", &routing)
            .unwrap_err();
        assert_eq!(err.to_tool_response().error.unwrap().details["transport"], "none");
    }

    #[test]
    fn pct_exec_and_plain_hosts_pass() {
        let (snap, ctx, log) = (snapshot(), ResolvedContext::new("s"), AuditLog::new());
        let g = guards(&snap, &ctx, false, &log);
        let inside = RoutingResult {
            agent_id: "agent-pve1".into(),
            target_type: TargetType::Container,
            transport: Transport::PctExec,
            target_id: "141".into(),
            ..Default::default()
        };
        assert_eq!(g.validate_write_execution_context("jellyfin", &inside), Ok(()));
        assert_eq!(g.validate_write_execution_context("pve1", &RoutingResult::default()), Ok(()));
        assert_eq!(g.validate_write_execution_context("raspberrypi", &RoutingResult::default()), Ok(()));
    }
}
