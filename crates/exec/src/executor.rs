//! The executor: owns the tool registry and the shared collaborators, and
//! runs one invocation at a time against a caller-supplied session.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use pulse_approval::{ApprovalError, ApprovalStore, NewApproval};
use pulse_audit::Telemetry;
use pulse_config::{ControlLevel, PulseConfig};
use pulse_tools::{CallToolResult, ToolAccess, ToolArgs, ToolRegistry, ToolResponse, ToolSpec};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ResolvedContext;
use crate::guard::{Guards, details};
use crate::providers::{CommandOutput, CommandPayload, DispatchError, PolicyDecision, Providers};
use crate::state::Snapshot;
use crate::tools;

pub const CANCELED: &str = "CANCELED";

// ── Control settings ─────────────────────────────────────────────────────────

/// Replaced wholesale; each gate reads the value current at its entry.
#[derive(Debug, Clone, Default)]
pub struct ControlSettings {
    pub level: ControlLevel,
    pub protected_guests: Vec<String>,
}

impl ControlSettings {
    pub fn is_protected(&self, vmid: u32, name: &str) -> bool {
        let id = vmid.to_string();
        self.protected_guests
            .iter()
            .any(|g| *g == id || (!name.is_empty() && g == name))
    }

    /// Why a write needs a human first, or `None` when it can run.
    pub fn approval_reason(&self, decision: PolicyDecision, preapproved: bool) -> Option<&'static str> {
        if preapproved {
            return None;
        }
        if self.level == ControlLevel::Controlled {
            return Some("Control level requires approval");
        }
        if decision == PolicyDecision::RequireApproval && self.level != ControlLevel::Autonomous {
            return Some("Security policy requires approval");
        }
        None
    }
}

// ── Core ─────────────────────────────────────────────────────────────────────

/// Process-wide collaborators shared by every invocation.
pub struct Core {
    pub providers: Providers,
    control: RwLock<ControlSettings>,
    strict_resolution: bool,
    recent_access_window: Duration,
    approvals: Arc<ApprovalStore>,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl Core {
    pub fn new(config: &PulseConfig, providers: Providers) -> Self {
        Self {
            providers,
            control: RwLock::new(ControlSettings {
                level: config.control.control_level,
                protected_guests: config.control.protected_guests.clone(),
            }),
            strict_resolution: config.control.strict_resolution,
            recent_access_window: config.routing.recent_access_window(),
            approvals: Arc::new(ApprovalStore::new(&config.approval)),
            telemetry: None,
        }
    }

    /// Share an approval store with other components (the approval UI).
    pub fn with_approvals(mut self, approvals: Arc<ApprovalStore>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn control(&self) -> ControlSettings {
        self.control.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_control(&self, settings: ControlSettings) {
        *self.control.write().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub fn strict_resolution(&self) -> bool {
        self.strict_resolution
    }

    pub fn recent_access_window(&self) -> Duration {
        self.recent_access_window
    }

    pub fn approvals(&self) -> &Arc<ApprovalStore> {
        &self.approvals
    }

    pub fn telemetry(&self) -> Option<&dyn Telemetry> {
        self.telemetry.as_deref()
    }
}

// ── Per-invocation context ───────────────────────────────────────────────────

/// What a tool handler receives.
#[derive(Clone)]
pub struct ToolContext {
    pub core: Arc<Core>,
    pub session: Arc<ResolvedContext>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn providers(&self) -> &Providers {
        &self.core.providers
    }

    pub fn control(&self) -> ControlSettings {
        self.core.control()
    }

    pub fn guards<'a>(&'a self, tool: &'a str, snapshot: &'a Snapshot) -> Guards<'a> {
        Guards {
            tool,
            snapshot,
            session: &self.session,
            strict: self.core.strict_resolution,
            window: self.core.recent_access_window,
            telemetry: self.core.telemetry(),
        }
    }

    /// Run a command on an agent, giving up as soon as the caller cancels.
    pub async fn dispatch(&self, agent_id: &str, payload: CommandPayload) -> Result<CommandOutput, DispatchError> {
        let Some(agents) = self.core.providers.agents.as_ref() else {
            return Err(DispatchError::AgentUnavailable(agent_id.to_string()));
        };
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Canceled);
        }
        info!(
            agent_id,
            target_type = %payload.target_type,
            target_id = %payload.target_id,
            command = truncate(&payload.command, 80),
            "dispatching command"
        );
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DispatchError::Canceled),
            res = agents.execute_command(agent_id, payload) => res,
        }
    }

    /// Spend `_approval_id` on exactly this command and target.
    pub async fn consume_approval(&self, args: &ToolArgs, command: &str, target_type: &str, target_id: &str) -> bool {
        let Some(id) = args.approval_id() else {
            return false;
        };
        match self.core.approvals.consume(id, command, target_type, target_id).await {
            Ok(_) => true,
            Err(err) => {
                warn!(approval_id = id, %err, "failed to consume approval");
                false
            }
        }
    }

    pub async fn request_approval(&self, new: NewApproval) -> Result<String, ApprovalError> {
        let req = self.core.approvals.create(new).await?;
        debug!(approval_id = %req.id, command = %req.command, "approval requested");
        Ok(req.id)
    }
}

/// Envelope for a failed dispatch.  Cancellation is structured so the agent
/// loop can tell it apart from a transport fault; neither is retried.
pub fn dispatch_failure(err: DispatchError) -> CallToolResult {
    match err {
        DispatchError::Canceled => ToolResponse::failed(
            CANCELED,
            "The operation was canceled before it completed.",
            details(&[("auto_recoverable", Value::Bool(false))]),
        )
        .into(),
        other => CallToolResult::error(other),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

// ── Executor ─────────────────────────────────────────────────────────────────

pub struct Executor {
    core: Arc<Core>,
    registry: ToolRegistry<ToolContext>,
}

impl Executor {
    pub fn new(core: Core) -> Self {
        let mut registry = ToolRegistry::default();
        tools::register_all(&mut registry);
        Self {
            core: Arc::new(core),
            registry,
        }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn approvals(&self) -> &Arc<ApprovalStore> {
        self.core.approvals()
    }

    pub fn set_control_level(&self, level: ControlLevel) {
        let mut settings = self.core.control();
        settings.level = level;
        self.core.set_control(settings);
    }

    pub fn set_protected_guests(&self, guests: Vec<String>) {
        let mut settings = self.core.control();
        settings.protected_guests = guests;
        self.core.set_control(settings);
    }

    fn context(&self, session: Arc<ResolvedContext>, cancel: CancellationToken) -> ToolContext {
        ToolContext {
            core: Arc::clone(&self.core),
            session,
            cancel,
        }
    }

    /// Tools whose providers are present, minus control tools at `read_only`.
    pub fn list_tools(&self) -> Vec<ToolSpec> {
        let cx = self.context(Arc::new(ResolvedContext::default()), CancellationToken::new());
        let allow_control = self.core.control().level.allows_writes();
        self.registry.available_specs(&cx, allow_control)
    }

    /// Every registered tool regardless of providers.
    pub fn all_tools(&self) -> Vec<ToolSpec> {
        self.registry.list_specs()
    }

    pub async fn execute_tool(
        &self,
        session: Arc<ResolvedContext>,
        name: &str,
        args: ToolArgs,
        cancel: CancellationToken,
    ) -> CallToolResult {
        let cx = self.context(session, cancel);

        let Some(tool) = self.registry.get(name) else {
            return CallToolResult::error(format!("tool not available: {name}"));
        };
        if !tool.is_available(&cx) {
            return CallToolResult::error(format!("tool not available: {name}"));
        }

        let spec = tool.spec();
        let level = cx.control().level;
        if !level.allows_writes() && spec.metadata.require_control && spec.metadata.access == ToolAccess::Write {
            warn!(tool = name, "write tool refused at read_only");
            return CallToolResult::error(format!(
                "{name} is not available: control level is read_only. Ask an administrator to enable control."
            ));
        }

        debug!(tool = name, session = cx.session.session_id(), "executing tool");
        let result = tool.call(&cx, &args).await;
        if result.is_error {
            debug!(tool = name, "tool returned an error result");
        }
        result
    }

    /// [`execute_tool`](Self::execute_tool), retried once with the suggested
    /// rewrite when the first attempt is blocked as auto-recoverable.  A
    /// failed retry returns the original block.
    pub async fn execute_with_recovery(
        &self,
        session: Arc<ResolvedContext>,
        name: &str,
        args: ToolArgs,
        cancel: CancellationToken,
    ) -> CallToolResult {
        let first = self
            .execute_tool(Arc::clone(&session), name, args.clone(), cancel.clone())
            .await;
        if args.bool(AUTO_RECOVERY_ARG) {
            return first;
        }
        let Some((code, rewrite)) = recoverable_rewrite(&first) else {
            return first;
        };

        info!(tool = name, code = %code, rewrite = %rewrite, "retrying with suggested rewrite");
        if let Some(t) = self.core.telemetry() {
            t.record_auto_recovery_attempt(&code, name);
        }
        let retry_args = args.with("command", rewrite).with(AUTO_RECOVERY_ARG, true);
        let retry = self.execute_tool(session, name, retry_args, cancel).await;
        if retry.is_error {
            warn!(tool = name, code = %code, "auto-recovery retry failed");
            return first;
        }
        if let Some(t) = self.core.telemetry() {
            t.record_auto_recovery_success(&code, name);
        }
        retry
    }
}

/// Marks a retried invocation so it is never retried again.
pub const AUTO_RECOVERY_ARG: &str = "_auto_recovery_attempt";

/// Error code and rewritten command of an auto-recoverable block.
fn recoverable_rewrite(result: &CallToolResult) -> Option<(String, String)> {
    if !result.is_error {
        return None;
    }
    let body = result.json_content()?;
    let error = body.get("error")?;
    if error.get("auto_recoverable").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let code = error.get("code")?.as_str()?.to_string();
    let rewrite = error.get("details")?.get("suggested_rewrite")?.as_str()?.to_string();
    Some((code, rewrite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::context::ResourceRegistration;
    use crate::guard::STRICT_RESOLUTION;
    use crate::model::{Guest, Node};
    use crate::providers::{AgentServer, ConnectedAgent, StateProvider};
    use crate::state::ResourceKind;

    // ── Mock providers ───────────────────────────────────────────────────────

    struct FixedState(Arc<Snapshot>);

    impl StateProvider for FixedState {
        fn snapshot(&self) -> Arc<Snapshot> {
            Arc::clone(&self.0)
        }
    }

    type Responder = fn(&CommandPayload) -> CommandOutput;

    struct RecordingAgents {
        agents: Vec<ConnectedAgent>,
        respond: Responder,
        calls: Mutex<Vec<(String, CommandPayload)>>,
    }

    impl RecordingAgents {
        fn new(hostnames: &[&str], respond: Responder) -> Arc<Self> {
            Arc::new(Self {
                agents: hostnames
                    .iter()
                    .map(|h| ConnectedAgent {
                        agent_id: format!("agent-{h}"),
                        hostname: h.to_string(),
                        capabilities: vec![],
                    })
                    .collect(),
                respond,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, CommandPayload)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentServer for RecordingAgents {
        fn connected_agents(&self) -> Vec<ConnectedAgent> {
            self.agents.clone()
        }

        async fn execute_command(
            &self,
            agent_id: &str,
            payload: CommandPayload,
        ) -> Result<CommandOutput, DispatchError> {
            let out = (self.respond)(&payload);
            self.calls.lock().unwrap().push((agent_id.to_string(), payload));
            Ok(out)
        }
    }

    fn ok_output(_: &CommandPayload) -> CommandOutput {
        CommandOutput {
            stdout: "ok".into(),
            ..Default::default()
        }
    }

    fn node(name: &str) -> Node {
        Node {
            id: format!("node/{name}"),
            name: name.into(),
            status: "online".into(),
            ..Default::default()
        }
    }

    fn guest(vmid: u32, name: &str, node: &str, status: &str) -> Guest {
        Guest {
            id: format!("{node}/{vmid}"),
            vmid,
            name: name.into(),
            node: node.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    fn executor(
        snapshot: Snapshot,
        agents: &Arc<RecordingAgents>,
        level: ControlLevel,
        strict: bool,
    ) -> Executor {
        let mut config = PulseConfig::default();
        config.control.control_level = level;
        config.control.strict_resolution = strict;
        let providers = Providers {
            state: Some(Arc::new(FixedState(Arc::new(snapshot)))),
            agents: Some(Arc::clone(agents) as Arc<dyn AgentServer>),
            ..Default::default()
        };
        Executor::new(Core::new(&config, providers))
    }

    fn args(value: Value) -> ToolArgs {
        ToolArgs::from_value(value).unwrap()
    }

    async fn run(exec: &Executor, session: &Arc<ResolvedContext>, name: &str, value: Value) -> CallToolResult {
        exec.execute_tool(Arc::clone(session), name, args(value), CancellationToken::new())
            .await
    }

    fn error_code(result: &CallToolResult) -> Option<String> {
        result.json_content()?["error"]["code"].as_str().map(str::to_string)
    }

    fn approval_id(result: &CallToolResult) -> String {
        let text = result.text_content();
        let body = text.strip_prefix("APPROVAL_REQUIRED: ").unwrap();
        let v: Value = serde_json::from_str(body).unwrap();
        v["approval_id"].as_str().unwrap().to_string()
    }

    // ── Scenarios ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn topology_wins_over_hostname_collision() {
        let snapshot = Snapshot {
            nodes: vec![node("delly")],
            containers: vec![guest(141, "homepage-docker", "delly", "running")],
            ..Default::default()
        };
        let agents = RecordingAgents::new(&["delly", "homepage-docker"], ok_output);
        let exec = executor(snapshot, &agents, ControlLevel::Autonomous, false);
        let session = Arc::new(ResolvedContext::new("s1"));

        let result = run(
            &exec,
            &session,
            "pulse_control",
            json!({"type": "command", "command": "uptime", "target_host": "homepage-docker"}),
        )
        .await;
        assert!(!result.is_error, "{}", result.text_content());

        let calls = agents.calls();
        assert_eq!(calls.len(), 1);
        let (agent_id, payload) = &calls[0];
        assert_eq!(agent_id, "agent-delly");
        assert_eq!(payload.target_type, "container");
        assert_eq!(payload.target_id, "141");

        let body = result.json_content().unwrap();
        assert_eq!(body["execution"]["transport"], "pct_exec");
    }

    #[tokio::test]
    async fn approval_round_trip_is_single_use() {
        let snapshot = Snapshot {
            nodes: vec![node("pve1")],
            vms: vec![guest(101, "vm101", "pve1", "running")],
            ..Default::default()
        };
        let agents = RecordingAgents::new(&["pve1"], |p| {
            if p.command.starts_with("qm status") {
                CommandOutput {
                    stdout: "status: stopped".into(),
                    ..Default::default()
                }
            } else {
                CommandOutput::default()
            }
        });
        let exec = executor(snapshot, &agents, ControlLevel::Controlled, false);
        let session = Arc::new(ResolvedContext::new("s2"));
        let stop = json!({"type": "guest", "guest_id": "vm101", "action": "stop"});

        let first = run(&exec, &session, "pulse_control", stop.clone()).await;
        let id = approval_id(&first);
        assert!(agents.calls().is_empty());

        exec.approvals().approve(&id, "admin").await.unwrap();
        let mut approved = stop.clone();
        approved["_approval_id"] = json!(id);

        let second = run(&exec, &session, "pulse_control", approved.clone()).await;
        assert!(!second.is_error, "{}", second.text_content());
        let commands: Vec<String> = agents.calls().into_iter().map(|(_, p)| p.command).collect();
        assert_eq!(commands, vec!["qm stop 101", "qm status 101"]);

        let third = run(&exec, &session, "pulse_control", approved).await;
        assert!(third.text_content().starts_with("APPROVAL_REQUIRED: "));
        assert_ne!(approval_id(&third), id);
        assert_eq!(agents.calls().len(), 2);
    }

    #[tokio::test]
    async fn strict_mode_blocks_unknown_target() {
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(Snapshot::default(), &agents, ControlLevel::Autonomous, true);
        let session = Arc::new(ResolvedContext::new("s3"));

        let result = run(
            &exec,
            &session,
            "pulse_control",
            json!({"type": "command", "command": "ls /", "target_host": "unknown"}),
        )
        .await;
        assert!(result.is_error);
        let body = result.json_content().unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], STRICT_RESOLUTION);
        assert!(agents.calls().is_empty());
    }

    #[tokio::test]
    async fn strict_mode_blocks_every_write_tool() {
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let snapshot = Snapshot {
            nodes: vec![node("pve1")],
            vms: vec![guest(101, "vm101", "pve1", "running")],
            ..Default::default()
        };
        let exec = executor(snapshot, &agents, ControlLevel::Autonomous, true);
        let session = Arc::new(ResolvedContext::new("p10"));

        let writes = [
            ("pulse_control", json!({"type": "command", "command": "touch /tmp/x", "target_host": "pve1"})),
            ("pulse_control", json!({"type": "guest", "guest_id": "vm101", "action": "stop"})),
            (
                "pulse_file_edit",
                json!({"action": "write", "path": "/tmp/x", "content": "x", "target_host": "pve1"}),
            ),
        ];
        for (tool, value) in writes {
            let result = run(&exec, &session, tool, value).await;
            assert_eq!(error_code(&result).as_deref(), Some(STRICT_RESOLUTION), "{tool}");
        }
        assert!(agents.calls().is_empty());
    }

    #[tokio::test]
    async fn recent_child_reference_blocks_node_target() {
        let snapshot = Snapshot {
            nodes: vec![node("pve1")],
            containers: vec![guest(120, "jellyfin", "pve1", "running")],
            ..Default::default()
        };
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(snapshot, &agents, ControlLevel::Autonomous, false);
        let session = Arc::new(ResolvedContext::new("s4"));
        let id = session.add_resolved_resource(
            ResourceRegistration::new(ResourceKind::Lxc, "120", "jellyfin")
                .node("pve1")
                .vmid(120),
        );
        session.mark_explicit_access(&id);

        let result = run(
            &exec,
            &session,
            "pulse_control",
            json!({"type": "command", "command": "systemctl restart jellyfin", "target_host": "pve1"}),
        )
        .await;
        let body = result.json_content().unwrap();
        assert_eq!(body["error"]["code"], "ROUTING_MISMATCH");
        assert_eq!(body["error"]["auto_recoverable"], true);
        assert_eq!(body["error"]["details"]["more_specific_resources"], json!(["jellyfin"]));
        assert!(body["error"]["recovery_hint"].as_str().unwrap().contains("jellyfin"));
        assert!(agents.calls().is_empty());
    }

    #[tokio::test]
    async fn bulk_discovery_does_not_block_node_target() {
        let snapshot = Snapshot {
            nodes: vec![node("pve1")],
            containers: vec![guest(120, "jellyfin", "pve1", "running")],
            ..Default::default()
        };
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(snapshot, &agents, ControlLevel::Autonomous, false);
        let session = Arc::new(ResolvedContext::new("p12"));
        session.add_resolved_resource(
            ResourceRegistration::new(ResourceKind::Lxc, "120", "jellyfin")
                .node("pve1")
                .vmid(120),
        );

        let result = run(
            &exec,
            &session,
            "pulse_control",
            json!({"type": "command", "command": "apt-get update", "target_host": "pve1"}),
        )
        .await;
        assert!(!result.is_error, "{}", result.text_content());
        assert_eq!(agents.calls().len(), 1);
        assert_eq!(agents.calls()[0].1.target_type, "host");
    }

    #[tokio::test]
    async fn stopping_a_stopped_guest_is_idempotent() {
        let snapshot = Snapshot {
            nodes: vec![node("pve1")],
            containers: vec![guest(201, "ct201", "pve1", "stopped")],
            ..Default::default()
        };
        let agents = RecordingAgents::new(&["pve1"], |p| {
            if p.command == "pct stop 201" {
                CommandOutput {
                    stderr: "CT 201 not running".into(),
                    exit_code: 255,
                    ..Default::default()
                }
            } else {
                CommandOutput {
                    stdout: "status: stopped".into(),
                    ..Default::default()
                }
            }
        });
        let exec = executor(snapshot, &agents, ControlLevel::Autonomous, false);
        let session = Arc::new(ResolvedContext::new("s5"));

        let result = run(
            &exec,
            &session,
            "pulse_control",
            json!({"type": "guest", "guest_id": "ct201", "action": "stop"}),
        )
        .await;
        assert!(!result.is_error, "{}", result.text_content());
        let body = result.json_content().unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["exit_code"], 0);
        assert!(body["output"].as_str().unwrap().contains("(idempotent"));
        assert_eq!(body["verification"]["observed"], "stopped");
        assert_eq!(body["verification"]["ok"], true);
    }

    #[tokio::test]
    async fn sql_select_is_dispatched_by_read_tool() {
        let command = r#"sqlite3 /data/app.db "SELECT Name FROM t ORDER BY Date DESC LIMIT 1;""#;
        assert_eq!(pulse_safety::classify(command).tag(), pulse_safety::tags::SQL_READONLY);

        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(Snapshot::default(), &agents, ControlLevel::ReadOnly, false);
        let session = Arc::new(ResolvedContext::new("s6"));

        let result = run(
            &exec,
            &session,
            "pulse_read",
            json!({"action": "exec", "command": command, "target_host": "pve1"}),
        )
        .await;
        assert_eq!(result.text_content(), "ok");
        assert_eq!(agents.calls()[0].1.command, command);
    }

    // ── Listing and gating ───────────────────────────────────────────────────

    #[tokio::test]
    async fn canceled_invocation_never_dispatches() {
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(Snapshot::default(), &agents, ControlLevel::Autonomous, false);
        let session = Arc::new(ResolvedContext::new("cancel"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = exec
            .execute_tool(
                session,
                "pulse_control",
                args(json!({"type": "command", "command": "uptime", "target_host": "pve1"})),
                cancel,
            )
            .await;
        assert_eq!(error_code(&result).as_deref(), Some(CANCELED));
        assert!(agents.calls().is_empty());
    }

    #[test]
    fn read_only_hides_control_tools() {
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(Snapshot::default(), &agents, ControlLevel::ReadOnly, false);
        let names: Vec<String> = exec.list_tools().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"pulse_read".to_string()));
        assert!(!names.contains(&"pulse_control".to_string()));
        assert!(!names.contains(&"pulse_file_edit".to_string()));
        // No metrics, backups or discovery providers.
        assert!(!names.contains(&"pulse_discovery".to_string()));

        exec.set_control_level(ControlLevel::Controlled);
        let names: Vec<String> = exec.list_tools().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"pulse_control".to_string()));
    }

    #[tokio::test]
    async fn read_only_refuses_control_calls() {
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let exec = executor(Snapshot::default(), &agents, ControlLevel::ReadOnly, false);
        let session = Arc::new(ResolvedContext::new("ro"));
        let result = run(
            &exec,
            &session,
            "pulse_control",
            json!({"type": "command", "command": "uptime", "target_host": "pve1"}),
        )
        .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("read_only"));
        assert!(agents.calls().is_empty());
    }

    #[tokio::test]
    async fn follow_stream_is_retried_with_bound() {
        let agents = RecordingAgents::new(&["pve1"], ok_output);
        let log = Arc::new(pulse_audit::AuditLog::new());
        let providers = Providers {
            agents: Some(Arc::clone(&agents) as Arc<dyn AgentServer>),
            ..Default::default()
        };
        let core = Core::new(&PulseConfig::default(), providers).with_telemetry(Arc::clone(&log) as Arc<dyn Telemetry>);
        let exec = Executor::new(core);
        let session = Arc::new(ResolvedContext::new("recover"));

        let result = exec
            .execute_with_recovery(
                Arc::clone(&session),
                "pulse_read",
                args(json!({"action": "exec", "command": "tail -f /var/log/syslog", "target_host": "pve1"})),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error, "{}", result.text_content());
        let calls = agents.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.command.contains("-n"));
        assert_eq!(log.count(pulse_audit::AUTO_RECOVERY_ATTEMPT), 1);
        assert_eq!(log.count(pulse_audit::AUTO_RECOVERY_SUCCESS), 1);

        // A retried call is never retried again.
        let again = exec
            .execute_with_recovery(
                session,
                "pulse_read",
                args(json!({
                    "action": "exec",
                    "command": "tail -f /var/log/syslog",
                    "target_host": "pve1",
                    "_auto_recovery_attempt": true,
                })),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(error_code(&again).as_deref(), Some("READ_ONLY_VIOLATION"));
        assert_eq!(log.count(pulse_audit::AUTO_RECOVERY_ATTEMPT), 1);
    }

    #[test]
    fn approval_reason_by_level() {
        let mut settings = ControlSettings::default();
        assert!(settings.approval_reason(PolicyDecision::Allow, false).is_some());
        assert!(settings.approval_reason(PolicyDecision::Allow, true).is_none());
        settings.level = ControlLevel::Autonomous;
        assert!(settings.approval_reason(PolicyDecision::RequireApproval, false).is_none());
    }

    #[test]
    fn protected_guest_matching() {
        let settings = ControlSettings {
            protected_guests: vec!["101".into(), "db".into()],
            ..Default::default()
        };
        assert!(settings.is_protected(101, "web"));
        assert!(settings.is_protected(300, "db"));
        assert!(!settings.is_protected(102, ""));
    }

}
