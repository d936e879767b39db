//! `pulse_file_edit`: read, append to or overwrite a file on a routed target.
//!
//! Content travels base64-encoded so no quoting of the payload is ever
//! needed.  Writes go through every guard, the approval gate, and are then
//! verified by hashing the file on the target.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pulse_approval::NewApproval;
use pulse_safety::{PathError, shell_escape, validate_target_path};
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolResponse, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::read::{docker_exec_wrap, is_valid_container_name};
use super::{bad_args, format_file_approval_needed, read_only_refusal, request_approval, writes_allowed};
use crate::executor::{ToolContext, dispatch_failure};
use crate::guard::details;
use crate::providers::{CommandOutput, CommandPayload, DispatchError, PolicyDecision};
use crate::routing::{RoutingResult, TargetType, resolve_route};

const TOOL: &str = "pulse_file_edit";

#[derive(Debug, Default, Deserialize)]
struct FileParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    path: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    target_host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    docker_container: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Append,
    Overwrite,
}

impl WriteMode {
    fn action(self) -> &'static str {
        match self {
            WriteMode::Append => "append",
            WriteMode::Overwrite => "write",
        }
    }

    fn redirect(self) -> &'static str {
        match self {
            WriteMode::Append => ">>",
            WriteMode::Overwrite => ">",
        }
    }

    fn approval_command(self, path: &str) -> String {
        match self {
            WriteMode::Append => format!("Append to file: {path}"),
            WriteMode::Overwrite => format!("Write file: {path}"),
        }
    }
}

pub struct FileEditTool;

#[async_trait]
impl Tool<ToolContext> for FileEditTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Read and edit files on remote hosts, containers, VMs, and Docker containers.\n\n\
                          Actions:\n\
                          - read: Read the contents of a file\n\
                          - append: Append content to the end of a file\n\
                          - write: Write or overwrite a file (creates it if missing)\n\n\
                          Escaping is handled automatically; pass content as-is. target_host may be a node, \
                          an LXC or VM name; docker_container reaches files inside a container on that host."
                .into(),
            params: vec![
                ToolParam::required("action", "File action").one_of(&["read", "append", "write"]),
                ToolParam::required("path", "Absolute path to the file"),
                ToolParam::optional("content", "Content to write or append"),
                ToolParam::required("target_host", "Hostname where the file exists (or where Docker is running)"),
                ToolParam::optional("docker_container", "Docker container name (for files inside containers)"),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Mixed,
                require_control: true,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().agents.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: FileParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let Some(path) = params.path.as_deref() else {
            return CallToolResult::error("path is required");
        };
        let Some(target_host) = params.target_host.as_deref() else {
            return CallToolResult::error("target_host is required");
        };
        if !path.starts_with('/') {
            return CallToolResult::error("path must be absolute (start with /)");
        }
        let container = params.docker_container.as_deref();
        if let Some(c) = container {
            if !is_valid_container_name(c) {
                return CallToolResult::error(format!("invalid docker_container name: {c}"));
            }
        }

        let action = params.action.as_deref().unwrap_or_default();
        if action != "read" && !writes_allowed(cx) {
            return read_only_refusal(TOOL, action);
        }

        let content = params.content.as_deref().filter(|c| !c.is_empty());
        match action {
            "read" => read_file(cx, path, target_host, container).await,
            "append" | "write" => {
                let Some(content) = content else {
                    return CallToolResult::error(format!("content is required for {action} action"));
                };
                let mode = if action == "append" { WriteMode::Append } else { WriteMode::Overwrite };
                write_file(cx, args, mode, path, content, target_host, container).await
            }
            other => CallToolResult::error(format!("unknown action: {other}. Use: read, append, write")),
        }
    }
}

fn sensitive_path_block(path: &str, verb: &str, recovery_hint: &str) -> Option<CallToolResult> {
    match validate_target_path(path) {
        Ok(()) => None,
        Err(PathError::Sensitive { reason, .. }) => Some(
            ToolResponse::blocked(
                "SENSITIVE_PATH",
                format!("Refusing to {verb} sensitive path '{path}' ({reason})."),
                details(&[
                    ("path", json!(path)),
                    ("reason", json!(reason)),
                    ("recovery_hint", json!(recovery_hint)),
                ]),
            )
            .into(),
        ),
        Err(err) => Some(CallToolResult::error(err)),
    }
}

fn unrouted_text(target_host: &str, routing: &RoutingResult) -> CallToolResult {
    match routing.target_type {
        TargetType::Container | TargetType::Vm => CallToolResult::text(format!(
            "'{target_host}' is a {} but no agent is available on its host node. Install Pulse Unified Agent on the node.",
            routing.target_type
        )),
        TargetType::Host => CallToolResult::text(format!(
            "No agent found for host '{target_host}'. Check that the hostname is correct and an agent is connected."
        )),
    }
}

fn payload(routing: &RoutingResult, command: String) -> CommandPayload {
    CommandPayload {
        command,
        target_type: routing.target_type.as_str().to_string(),
        target_id: routing.target_id.clone(),
    }
}

fn error_text(out: &CommandOutput) -> &str {
    if out.stderr.is_empty() { &out.stdout } else { &out.stderr }
}

// ── Read ─────────────────────────────────────────────────────────────────────

pub(crate) async fn read_file(
    cx: &ToolContext,
    path: &str,
    target_host: &str,
    container: Option<&str>,
) -> CallToolResult {
    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }
    if let Some(blocked) = sensitive_path_block(
        path,
        "read",
        "Avoid reading credential files. If you need a value, provide it manually or scope the request to non-sensitive config or log files.",
    ) {
        return blocked;
    }

    let command = match container {
        Some(c) => format!("docker exec {} cat {}", shell_escape(c), shell_escape(path)),
        None => format!("cat {}", shell_escape(path)),
    };

    let snapshot = cx.providers().snapshot();
    let guards = cx.guards(TOOL, &snapshot);
    if let Err(err) = guards.validate_routing_context(target_host) {
        return err.into_result();
    }
    if let Err(err) = guards.validate_for_exec(target_host, &command) {
        return err.into_result();
    }

    let routing = resolve_route(&snapshot, &cx.providers().connected_agents(), target_host);
    if !routing.is_routed() {
        return unrouted_text(target_host, &routing);
    }

    let out = match cx.dispatch(&routing.agent_id, payload(&routing, command)).await {
        Ok(out) => out,
        Err(DispatchError::Canceled) => return dispatch_failure(DispatchError::Canceled),
        Err(err) => return CallToolResult::error(format!("failed to read file: {err}")),
    };
    if out.exit_code != 0 {
        return CallToolResult::text(match container {
            Some(c) => format!(
                "Failed to read file from container '{c}' (exit code {}): {}",
                out.exit_code,
                error_text(&out)
            ),
            None => format!("Failed to read file (exit code {}): {}", out.exit_code, error_text(&out)),
        });
    }

    let (content, redactions) = pulse_safety::redact_sensitive_text(&out.stdout);
    let mut response = json!({
        "success": true,
        "path": path,
        "size": content.len(),
        "content": content,
        "host": target_host,
        "redacted": redactions > 0,
        "redactions": redactions,
        "execution": routing.provenance(target_host),
    });
    if let Some(c) = container {
        response["docker_container"] = json!(c);
    }
    CallToolResult::json(&response)
}

// ── Append / write ───────────────────────────────────────────────────────────

/// `echo 'b64' | base64 -d > 'path'`, wrapped for Docker when needed.
fn write_command(mode: WriteMode, path: &str, content: &str, container: Option<&str>) -> String {
    let encoded = STANDARD.encode(content.as_bytes());
    let inner = format!(
        "echo {} | base64 -d {} {}",
        shell_escape(&encoded),
        mode.redirect(),
        shell_escape(path)
    );
    match container {
        Some(c) => docker_exec_wrap(c, &inner),
        None => inner,
    }
}

fn approval_target_id(target_host: &str, container: Option<&str>, path: &str) -> String {
    format!("host={target_host}|container={}|path={path}", container.unwrap_or_default())
}

async fn write_file(
    cx: &ToolContext,
    args: &ToolArgs,
    mode: WriteMode,
    path: &str,
    content: &str,
    target_host: &str,
    container: Option<&str>,
) -> CallToolResult {
    let action = mode.action();
    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }
    if let Some(blocked) = sensitive_path_block(
        path,
        "write",
        "Avoid modifying credential files via AI. Apply this change manually if needed.",
    ) {
        return blocked;
    }

    let snapshot = cx.providers().snapshot();
    let guards = cx.guards(TOOL, &snapshot);
    if let Err(err) = guards.validate_routing_context(target_host) {
        return err.into_result();
    }
    if let Err(err) = guards.validate_resolved_resource(target_host, action) {
        return err.into_result();
    }

    let routing = resolve_route(&snapshot, &cx.providers().connected_agents(), target_host);
    if !routing.is_routed() {
        return unrouted_text(target_host, &routing);
    }
    if let Err(err) = guards.validate_write_execution_context(target_host, &routing) {
        return err.into_result();
    }

    let approval_command = mode.approval_command(path);
    let target_id = approval_target_id(target_host, container, path);
    let preapproved = cx.consume_approval(args, &approval_command, "file", &target_id).await;
    if let Some(reason) = cx.control().approval_reason(PolicyDecision::Allow, preapproved) {
        let display = match container {
            Some(c) => format!("{target_host} (container: {c})"),
            None => target_host.to_string(),
        };
        info!(tool = TOOL, path, target_host, reason, "file edit needs approval");
        let new = NewApproval::new(&approval_command, "file", &target_id)
            .target_name(&display)
            .context(format!(
                "{} {} bytes to {path}",
                if mode == WriteMode::Append { "Append" } else { "Write" },
                content.len()
            ));
        return request_approval(cx, new, |id| {
            format_file_approval_needed(path, &display, action, content.len(), id)
        })
        .await;
    }

    let command = write_command(mode, path, content, container);
    let out = match cx.dispatch(&routing.agent_id, payload(&routing, command)).await {
        Ok(out) => out,
        Err(DispatchError::Canceled) => return dispatch_failure(DispatchError::Canceled),
        Err(err) => return CallToolResult::error(format!("failed to {action} file: {err}")),
    };

    if out.exit_code != 0 {
        warn!(tool = TOOL, path, exit_code = out.exit_code, "file {action} failed");
        let mut failure = json!({
            "success": false,
            "action": action,
            "path": path,
            "host": target_host,
            "exit_code": out.exit_code,
            "error": error_text(&out),
        });
        if let Some(c) = container {
            failure["docker_container"] = json!(c);
        }
        return CallToolResult::json_with_is_error(&failure, true);
    }

    let verification = match mode {
        WriteMode::Overwrite => verify_sha256(cx, &routing, path, container, content).await,
        WriteMode::Append => verify_tail_hash(cx, &routing, path, container, content).await,
    };
    let verification = match verification {
        Ok(v) => v,
        Err(canceled) => return dispatch_failure(canceled),
    };

    let mut response = json!({
        "success": true,
        "action": action,
        "path": path,
        "host": target_host,
        "bytes_written": content.len(),
        "verification": verification,
        "execution": routing.provenance(target_host),
    });
    if let Some(c) = container {
        response["docker_container"] = json!(c);
    }
    CallToolResult::json(&response)
}

// ── Verification ─────────────────────────────────────────────────────────────

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn first_field(out: &CommandOutput) -> Option<String> {
    format!("{}\n{}", out.stdout, out.stderr)
        .split_whitespace()
        .next()
        .map(str::to_string)
}

fn exit_code_fallback(note: impl Into<String>) -> Value {
    json!({"ok": true, "method": "exit_code", "note": note.into()})
}

/// Runs a hash probe.  Only cancellation escapes; other failures degrade to
/// the exit-code method.
async fn probe_hash(
    cx: &ToolContext,
    routing: &RoutingResult,
    command: String,
    method: &str,
    expected: String,
) -> Result<Value, DispatchError> {
    let out = match cx.dispatch(&routing.agent_id, payload(routing, command)).await {
        Ok(out) => out,
        Err(DispatchError::Canceled) => return Err(DispatchError::Canceled),
        Err(err) => return Ok(exit_code_fallback(format!("{method} verification unavailable: {err}"))),
    };
    match first_field(&out) {
        Some(actual) if out.exit_code == 0 => Ok(json!({
            "ok": actual.eq_ignore_ascii_case(&expected),
            "method": method,
            "expected": expected,
            "actual": actual,
        })),
        _ => Ok(exit_code_fallback(format!(
            "{method} verification unavailable on target (missing tools or non-zero exit)"
        ))),
    }
}

async fn verify_sha256(
    cx: &ToolContext,
    routing: &RoutingResult,
    path: &str,
    container: Option<&str>,
    content: &str,
) -> Result<Value, DispatchError> {
    let p = shell_escape(path);
    let mut command = format!(
        "sha256sum {p} 2>/dev/null || shasum -a 256 {p} 2>/dev/null || openssl dgst -sha256 {p} 2>/dev/null"
    );
    if let Some(c) = container {
        command = docker_exec_wrap(c, &command);
    }
    probe_hash(cx, routing, command, "sha256", sha256_hex(content)).await
}

async fn verify_tail_hash(
    cx: &ToolContext,
    routing: &RoutingResult,
    path: &str,
    container: Option<&str>,
    appended: &str,
) -> Result<Value, DispatchError> {
    let mut command = format!(
        "tail -c {} {} 2>/dev/null | (sha256sum 2>/dev/null || shasum -a 256 2>/dev/null)",
        appended.len(),
        shell_escape(path)
    );
    if let Some(c) = container {
        command = docker_exec_wrap(c, &command);
    }
    probe_hash(cx, routing, command, "tail_sha256", sha256_hex(appended)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_command_round_trips_content() {
        let cmd = write_command(WriteMode::Overwrite, "/etc/app.yaml", "a: 'b'\n", None);
        assert_eq!(cmd, "echo 'YTogJ2InCg==' | base64 -d > '/etc/app.yaml'");

        let appended = write_command(WriteMode::Append, "/tmp/x", "hi", Some("nginx"));
        assert!(appended.starts_with("docker exec 'nginx' sh -c "));
        assert!(appended.contains(">>"));
    }

    #[test]
    fn approval_target_binds_host_container_and_path() {
        assert_eq!(
            approval_target_id("delly", None, "/tmp/a"),
            "host=delly|container=|path=/tmp/a"
        );
        assert_eq!(
            approval_target_id("tower", Some("web"), "/tmp/a"),
            "host=tower|container=web|path=/tmp/a"
        );
    }

    #[test]
    fn hash_of_known_content() {
        assert_eq!(
            sha256_hex("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let out = CommandOutput {
            stdout: "2CF24DBA  /tmp/x\n".into(),
            ..Default::default()
        };
        assert_eq!(first_field(&out).as_deref(), Some("2CF24DBA"));
    }

    #[test]
    fn sensitive_paths_are_blocked() {
        let blocked = sensitive_path_block("/etc/shadow", "read", "hint").unwrap();
        assert_eq!(blocked.json_content().unwrap()["error"]["code"], "SENSITIVE_PATH");
        assert!(sensitive_path_block("/etc/nginx/nginx.conf", "write", "hint").is_none());
    }
}
