//! `pulse_read`: read-only inspection on any routed target.  Every command
//! this tool runs, including the ones it builds itself, goes through the
//! classifier and is refused unless it is read-only.

use async_trait::async_trait;
use pulse_safety::{classify, command_touches_sensitive_path, is_sensitive_path, non_interactive_hint, shell_escape, tags};
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolResponse, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{bad_args, format_available_agent_hosts, redact_output, truncate_for_display};
use crate::executor::{ToolContext, dispatch_failure};
use crate::guard::details;
use crate::providers::{CommandPayload, DispatchError};
use crate::routing::{RoutingResult, TargetType, resolve_route};

const TOOL: &str = "pulse_read";
const MAX_LINES: i64 = 1000;
const DEFAULT_LINES: i64 = 100;

#[derive(Debug, Default, Deserialize)]
struct ReadParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    target_host: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    command: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    path: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pattern: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    lines: Option<i64>,
    #[serde(default, deserialize_with = "lenient::string")]
    source: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    container: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    since: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    grep: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    docker_container: Option<String>,
}

impl ReadParams {
    fn lines(&self) -> i64 {
        match self.lines.unwrap_or(DEFAULT_LINES) {
            n if n < 1 => DEFAULT_LINES,
            n => n.min(MAX_LINES),
        }
    }
}

pub struct ReadTool;

#[async_trait]
impl Tool<ToolContext> for ReadTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Execute read-only operations on infrastructure (exec, file, find, tail, logs). \
                          Rejects write commands. target_host routes to a Proxmox host, LXC, or VM by name."
                .into(),
            params: vec![
                ToolParam::required("action", "Read action").one_of(&["exec", "file", "find", "tail", "logs"]),
                ToolParam::required("target_host", "Hostname to read from (Proxmox host, LXC name, or VM name)"),
                ToolParam::optional("command", "For exec: the read-only shell command to run"),
                ToolParam::optional("path", "For file/find/tail: the file path or glob pattern"),
                ToolParam::optional("pattern", "For find: glob pattern to search for"),
                ToolParam::optional("lines", "For tail/logs: number of lines")
                    .typed(ParamType::Integer)
                    .default_value("100"),
                ToolParam::optional("source", "For logs: 'docker' or 'journal'").one_of(&["docker", "journal"]),
                ToolParam::optional("container", "For logs with source=docker: container name"),
                ToolParam::optional("unit", "For logs with source=journal: systemd unit name"),
                ToolParam::optional("since", "For logs: time filter (e.g. '1h', '30m', '2024-01-01')"),
                ToolParam::optional("grep", "For logs/tail: filter output by pattern"),
                ToolParam::optional(
                    "docker_container",
                    "Read from inside a Docker container (target_host is where Docker runs)",
                ),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Read,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().agents.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: ReadParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        match params.action.as_deref().unwrap_or_default() {
            "exec" => {
                let Some(command) = params.command.as_deref() else {
                    return CallToolResult::error("command is required for exec action");
                };
                exec_read_only(cx, target(&params), command, params.docker_container.as_deref()).await
            }
            "file" => read_file(cx, &params).await,
            "find" => find(cx, &params).await,
            "tail" => tail(cx, &params).await,
            "logs" => logs(cx, &params).await,
            other => CallToolResult::error(format!("unknown action: {other}. Use: exec, file, find, tail, logs")),
        }
    }
}

fn target(params: &ReadParams) -> &str {
    params.target_host.as_deref().unwrap_or_default()
}

/// Docker container names: `[A-Za-z0-9_.-]+`.
pub(crate) fn is_valid_container_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

pub(crate) fn docker_exec_wrap(container: &str, command: &str) -> String {
    format!("docker exec {} sh -c {}", shell_escape(container), shell_escape(command))
}

/// Error text for a route with no agent.
pub(crate) fn unrouted_message(cx: &ToolContext, target_host: &str, routing: &RoutingResult) -> String {
    match routing.target_type {
        TargetType::Container | TargetType::Vm => format!(
            "'{target_host}' is a {} but no agent is available on its Proxmox host. \
             Install Pulse Unified Agent on the Proxmox node.",
            routing.target_type
        ),
        TargetType::Host => format!(
            "no agent available for target '{target_host}'. {}",
            format_available_agent_hosts(&cx.providers().connected_agents())
        ),
    }
}

fn read_only_violation(command: &str) -> CallToolResult {
    let intent = classify(command);
    let mut d = details(&[
        ("command", json!(truncate_for_display(command, 100))),
        ("reason", json!(intent.reason)),
        ("alternative", json!("Use pulse_control type=command for write operations")),
    ]);
    match non_interactive_hint(command, &intent) {
        Some(hint) => {
            d.insert("hint".into(), json!(hint.recovery_hint));
            d.insert("category".into(), json!(hint.category));
            d.insert("auto_recoverable".into(), json!(hint.auto_recoverable()));
            if let Some(rewrite) = hint.suggested_rewrite {
                d.insert("recovery_hint".into(), json!(format!("Retry with: {rewrite}")));
                d.insert("suggested_rewrite".into(), Value::String(rewrite));
            }
        }
        None => {
            d.insert(
                "hint".into(),
                json!("pulse_read only runs commands that cannot change state."),
            );
        }
    }
    warn!(tool = TOOL, reason = %intent.reason, "read-only violation");
    ToolResponse::blocked(
        "READ_ONLY_VIOLATION",
        format!(
            "Command '{}' is not read-only. Use pulse_control for write operations.",
            truncate_for_display(command, 50)
        ),
        d,
    )
    .into()
}

/// Classify, validate, route and run one read-only command.
pub(crate) async fn exec_read_only(
    cx: &ToolContext,
    target_host: &str,
    command: &str,
    docker_container: Option<&str>,
) -> CallToolResult {
    if target_host.is_empty() {
        return CallToolResult::error("target_host is required");
    }

    if let Some(reason) = command_touches_sensitive_path(command) {
        return ToolResponse::blocked(
            "SENSITIVE_COMMAND",
            format!("Refusing to run command that touches sensitive paths ({reason})."),
            details(&[
                ("reason", json!(reason)),
                (
                    "recovery_hint",
                    json!("Avoid reading credential files or process env via AI tools. Scope the request to non-sensitive logs or status output instead."),
                ),
            ]),
        )
        .into();
    }

    let intent = classify(command);
    if intent.is_write() {
        return read_only_violation(command);
    }
    if intent.tag() == tags::MODEL_TRUSTED {
        info!(
            tool = TOOL,
            command = truncate_for_display(command, 200),
            target_host,
            "allowing model-trusted command"
        );
    }

    let snapshot = cx.providers().snapshot();
    let guards = cx.guards(TOOL, &snapshot);
    if let Err(err) = guards.validate_routing_context(target_host) {
        return err.into_result();
    }
    if let Err(err) = guards.validate_for_exec(target_host, command) {
        return err.into_result();
    }

    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }
    let routing = resolve_route(&snapshot, &cx.providers().connected_agents(), target_host);
    if !routing.is_routed() {
        return CallToolResult::error(unrouted_message(cx, target_host, &routing));
    }

    let exec_command = match docker_container {
        Some(c) if !is_valid_container_name(c) => {
            return CallToolResult::error("invalid docker_container name");
        }
        Some(c) => docker_exec_wrap(c, command),
        None => command.to_string(),
    };

    debug!(
        tool = TOOL,
        target_host,
        agent = %routing.agent_id,
        agent_host = %routing.agent_hostname,
        transport = routing.transport.as_str(),
        resolved_kind = routing.resolved_kind_str(),
        "executing read-only command"
    );

    let payload = CommandPayload {
        command: exec_command,
        target_type: routing.target_type.as_str().to_string(),
        target_id: routing.target_id.clone(),
    };
    let out = match cx.dispatch(&routing.agent_id, payload).await {
        Ok(out) => out,
        Err(DispatchError::Canceled) => return dispatch_failure(DispatchError::Canceled),
        Err(err) => return CallToolResult::error(format!("command execution failed: {err}")),
    };

    let output = redact_output(&out.combined());
    if out.exit_code != 0 {
        return CallToolResult::text(format!("Command exited with code {}:\n{output}", out.exit_code));
    }
    if output.is_empty() {
        return CallToolResult::text("Command completed successfully (no output)");
    }
    CallToolResult::text(output)
}

// ── Generated commands ───────────────────────────────────────────────────────

async fn read_file(cx: &ToolContext, params: &ReadParams) -> CallToolResult {
    let Some(path) = params.path.as_deref() else {
        return CallToolResult::error("path is required for file action");
    };
    if target(params).is_empty() {
        return CallToolResult::error("target_host is required");
    }
    if !path.starts_with('/') {
        return CallToolResult::error("path must be absolute (start with /)");
    }
    super::file_edit::read_file(cx, path, target(params), params.docker_container.as_deref()).await
}

/// Bounded `find`: the directory part of the pattern, depth 3, 50 results.
pub(crate) fn find_command(search: &str) -> String {
    let (dir, name) = match search.rfind('/') {
        Some(idx) if idx > 0 => (&search[..idx], &search[idx + 1..]),
        _ => ("/", search.trim_start_matches('/')),
    };
    format!(
        "find {} -maxdepth 3 -name {} -type f 2>/dev/null | head -50",
        shell_escape(dir),
        shell_escape(name)
    )
}

async fn find(cx: &ToolContext, params: &ReadParams) -> CallToolResult {
    let Some(search) = params.pattern.as_deref().or(params.path.as_deref()) else {
        return CallToolResult::error("pattern or path is required for find action");
    };
    exec_read_only(cx, target(params), &find_command(search), None).await
}

pub(crate) fn tail_command(path: &str, lines: i64, grep: Option<&str>) -> String {
    let mut command = format!("tail -n {lines} {}", shell_escape(path));
    if let Some(pattern) = grep {
        command.push_str(&format!(" | grep -i {}", shell_escape(pattern)));
    }
    command
}

async fn tail(cx: &ToolContext, params: &ReadParams) -> CallToolResult {
    let Some(path) = params.path.as_deref() else {
        return CallToolResult::error("path is required for tail action");
    };
    if !path.starts_with('/') {
        return CallToolResult::error("path must be absolute (start with /)");
    }
    if let Some(reason) = is_sensitive_path(path) {
        return ToolResponse::blocked(
            "SENSITIVE_PATH",
            format!("Refusing to read sensitive path '{path}' ({reason})."),
            details(&[("path", json!(path)), ("reason", json!(reason))]),
        )
        .into();
    }
    let command = tail_command(path, params.lines(), params.grep.as_deref());
    exec_read_only(cx, target(params), &command, params.docker_container.as_deref()).await
}

/// The `logs` command, or the container listing when no container was named.
pub(crate) fn logs_command(
    source: Option<&str>,
    container: Option<&str>,
    unit: Option<&str>,
    since: Option<&str>,
    lines: i64,
    grep: Option<&str>,
) -> Result<String, &'static str> {
    let source = source
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| if container.is_some() { "docker" } else { "journal" }.to_string());

    let mut command = match (source.as_str(), container) {
        ("docker", None) => {
            let mut listing = "docker ps --format '{{.Names}}\t{{.Status}}' | head -20".to_string();
            if let Some(pattern) = grep {
                listing.push_str(&format!(" | grep -i {}", shell_escape(pattern)));
            }
            return Ok(listing);
        }
        ("docker", Some(c)) => {
            if !is_valid_container_name(c) {
                return Err("invalid container name");
            }
            match since {
                Some(s) => format!("docker logs --since {} --tail {lines} {}", shell_escape(s), shell_escape(c)),
                None => format!("docker logs --tail {lines} {}", shell_escape(c)),
            }
        }
        ("journal", _) => match (unit, since) {
            (Some(u), Some(s)) => format!(
                "journalctl -u {} --since {} -n {lines} --no-pager",
                shell_escape(u),
                shell_escape(s)
            ),
            (Some(u), None) => format!("journalctl -u {} -n {lines} --no-pager", shell_escape(u)),
            (None, Some(s)) => format!("journalctl --since {} -n {lines} --no-pager", shell_escape(s)),
            (None, None) => format!("journalctl -n {lines} --no-pager"),
        },
        (other, _) => {
            warn!(tool = TOOL, source = other, "unknown log source, using journal");
            format!("journalctl -n {lines} --no-pager")
        }
    };
    if let Some(pattern) = grep {
        command.push_str(&format!(" 2>&1 | grep -i {}", shell_escape(pattern)));
    }
    Ok(command)
}

async fn logs(cx: &ToolContext, params: &ReadParams) -> CallToolResult {
    match logs_command(
        params.source.as_deref(),
        params.container.as_deref(),
        params.unit.as_deref(),
        params.since.as_deref(),
        params.lines(),
        params.grep.as_deref(),
    ) {
        Ok(command) => exec_read_only(cx, target(params), &command, None).await,
        Err(msg) => CallToolResult::error(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names() {
        assert!(is_valid_container_name("jellyfin"));
        assert!(is_valid_container_name("app_1.web-2"));
        assert!(!is_valid_container_name(""));
        assert!(!is_valid_container_name("a;rm"));
        assert!(!is_valid_container_name("a b"));
    }

    #[test]
    fn generated_commands_are_read_only() {
        let cmds = [
            find_command("/etc/nginx/*.conf"),
            find_command("*.log"),
            tail_command("/var/log/syslog", 100, Some("error")),
            logs_command(None, Some("nginx"), None, Some("1h"), 200, None).unwrap(),
            logs_command(Some("journal"), None, Some("pveproxy"), None, 50, Some("fail")).unwrap(),
            logs_command(Some("docker"), None, None, None, 50, None).unwrap(),
        ];
        for cmd in cmds {
            assert!(classify(&cmd).is_read_only(), "{cmd} should be read-only");
        }
    }

    #[test]
    fn find_splits_directory_and_name() {
        assert_eq!(
            find_command("/etc/nginx/*.conf"),
            "find '/etc/nginx' -maxdepth 3 -name '*.conf' -type f 2>/dev/null | head -50"
        );
        assert_eq!(
            find_command("*.log"),
            "find '/' -maxdepth 3 -name '*.log' -type f 2>/dev/null | head -50"
        );
    }

    #[test]
    fn logs_source_inference() {
        assert_eq!(
            logs_command(None, Some("web"), None, None, 100, None).unwrap(),
            "docker logs --tail 100 'web'"
        );
        assert_eq!(
            logs_command(None, None, None, None, 100, None).unwrap(),
            "journalctl -n 100 --no-pager"
        );
        assert_eq!(
            logs_command(Some("syslog"), None, None, None, 10, None).unwrap(),
            "journalctl -n 10 --no-pager"
        );
        assert_eq!(
            logs_command(None, Some("bad name"), None, None, 10, None),
            Err("invalid container name")
        );
    }

    #[test]
    fn line_bounds() {
        let p = |lines| ReadParams { lines, ..Default::default() };
        assert_eq!(p(None).lines(), 100);
        assert_eq!(p(Some(0)).lines(), 100);
        assert_eq!(p(Some(5000)).lines(), 1000);
        assert_eq!(p(Some(20)).lines(), 20);
    }

    #[test]
    fn violation_carries_rewrite() {
        let result = read_only_violation("tail -f /var/log/syslog");
        let body = result.json_content().unwrap();
        assert_eq!(body["error"]["code"], "READ_ONLY_VIOLATION");
        assert_eq!(body["error"]["details"]["category"], "unbounded_stream");
        assert!(body["error"]["details"]["suggested_rewrite"].as_str().unwrap().contains("-n"));
        assert_eq!(body["error"]["auto_recoverable"], true);
    }
}
