//! `pulse_kubernetes`: cluster inventory from the snapshot, and `kubectl`
//! operations run by the agent attached to the cluster.

use async_trait::async_trait;
use pulse_approval::NewApproval;
use pulse_safety::{classify, shell_escape};
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{bad_args, format_policy_blocked, json_result, redact_output, request_approval, writes_allowed};
use crate::executor::{ToolContext, dispatch_failure};
use crate::model::KubernetesCluster;
use crate::providers::{CommandPayload, PolicyDecision};
use crate::state::Snapshot;

const TOOL: &str = "pulse_kubernetes";
const TYPES: &[&str] = &[
    "clusters", "nodes", "pods", "deployments", "scale", "restart", "delete_pod", "exec", "logs",
];
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_LIMIT: usize = 100;
const DEFAULT_LOG_LINES: i64 = 100;
const MAX_LOG_LINES: i64 = 1000;
const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Default, Deserialize)]
struct KubernetesParams {
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    cluster: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    namespace: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    deployment: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pod: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    container: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    command: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    replicas: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    lines: Option<i64>,
    #[serde(default, deserialize_with = "lenient::string")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    limit: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    offset: Option<i64>,
}

impl KubernetesParams {
    fn namespace(&self) -> &str {
        self.namespace.as_deref().filter(|n| !n.is_empty()).unwrap_or(DEFAULT_NAMESPACE)
    }

    fn page(&self) -> (usize, usize) {
        let limit = self.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(DEFAULT_LIMIT);
        let offset = self.offset.filter(|o| *o > 0).map(|o| o as usize).unwrap_or(0);
        (limit, offset)
    }

    fn log_lines(&self) -> i64 {
        match self.lines {
            Some(n) if n > 0 => n.min(MAX_LOG_LINES),
            _ => DEFAULT_LOG_LINES,
        }
    }
}

pub struct KubernetesTool;

#[async_trait]
impl Tool<ToolContext> for KubernetesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Query and control Kubernetes clusters, nodes, pods, and deployments. Query: \
                          clusters, nodes, pods, deployments. Control: scale, restart, delete_pod, exec, logs."
                .into(),
            params: vec![
                ToolParam::required("type", "Operation type").one_of(TYPES),
                ToolParam::optional("cluster", "Cluster name or ID"),
                ToolParam::optional("namespace", "Kubernetes namespace").default_value(DEFAULT_NAMESPACE),
                ToolParam::optional("deployment", "Deployment name (for scale, restart)"),
                ToolParam::optional("pod", "Pod name (for delete_pod, exec, logs)"),
                ToolParam::optional("container", "Container name (for exec, logs)"),
                ToolParam::optional("command", "Command to execute (for exec)"),
                ToolParam::optional("replicas", "Desired replica count (for scale)").typed(ParamType::Integer),
                ToolParam::optional("lines", "Number of log lines to return (for logs)")
                    .typed(ParamType::Integer)
                    .default_value("100"),
                ToolParam::optional("status", "Filter pods by phase: Running, Pending, Failed, Succeeded"),
                ToolParam::optional("limit", "Maximum number of results")
                    .typed(ParamType::Integer)
                    .default_value("100"),
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
        let params: KubernetesParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let snapshot = cx.providers().snapshot();
        match params.kind.as_deref().unwrap_or_default() {
            "clusters" => clusters(&snapshot),
            "nodes" => with_cluster(&snapshot, &params, |c| {
                json_result(json!({"cluster": c.label(), "nodes": c.nodes, "total": c.nodes.len()}))
            }),
            "pods" => with_cluster(&snapshot, &params, |c| pods(c, &params)),
            "deployments" => with_cluster(&snapshot, &params, |c| deployments(c, &params)),
            "scale" | "restart" | "delete_pod" => control(cx, args, &snapshot, &params).await,
            "exec" => exec(cx, args, &snapshot, &params).await,
            "logs" => logs(cx, &snapshot, &params).await,
            other => CallToolResult::error(format!(
                "unknown type: {other}. Use: clusters, nodes, pods, deployments, scale, restart, delete_pod, exec, logs"
            )),
        }
    }
}

// ── Inventory ────────────────────────────────────────────────────────────────

fn clusters(snapshot: &Snapshot) -> CallToolResult {
    if snapshot.kubernetes_clusters.is_empty() {
        return CallToolResult::text("No Kubernetes clusters found. Kubernetes monitoring may not be configured.");
    }
    let clusters: Vec<_> = snapshot
        .kubernetes_clusters
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "display_name": c.label(),
                "version": c.version,
                "status": c.status,
                "node_count": c.nodes.len(),
                "ready_nodes": c.nodes.iter().filter(|n| n.ready).count(),
                "pod_count": c.pods.len(),
                "deployment_count": c.deployments.len(),
            })
        })
        .collect();
    json_result(json!({"total": clusters.len(), "clusters": clusters}))
}

fn with_cluster(
    snapshot: &Snapshot,
    params: &KubernetesParams,
    f: impl FnOnce(&KubernetesCluster) -> CallToolResult,
) -> CallToolResult {
    let Some(name) = params.cluster.as_deref() else {
        return CallToolResult::error("cluster is required");
    };
    match snapshot.find_cluster(name) {
        Some(cluster) => f(cluster),
        None => CallToolResult::text(format!("Kubernetes cluster '{name}' not found.")),
    }
}

fn pods(cluster: &KubernetesCluster, params: &KubernetesParams) -> CallToolResult {
    let (limit, offset) = params.page();
    let status = params.status.as_deref();
    let matching: Vec<_> = cluster
        .pods
        .iter()
        .filter(|p| params.namespace.as_deref().is_none_or(|ns| p.namespace == ns))
        .filter(|p| status.is_none_or(|s| p.phase.eq_ignore_ascii_case(s)))
        .collect();
    let page: Vec<_> = matching.iter().skip(offset).take(limit).collect();
    json_result(json!({
        "cluster": cluster.label(),
        "pods": page,
        "total": cluster.pods.len(),
        "filtered": matching.len(),
    }))
}

fn deployments(cluster: &KubernetesCluster, params: &KubernetesParams) -> CallToolResult {
    let (limit, offset) = params.page();
    let matching: Vec<_> = cluster
        .deployments
        .iter()
        .filter(|d| params.namespace.as_deref().is_none_or(|ns| d.namespace == ns))
        .collect();
    let page: Vec<_> = matching.iter().skip(offset).take(limit).collect();
    json_result(json!({
        "cluster": cluster.label(),
        "deployments": page,
        "total": cluster.deployments.len(),
        "filtered": matching.len(),
    }))
}

// ── kubectl ──────────────────────────────────────────────────────────────────

/// Namespaces, pods, deployments and containers are DNS subdomains.
pub(crate) fn validate_resource_name(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("value cannot be empty".into());
    }
    if value.len() > MAX_NAME_LEN {
        return Err(format!("value too long (max {MAX_NAME_LEN} characters)"));
    }
    match value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
    {
        Some(bad) => Err(format!("invalid character '{bad}' in resource name")),
        None => Ok(()),
    }
}

fn check_names(pairs: &[(&str, Option<&str>)]) -> Result<(), CallToolResult> {
    for (what, value) in pairs {
        if let Some(value) = value {
            validate_resource_name(value).map_err(|err| CallToolResult::error(format!("invalid {what}: {err}")))?;
        }
    }
    Ok(())
}

/// The pod command runs under `sh -c` with every user value quoted.
pub(crate) fn exec_command(namespace: &str, pod: &str, container: Option<&str>, command: &str) -> String {
    let mut cmd = format!("kubectl -n {} exec {}", shell_escape(namespace), shell_escape(pod));
    if let Some(c) = container {
        cmd.push_str(&format!(" -c {}", shell_escape(c)));
    }
    cmd.push_str(&format!(" -- sh -c {}", shell_escape(command)));
    cmd
}

pub(crate) fn logs_command(namespace: &str, pod: &str, container: Option<&str>, lines: i64) -> String {
    match container {
        Some(c) => format!("kubectl -n {namespace} logs {pod} -c {c} --tail={lines}"),
        None => format!("kubectl -n {namespace} logs {pod} --tail={lines}"),
    }
}

fn cluster_agent<'a>(snapshot: &'a Snapshot, name: &str) -> Result<(&'a KubernetesCluster, String), String> {
    let cluster = snapshot
        .find_cluster(name)
        .ok_or_else(|| format!("kubernetes cluster '{name}' not found"))?;
    match cluster.agent_id.as_deref().filter(|id| !id.is_empty()) {
        Some(agent_id) => Ok((cluster, agent_id.to_string())),
        None => Err(format!(
            "cluster '{name}' has no agent configured - kubectl commands cannot be executed"
        )),
    }
}

fn format_kubernetes_approval_needed(
    action: &str,
    resource: &str,
    namespace: &str,
    cluster: &str,
    command: &str,
    approval_id: &str,
) -> String {
    let payload = json!({
        "type": "approval_required",
        "approval_id": approval_id,
        "action": action,
        "resource": resource,
        "namespace": namespace,
        "cluster": cluster,
        "command": command,
        "how_to_approve": "Click the approval button in the chat to execute this action.",
        "do_not_retry": true,
    });
    format!("APPROVAL_REQUIRED: {payload}")
}

struct KubectlWrite<'a> {
    action: &'a str,
    resource: &'a str,
    namespace: &'a str,
    command: String,
    context: String,
}

/// Policy, approval, then dispatch on the cluster's agent.  `Ok` carries
/// the raw output for the caller to phrase.
async fn run_write(
    cx: &ToolContext,
    args: &ToolArgs,
    cluster: &KubernetesCluster,
    agent_id: &str,
    write: &KubectlWrite<'_>,
) -> Result<(i32, String), CallToolResult> {
    let scope = if cluster.id.is_empty() { &cluster.name } else { &cluster.id };
    let target_id = format!("{scope}:{}:{}", write.namespace, write.resource);

    let preapproved = cx.consume_approval(args, &write.command, "kubernetes", &target_id).await;
    let decision = if preapproved {
        PolicyDecision::Allow
    } else {
        cx.providers().policy_decision(&write.command)
    };
    if decision == PolicyDecision::Block {
        return Err(CallToolResult::text(format_policy_blocked(
            &write.command,
            "This command is blocked by security policy",
        )));
    }
    if let Some(reason) = cx.control().approval_reason(decision, preapproved) {
        info!(tool = TOOL, action = write.action, resource = write.resource, reason, "kubectl needs approval");
        let new = NewApproval::new(&write.command, "kubernetes", &target_id)
            .target_name(cluster.label())
            .context(&write.context);
        return Err(request_approval(cx, new, |id| {
            format_kubernetes_approval_needed(write.action, write.resource, write.namespace, cluster.label(), &write.command, id)
        })
        .await);
    }

    if cx.providers().agents.is_none() {
        return Err(CallToolResult::error("no agent server available"));
    }
    match cx.dispatch(agent_id, CommandPayload::host(&write.command)).await {
        Ok(out) => Ok((out.exit_code, redact_output(&out.combined()))),
        Err(err) => Err(dispatch_failure(err)),
    }
}

async fn control(cx: &ToolContext, args: &ToolArgs, snapshot: &Snapshot, params: &KubernetesParams) -> CallToolResult {
    let action = params.kind.as_deref().unwrap_or_default();
    let Some(cluster_name) = params.cluster.as_deref() else {
        return CallToolResult::error("cluster is required");
    };
    let namespace = params.namespace();

    let (resource, command, context) = match action {
        "scale" | "restart" => {
            let Some(deployment) = params.deployment.as_deref() else {
                return CallToolResult::error("deployment is required");
            };
            if let Err(result) = check_names(&[("namespace", Some(namespace)), ("deployment", Some(deployment))]) {
                return result;
            }
            if action == "scale" {
                let Some(replicas) = params.replicas.filter(|r| *r >= 0) else {
                    return CallToolResult::error("replicas is required and must be >= 0");
                };
                (
                    deployment,
                    format!("kubectl -n {namespace} scale deployment {deployment} --replicas={replicas}"),
                    format!("Scale deployment {deployment} to {replicas} replicas"),
                )
            } else {
                (
                    deployment,
                    format!("kubectl -n {namespace} rollout restart deployment/{deployment}"),
                    format!("Restart deployment {deployment}"),
                )
            }
        }
        _ => {
            let Some(pod) = params.pod.as_deref() else {
                return CallToolResult::error("pod is required");
            };
            if let Err(result) = check_names(&[("namespace", Some(namespace)), ("pod", Some(pod))]) {
                return result;
            }
            (
                pod,
                format!("kubectl -n {namespace} delete pod {pod}"),
                format!("Delete pod {pod}"),
            )
        }
    };

    if !writes_allowed(cx) {
        warn!(tool = TOOL, action, "kubectl write refused at read_only");
        return CallToolResult::text("Kubernetes control operations are not available in read-only mode.");
    }
    let (cluster, agent_id) = match cluster_agent(snapshot, cluster_name) {
        Ok(found) => found,
        Err(msg) => return CallToolResult::text(msg),
    };

    let write = KubectlWrite {
        action,
        resource,
        namespace,
        command,
        context,
    };
    let (exit_code, output) = match run_write(cx, args, cluster, &agent_id, &write).await {
        Ok(done) => done,
        Err(result) => return result,
    };
    if exit_code != 0 {
        return CallToolResult::text(format!("kubectl command failed (exit code {exit_code}):\n{output}"));
    }

    let summary = match action {
        "scale" => format!(
            "Scaled deployment '{resource}' to {} replicas in namespace '{namespace}'.",
            params.replicas.unwrap_or_default()
        ),
        "restart" => format!(
            "Initiated rollout restart for deployment '{resource}' in namespace '{namespace}'. Pods will restart gradually."
        ),
        _ => format!(
            "Deleted pod '{resource}' in namespace '{namespace}'. If managed by a controller, a new pod will be created."
        ),
    };
    CallToolResult::text(format!("{summary}\n{output}"))
}

async fn exec(cx: &ToolContext, args: &ToolArgs, snapshot: &Snapshot, params: &KubernetesParams) -> CallToolResult {
    let Some(cluster_name) = params.cluster.as_deref() else {
        return CallToolResult::error("cluster is required");
    };
    let Some(pod) = params.pod.as_deref() else {
        return CallToolResult::error("pod is required");
    };
    let Some(command) = params.command.as_deref() else {
        return CallToolResult::error("command is required");
    };
    let namespace = params.namespace();
    let container = params.container.as_deref();
    if let Err(result) = check_names(&[("namespace", Some(namespace)), ("pod", Some(pod)), ("container", container)]) {
        return result;
    }

    let intent = classify(command);
    if intent.is_write() && !writes_allowed(cx) {
        warn!(tool = TOOL, pod, reason = %intent.reason, "pod exec refused at read_only");
        return CallToolResult::text("Kubernetes control operations are not available in read-only mode.");
    }
    let (cluster, agent_id) = match cluster_agent(snapshot, cluster_name) {
        Ok(found) => found,
        Err(msg) => return CallToolResult::text(msg),
    };

    let kubectl = exec_command(namespace, pod, container, command);
    let result = if intent.is_write() {
        let write = KubectlWrite {
            action: "exec",
            resource: pod,
            namespace,
            command: kubectl,
            context: format!("Execute command in pod {pod}"),
        };
        run_write(cx, args, cluster, &agent_id, &write).await
    } else {
        if cx.providers().agents.is_none() {
            return CallToolResult::error("no agent server available");
        }
        match cx.dispatch(&agent_id, CommandPayload::host(&kubectl)).await {
            Ok(out) => Ok((out.exit_code, redact_output(&out.combined()))),
            Err(err) => Err(dispatch_failure(err)),
        }
    };
    let (exit_code, output) = match result {
        Ok(done) => done,
        Err(result) => return result,
    };

    let output = if output.trim().is_empty() { "(no output)".to_string() } else { output };
    if exit_code == 0 {
        CallToolResult::text(format!("Command executed in pod '{pod}' (exit code 0).\n\nOutput:\n{output}"))
    } else {
        CallToolResult::text(format!("Command in pod '{pod}' exited with code {exit_code}.\n\nOutput:\n{output}"))
    }
}

async fn logs(cx: &ToolContext, snapshot: &Snapshot, params: &KubernetesParams) -> CallToolResult {
    let Some(cluster_name) = params.cluster.as_deref() else {
        return CallToolResult::error("cluster is required");
    };
    let Some(pod) = params.pod.as_deref() else {
        return CallToolResult::error("pod is required");
    };
    let namespace = params.namespace();
    let container = params.container.as_deref();
    if let Err(result) = check_names(&[("namespace", Some(namespace)), ("pod", Some(pod)), ("container", container)]) {
        return result;
    }
    let (_, agent_id) = match cluster_agent(snapshot, cluster_name) {
        Ok(found) => found,
        Err(msg) => return CallToolResult::text(msg),
    };

    let lines = params.log_lines();
    let command = logs_command(namespace, pod, container, lines);
    let intent = classify(&command);
    if intent.is_write() {
        return CallToolResult::error(format!("refusing to run '{command}': {}", intent.reason));
    }
    if cx.providers().agents.is_none() {
        return CallToolResult::error("no agent server available");
    }
    let out = match cx.dispatch(&agent_id, CommandPayload::host(&command)).await {
        Ok(out) => out,
        Err(err) => return dispatch_failure(err),
    };
    let output = redact_output(&out.combined());
    if out.exit_code != 0 {
        return CallToolResult::text(format!("kubectl logs failed (exit code {}):\n{output}", out.exit_code));
    }
    if output.trim().is_empty() {
        return CallToolResult::text(format!("No logs found for pod '{pod}' in namespace '{namespace}'"));
    }
    CallToolResult::text(format!("Logs from pod '{pod}' (last {lines} lines):\n{output}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_names_are_dns_subdomains() {
        assert!(validate_resource_name("web-7f9c.abc").is_ok());
        assert_eq!(validate_resource_name(""), Err("value cannot be empty".into()));
        assert_eq!(
            validate_resource_name("Web"),
            Err("invalid character 'W' in resource name".into())
        );
        assert!(validate_resource_name("a;rm").is_err());
        assert!(validate_resource_name(&"a".repeat(254)).is_err());
    }

    #[test]
    fn exec_command_quotes_everything() {
        assert_eq!(
            exec_command("default", "web-1", None, "cat /etc/os-release"),
            "kubectl -n 'default' exec 'web-1' -- sh -c 'cat /etc/os-release'"
        );
        assert_eq!(
            exec_command("prod", "api-0", Some("app"), "echo 'hi'"),
            r#"kubectl -n 'prod' exec 'api-0' -c 'app' -- sh -c 'echo '"'"'hi'"'"''"#
        );
    }

    #[test]
    fn logs_command_is_bounded_and_read_only() {
        let cmd = logs_command("default", "web-1", Some("app"), 50);
        assert_eq!(cmd, "kubectl -n default logs web-1 -c app --tail=50");
        assert!(!classify(&cmd).is_write());
    }

    #[test]
    fn log_lines_are_clamped() {
        let mut params = KubernetesParams::default();
        assert_eq!(params.log_lines(), 100);
        params.lines = Some(5000);
        assert_eq!(params.log_lines(), 1000);
        params.lines = Some(-3);
        assert_eq!(params.log_lines(), 100);
    }

    #[test]
    fn cluster_without_agent_cannot_run_kubectl() {
        let snapshot = Snapshot {
            kubernetes_clusters: vec![KubernetesCluster {
                id: "k1".into(),
                name: "prod".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = cluster_agent(&snapshot, "prod").unwrap_err();
        assert!(err.contains("has no agent configured"));
        assert_eq!(
            cluster_agent(&snapshot, "dev").unwrap_err(),
            "kubernetes cluster 'dev' not found"
        );
    }
}
