//! `pulse_alerts`: active threshold alerts and AI findings.  `resolve` and
//! `dismiss` change finding state and are refused at `read_only`.

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, ParamType, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{bad_args, json_result, read_only_refusal, writes_allowed};
use crate::executor::ToolContext;
use crate::model::{Alert, Finding};

const TOOL: &str = "pulse_alerts";
const ACTIONS: &[&str] = &["list", "findings", "resolve", "dismiss"];
const DISMISS_REASONS: &[&str] = &["not_an_issue", "expected_behavior", "will_fix_later"];
const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
struct AlertsParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    severity: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    finding_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    reason: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    note: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    limit: Option<i64>,
}

impl AlertsParams {
    fn limit(&self) -> usize {
        self.limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(DEFAULT_LIMIT)
    }

    fn keeps_alert(&self, alert: &Alert) -> bool {
        self.severity.as_deref().is_none_or(|s| alert.level.eq_ignore_ascii_case(s))
            && self.resource_id.as_deref().is_none_or(|r| alert.resource_id == r)
    }

    fn keeps_finding(&self, finding: &Finding) -> bool {
        self.severity.as_deref().is_none_or(|s| finding.severity.eq_ignore_ascii_case(s))
            && self.resource_id.as_deref().is_none_or(|r| finding.resource_id == r)
    }
}

pub struct AlertsTool;

#[async_trait]
impl Tool<ToolContext> for AlertsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Active alerts and AI findings. list shows threshold alerts, findings shows \
                          detected issues; resolve marks a finding fixed and dismiss hides it."
                .into(),
            params: vec![
                ToolParam::required("action", "What to do").one_of(ACTIONS),
                ToolParam::optional("severity", "Filter by severity: warning, critical"),
                ToolParam::optional("resource_id", "Filter by resource ID"),
                ToolParam::optional("finding_id", "Finding to resolve or dismiss"),
                ToolParam::optional("reason", "Why the finding is dismissed").one_of(DISMISS_REASONS),
                ToolParam::optional("note", "What was done, or extra context"),
                ToolParam::optional("limit", "Maximum number of results (default: 50)").typed(ParamType::Integer),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Mixed,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().findings.is_some() || cx.providers().state.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: AlertsParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        match params.action.as_deref().unwrap_or_default() {
            "list" => list(cx, &params),
            "findings" => findings(cx, &params),
            action @ ("resolve" | "dismiss") => change_finding(cx, action, &params),
            other => CallToolResult::error(format!("unknown action: {other}. Use: {}", ACTIONS.join(", "))),
        }
    }
}

fn list(cx: &ToolContext, params: &AlertsParams) -> CallToolResult {
    let snapshot = cx.providers().snapshot();
    let mut alerts: Vec<&Alert> = snapshot.active_alerts.iter().filter(|a| params.keeps_alert(a)).collect();
    // Critical first, newest first within a level.
    alerts.sort_by(|a, b| {
        let rank = |a: &Alert| if a.level.eq_ignore_ascii_case("critical") { 0 } else { 1 };
        rank(a).cmp(&rank(b)).then(b.started_at.cmp(&a.started_at))
    });
    let total = alerts.len();
    alerts.truncate(params.limit());
    if total == 0 {
        return CallToolResult::text("No active alerts.");
    }
    json_result(json!({"alerts": alerts, "total": total, "showing": alerts.len()}))
}

fn findings(cx: &ToolContext, params: &AlertsParams) -> CallToolResult {
    let Some(manager) = cx.providers().findings.as_ref() else {
        return CallToolResult::text("Findings are not available. AI patrol may not be enabled.");
    };
    let mut all: Vec<Finding> = manager
        .active_findings()
        .into_iter()
        .filter(|f| params.keeps_finding(f))
        .collect();
    all.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
    let total = all.len();
    all.truncate(params.limit());
    json_result(json!({"findings": all, "total": total}))
}

fn change_finding(cx: &ToolContext, action: &str, params: &AlertsParams) -> CallToolResult {
    if !writes_allowed(cx) {
        return read_only_refusal(TOOL, action);
    }
    let Some(manager) = cx.providers().findings.as_ref() else {
        return CallToolResult::error("findings manager not available");
    };
    let Some(finding_id) = params.finding_id.as_deref().filter(|f| !f.trim().is_empty()) else {
        return CallToolResult::error(format!("finding_id is required for {action}"));
    };
    let note = params.note.as_deref().unwrap_or_default();

    let outcome = if action == "resolve" {
        manager.resolve_finding(finding_id, note)
    } else {
        let Some(reason) = params.reason.as_deref() else {
            return CallToolResult::error(format!("reason is required for dismiss. Use: {}", DISMISS_REASONS.join(", ")));
        };
        if !DISMISS_REASONS.contains(&reason) {
            return CallToolResult::error(format!("invalid reason: {reason}. Use: {}", DISMISS_REASONS.join(", ")));
        }
        manager.dismiss_finding(finding_id, reason, note)
    };

    match outcome {
        Ok(()) => {
            info!(tool = TOOL, action, finding_id, "finding updated");
            let state = if action == "resolve" { "resolved" } else { "dismissed" };
            json_result(json!({"success": true, "finding_id": finding_id, "state": state}))
        }
        Err(err) => CallToolResult::error(format!("failed to {action} finding {finding_id}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn alert(id: &str, level: &str, resource: &str) -> Alert {
        Alert {
            id: id.into(),
            resource_id: resource.into(),
            resource_name: resource.into(),
            kind: "cpu".into(),
            level: level.into(),
            message: "CPU above threshold".into(),
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn severity_filter_ignores_case() {
        let params = AlertsParams {
            severity: Some("CRITICAL".into()),
            ..Default::default()
        };
        assert!(params.keeps_alert(&alert("a1", "critical", "qemu/100")));
        assert!(!params.keeps_alert(&alert("a2", "warning", "qemu/100")));
    }

    #[test]
    fn resource_filter_is_exact() {
        let params = AlertsParams {
            resource_id: Some("qemu/100".into()),
            ..Default::default()
        };
        assert!(params.keeps_alert(&alert("a1", "warning", "qemu/100")));
        assert!(!params.keeps_alert(&alert("a2", "warning", "qemu/1000")));
    }

    #[test]
    fn limit_defaults_when_unset_or_invalid() {
        assert_eq!(AlertsParams::default().limit(), DEFAULT_LIMIT);
        let params = AlertsParams {
            limit: Some(-3),
            ..Default::default()
        };
        assert_eq!(params.limit(), DEFAULT_LIMIT);
    }
}
