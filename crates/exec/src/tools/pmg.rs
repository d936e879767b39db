//! `pulse_pmg`: Proxmox Mail Gateway status, mail flow, queues and quarantine.

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{bad_args, json_result};
use crate::executor::ToolContext;
use crate::model::PmgInstance;

const TOOL: &str = "pulse_pmg";
const TYPES: &[&str] = &["status", "mail_stats", "queues", "spam"];

#[derive(Debug, Default, Deserialize)]
struct PmgParams {
    #[serde(default, rename = "type", deserialize_with = "lenient::string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    instance: Option<String>,
}

pub struct PmgTool;

#[async_trait]
impl Tool<ToolContext> for PmgTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Proxmox Mail Gateway: instance status, mail flow statistics, queue depth and \
                          spam/virus quarantine."
                .into(),
            params: vec![
                ToolParam::required("type", "What to query").one_of(TYPES),
                ToolParam::optional("instance", "Filter by PMG instance ID or name"),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Read,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().state.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: PmgParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let kind = params.kind.as_deref().unwrap_or_default();
        if !TYPES.contains(&kind) {
            return CallToolResult::error(format!("unknown type: {kind}. Use: {}", TYPES.join(", ")));
        }
        let snapshot = cx.providers().snapshot();
        render(kind, &snapshot.pmg_instances, params.instance.as_deref())
    }
}

fn render(kind: &str, instances: &[PmgInstance], filter: Option<&str>) -> CallToolResult {
    if instances.is_empty() {
        return CallToolResult::text("No Mail Gateway instances found. PMG monitoring may not be configured.");
    }
    let selected: Vec<&PmgInstance> = instances
        .iter()
        .filter(|i| filter.is_none_or(|f| i.id == f || i.name == f))
        .collect();
    if selected.is_empty() {
        let name = filter.unwrap_or_default();
        return CallToolResult::text(format!("Mail Gateway instance '{name}' not found."));
    }

    let rows: Vec<Value> = selected
        .iter()
        .map(|i| match kind {
            "status" => json!({
                "id": i.id,
                "name": i.name,
                "status": i.status,
                "version": i.version,
                "queued": i.queues.iter().map(|q| q.active + q.deferred + q.hold).sum::<u64>(),
            }),
            "mail_stats" => json!({"name": i.name, "mail": i.mail}),
            "queues" => json!({
                "name": i.name,
                "queues": i.queues,
                "deferred_total": i.queues.iter().map(|q| q.deferred).sum::<u64>(),
            }),
            _ => json!({
                "name": i.name,
                "quarantine": i.quarantine,
                "spam_in": i.mail.spam_in,
                "virus_in": i.mail.virus_in,
                "spam_rate": spam_rate(i),
            }),
        })
        .collect();
    json_result(json!({"type": kind, "instances": rows, "total": rows.len()}))
}

/// Percent of inbound mail classed as spam.
fn spam_rate(instance: &PmgInstance) -> f64 {
    if instance.mail.inbound == 0 {
        return 0.0;
    }
    instance.mail.spam_in as f64 / instance.mail.inbound as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MailQueue, MailStats};

    fn gateway() -> PmgInstance {
        PmgInstance {
            id: "pmg-1".into(),
            name: "mail".into(),
            status: "online".into(),
            version: "8.1".into(),
            mail: MailStats {
                inbound: 200,
                spam_in: 50,
                ..Default::default()
            },
            queues: vec![
                MailQueue {
                    node: "mx1".into(),
                    active: 1,
                    deferred: 4,
                    hold: 0,
                },
                MailQueue {
                    node: "mx2".into(),
                    active: 0,
                    deferred: 2,
                    hold: 1,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn status_sums_queues() {
        let out = render("status", &[gateway()], None).json_content().unwrap();
        assert_eq!(out["instances"][0]["queued"], 8);
        assert_eq!(out["total"], 1);
    }

    #[test]
    fn queues_total_deferred() {
        let out = render("queues", &[gateway()], Some("mail")).json_content().unwrap();
        assert_eq!(out["instances"][0]["deferred_total"], 6);
    }

    #[test]
    fn spam_rate_handles_quiet_gateway() {
        assert_eq!(spam_rate(&gateway()), 25.0);
        assert_eq!(spam_rate(&PmgInstance::default()), 0.0);
    }

    #[test]
    fn missing_instance_is_reported() {
        assert_eq!(
            render("status", &[gateway()], Some("other")).text_content(),
            "Mail Gateway instance 'other' not found."
        );
        assert!(render("status", &[], None).text_content().starts_with("No Mail Gateway instances"));
    }
}
