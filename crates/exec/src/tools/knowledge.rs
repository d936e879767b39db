//! `pulse_knowledge`: durable notes about resources.  `remember` writes,
//! `recall` reads.

use async_trait::async_trait;
use pulse_tools::args::lenient;
use pulse_tools::{CallToolResult, Tool, ToolAccess, ToolArgs, ToolMetadata, ToolParam, ToolSpec};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{bad_args, json_result, read_only_refusal, writes_allowed};
use crate::executor::ToolContext;

const TOOL: &str = "pulse_knowledge";
const CATEGORIES: &[&str] = &["service", "config", "issue", "credential_hint", "learning", "general"];
const MAX_NOTE_LEN: usize = 4000;

#[derive(Debug, Default, Deserialize)]
struct KnowledgeParams {
    #[serde(default, deserialize_with = "lenient::string")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resource_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    note: Option<String>,
}

pub struct KnowledgeTool;

#[async_trait]
impl Tool<ToolContext> for KnowledgeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL.into(),
            description: "Remember facts about a resource for future sessions, or recall what was learned \
                          before."
                .into(),
            params: vec![
                ToolParam::required("action", "remember or recall").one_of(&["remember", "recall"]),
                ToolParam::required("resource_id", "Resource the note is about"),
                ToolParam::optional("category", "Note category").one_of(CATEGORIES),
                ToolParam::optional("note", "For remember: the note text"),
            ],
            metadata: ToolMetadata {
                access: ToolAccess::Mixed,
                require_control: false,
            },
        }
    }

    fn is_available(&self, cx: &ToolContext) -> bool {
        cx.providers().knowledge.is_some()
    }

    async fn call(&self, cx: &ToolContext, args: &ToolArgs) -> CallToolResult {
        let params: KnowledgeParams = match args.parse() {
            Ok(p) => p,
            Err(err) => return bad_args(err),
        };
        let Some(store) = cx.providers().knowledge.as_ref() else {
            return CallToolResult::text("Knowledge store not available.");
        };
        let Some(resource_id) = params.resource_id.as_deref().filter(|r| !r.trim().is_empty()) else {
            return CallToolResult::error("resource_id is required");
        };
        let category = params.category.as_deref();
        if let Some(c) = category {
            if !CATEGORIES.contains(&c) {
                return CallToolResult::error(format!("invalid category: {c}. Use: {}", CATEGORIES.join(", ")));
            }
        }

        match params.action.as_deref().unwrap_or_default() {
            "remember" => {
                if !writes_allowed(cx) {
                    return read_only_refusal(TOOL, "remember");
                }
                let Some(note) = params.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                    return CallToolResult::error("note is required for remember");
                };
                if note.chars().count() > MAX_NOTE_LEN {
                    return CallToolResult::error(format!("note is too long (max {MAX_NOTE_LEN} characters)"));
                }
                match store.save_note(resource_id, category.unwrap_or("general"), note) {
                    Ok(entry) => {
                        info!(tool = TOOL, resource_id, category = %entry.category, "note saved");
                        json_result(json!({"success": true, "entry": entry}))
                    }
                    Err(err) => CallToolResult::error(format!("failed to save note: {err}")),
                }
            }
            "recall" => {
                let entries = store.knowledge(resource_id, category);
                if entries.is_empty() {
                    return CallToolResult::text(format!("No saved knowledge for '{resource_id}'."));
                }
                json_result(json!({"resource_id": resource_id, "total": entries.len(), "entries": entries}))
            }
            other => CallToolResult::error(format!("unknown action: {other}. Use: remember, recall")),
        }
    }
}
