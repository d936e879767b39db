use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single guard or approval decision worth keeping for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: String,
    /// Tool that triggered the event, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}
