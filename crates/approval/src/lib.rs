//! Approval store for write operations.
//!
//! An approval binds one exact command to one target.  The lifecycle is
//!
//! ```text
//! pending ──approve──▶ approved ──consume──▶ consumed
//!    │                    │
//!    ├──deny──▶ denied    └──(deadline)──▶ expired
//!    └──(deadline)──▶ expired
//! ```
//!
//! `consume` is a single check-and-mark under the store lock, so an approval
//! runs at most one command no matter how many callers race for it.

pub mod risk;
pub mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use risk::{RiskLevel, assess_risk_level};
pub use store::{ApprovalStats, ApprovalStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Consumed,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Consumed => "consumed",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    /// Groups approvals raised by the same conversation turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    pub command: String,
    /// `host`, `container`, `vm` or `node`.
    pub target_type: String,
    pub target_id: String,
    pub target_name: String,
    /// Why the assistant wants to run this.
    pub context: String,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    pub command_hash: String,
}

impl ApprovalRequest {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Input to [`ApprovalStore::create`].
#[derive(Debug, Clone, Default)]
pub struct NewApproval {
    pub command: String,
    pub target_type: String,
    pub target_id: String,
    pub target_name: String,
    pub context: String,
    pub execution_id: Option<String>,
    pub tool_id: Option<String>,
    /// Assessed from the command when absent.
    pub risk_level: Option<RiskLevel>,
    /// Defaults to now + the store timeout.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewApproval {
    pub fn new(
        command: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
            ..Self::default()
        }
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval request not found: {0}")]
    NotFound(String),
    #[error("approval request is not pending (status: {0})")]
    NotPending(ApprovalStatus),
    #[error("approval request is not approved (status: {0})")]
    NotApproved(ApprovalStatus),
    #[error("approval request {0} has already been consumed")]
    AlreadyConsumed(String),
    #[error("approval request {0} has expired")]
    Expired(String),
    #[error("approval command mismatch: this approval is for a different command or target")]
    CommandMismatch,
    #[error("maximum pending approvals ({0}) reached")]
    TooManyPending(usize),
}

/// Lowercase hex SHA-256 of `command|target_type|target_id`.
pub fn command_hash(command: &str, target_type: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_bytes());
    hasher.update(b"|");
    hasher.update(target_type.as_bytes());
    hasher.update(b"|");
    hasher.update(target_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_field_sensitive() {
        let h = command_hash("qm stop 101", "vm", "101");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h, command_hash("qm stop 101", "vm", "101"));
        assert_ne!(h, command_hash("qm stop 102", "vm", "101"));
        assert_ne!(h, command_hash("qm stop 101", "container", "101"));
        assert_ne!(h, command_hash("qm stop 101", "vm", "102"));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ApprovalStatus::Consumed).unwrap(), "\"consumed\"");
        assert_eq!(ApprovalStatus::Denied.to_string(), "denied");
    }

    #[test]
    fn errors_render_status() {
        let err = ApprovalError::NotApproved(ApprovalStatus::Pending);
        assert_eq!(err.to_string(), "approval request is not approved (status: pending)");
    }
}
