use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pulse_config::ApprovalConfig;

use crate::{
    ApprovalError, ApprovalRequest, ApprovalStatus, NewApproval, assess_risk_level, command_hash,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApprovalStats {
    pub pending: usize,
    pub approved: usize,
    pub consumed: usize,
    pub denied: usize,
    pub expired: usize,
}

/// In-memory approval store.  Construct one per process and share it
/// behind an `Arc`.
#[derive(Debug)]
pub struct ApprovalStore {
    approvals: Mutex<HashMap<String, ApprovalRequest>>,
    timeout: chrono::Duration,
    retention: chrono::Duration,
    max_pending: usize,
}

impl Default for ApprovalStore {
    fn default() -> Self {
        Self::new(&ApprovalConfig::default())
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn truncate(command: &str, max: usize) -> &str {
    match command.char_indices().nth(max) {
        Some((end, _)) => &command[..end],
        None => command,
    }
}

impl ApprovalStore {
    pub fn new(config: &ApprovalConfig) -> Self {
        Self {
            approvals: Mutex::new(HashMap::new()),
            timeout: to_chrono(config.timeout()),
            retention: to_chrono(config.retention()),
            max_pending: config.max_pending.max(1),
        }
    }

    pub async fn create(&self, new: NewApproval) -> Result<ApprovalRequest, ApprovalError> {
        let mut approvals = self.approvals.lock().await;
        let now = Utc::now();
        let pending = approvals
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending && !a.is_past_deadline(now))
            .count();
        if pending >= self.max_pending {
            warn!(max = self.max_pending, "approval store full");
            return Err(ApprovalError::TooManyPending(self.max_pending));
        }

        let risk_level = new
            .risk_level
            .unwrap_or_else(|| assess_risk_level(&new.command, &new.target_type));
        let req = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            execution_id: new.execution_id,
            tool_id: new.tool_id,
            command_hash: command_hash(&new.command, &new.target_type, &new.target_id),
            command: new.command,
            target_type: new.target_type,
            target_id: new.target_id,
            target_name: new.target_name,
            context: new.context,
            risk_level,
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: new.expires_at.unwrap_or(now + self.timeout),
            decided_at: None,
            decided_by: None,
            deny_reason: None,
            consumed_at: None,
        };
        info!(
            id = %req.id,
            command = truncate(&req.command, 50),
            risk = req.risk_level.as_str(),
            "created approval request"
        );
        approvals.insert(req.id.clone(), req.clone());
        Ok(req)
    }

    /// Snapshot of one approval.  A pending approval past its deadline is
    /// reported as expired; cleanup makes that permanent.
    pub async fn get(&self, id: &str) -> Option<ApprovalRequest> {
        let approvals = self.approvals.lock().await;
        let mut req = approvals.get(id)?.clone();
        if req.status == ApprovalStatus::Pending && req.is_past_deadline(Utc::now()) {
            req.status = ApprovalStatus::Expired;
        }
        Some(req)
    }

    /// Pending approvals still inside their deadline, oldest first.
    pub async fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let approvals = self.approvals.lock().await;
        let mut pending: Vec<ApprovalRequest> = approvals
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending && !a.is_past_deadline(now))
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.requested_at);
        pending
    }

    pub async fn list_by_execution(&self, execution_id: &str) -> Vec<ApprovalRequest> {
        let approvals = self.approvals.lock().await;
        let mut found: Vec<ApprovalRequest> = approvals
            .values()
            .filter(|a| a.execution_id.as_deref() == Some(execution_id))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.requested_at);
        found
    }

    /// Approve a pending request.  Approving twice is harmless.
    pub async fn approve(&self, id: &str, actor: &str) -> Result<ApprovalRequest, ApprovalError> {
        let mut approvals = self.approvals.lock().await;
        let req = approvals
            .get_mut(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        match req.status {
            ApprovalStatus::Approved => return Ok(req.clone()),
            ApprovalStatus::Pending => {}
            other => return Err(ApprovalError::NotPending(other)),
        }
        let now = Utc::now();
        if req.is_past_deadline(now) {
            req.status = ApprovalStatus::Expired;
            return Err(ApprovalError::Expired(id.to_string()));
        }

        req.status = ApprovalStatus::Approved;
        req.decided_at = Some(now);
        req.decided_by = Some(actor.to_string());
        info!(id, by = actor, command = truncate(&req.command, 50), "approval request approved");
        Ok(req.clone())
    }

    pub async fn deny(
        &self,
        id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut approvals = self.approvals.lock().await;
        let req = approvals
            .get_mut(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if req.status != ApprovalStatus::Pending {
            return Err(ApprovalError::NotPending(req.status));
        }

        req.status = ApprovalStatus::Denied;
        req.decided_at = Some(Utc::now());
        req.decided_by = Some(actor.to_string());
        if !reason.is_empty() {
            req.deny_reason = Some(reason.to_string());
        }
        info!(id, by = actor, reason, "approval request denied");
        Ok(req.clone())
    }

    /// Spend an approved request on exactly the command and target it was
    /// granted for.  Check and mark happen under one lock acquisition.
    pub async fn consume(
        &self,
        id: &str,
        command: &str,
        target_type: &str,
        target_id: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut approvals = self.approvals.lock().await;
        let req = approvals
            .get_mut(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        match req.status {
            ApprovalStatus::Approved => {}
            ApprovalStatus::Consumed => return Err(ApprovalError::AlreadyConsumed(id.to_string())),
            other => return Err(ApprovalError::NotApproved(other)),
        }
        let now = Utc::now();
        if req.is_past_deadline(now) {
            req.status = ApprovalStatus::Expired;
            return Err(ApprovalError::Expired(id.to_string()));
        }
        if req.command_hash != command_hash(command, target_type, target_id) {
            warn!(id, target_type, target_id, "approval command hash mismatch");
            return Err(ApprovalError::CommandMismatch);
        }

        req.status = ApprovalStatus::Consumed;
        req.consumed_at = Some(now);
        info!(id, command = truncate(command, 50), "approval consumed");
        Ok(req.clone())
    }

    /// Expire overdue pending requests and drop decided ones older than the
    /// retention period.  Returns how many records changed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let cutoff = now - self.retention;
        let mut approvals = self.approvals.lock().await;
        let mut cleaned = 0;

        for req in approvals.values_mut() {
            if req.status == ApprovalStatus::Pending && req.is_past_deadline(now) {
                req.status = ApprovalStatus::Expired;
                cleaned += 1;
            }
        }
        let before = approvals.len();
        approvals.retain(|_, req| {
            let last = req.consumed_at.or(req.decided_at);
            !(req.status != ApprovalStatus::Pending && last.is_some_and(|t| t <= cutoff))
        });
        cleaned += before - approvals.len();

        if cleaned > 0 {
            debug!(cleaned, "approval cleanup");
        }
        cleaned
    }

    pub async fn stats(&self) -> ApprovalStats {
        let approvals = self.approvals.lock().await;
        let mut stats = ApprovalStats::default();
        for req in approvals.values() {
            match req.status {
                ApprovalStatus::Pending => stats.pending += 1,
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Consumed => stats.consumed += 1,
                ApprovalStatus::Denied => stats.denied += 1,
                ApprovalStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `interval` until
    /// `cancel` fires.
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.cleanup_expired().await;
                    }
                }
            }
            debug!("approval cleanup stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RiskLevel;

    fn store() -> ApprovalStore {
        ApprovalStore::default()
    }

    fn stop_101() -> NewApproval {
        NewApproval::new("qm stop 101", "vm", "101").target_name("vm101")
    }

    // ── create / get ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_sets_pending_hash_and_risk() -> anyhow::Result<()> {
        let store = store();
        let req = store.create(stop_101().context("user asked to stop it")).await?;
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(req.command_hash, command_hash("qm stop 101", "vm", "101"));
        assert_eq!(req.risk_level, RiskLevel::Medium);
        assert_eq!(req.target_name, "vm101");
        assert!(req.expires_at > req.requested_at);

        let fetched = store.get(&req.id).await.expect("stored");
        assert_eq!(fetched.context, "user asked to stop it");
        assert!(store.get("missing").await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn get_reports_overdue_pending_as_expired() -> anyhow::Result<()> {
        let store = store();
        let mut new = stop_101();
        new.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let req = store.create(new).await?;
        assert_eq!(store.get(&req.id).await.unwrap().status, ApprovalStatus::Expired);
        assert!(store.list_pending().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn max_pending_is_enforced() -> anyhow::Result<()> {
        let config = ApprovalConfig {
            max_pending: 2,
            ..ApprovalConfig::default()
        };
        let store = ApprovalStore::new(&config);
        store.create(stop_101()).await?;
        store.create(stop_101()).await?;
        let err = store.create(stop_101()).await.unwrap_err();
        assert_eq!(err, ApprovalError::TooManyPending(2));
        Ok(())
    }

    #[tokio::test]
    async fn list_by_execution_groups_requests() -> anyhow::Result<()> {
        let store = store();
        let mut a = stop_101();
        a.execution_id = Some("turn-1".into());
        let mut b = NewApproval::new("pct stop 200", "container", "200");
        b.execution_id = Some("turn-1".into());
        store.create(a).await?;
        store.create(b).await?;
        store.create(stop_101()).await?;
        assert_eq!(store.list_by_execution("turn-1").await.len(), 2);
        assert_eq!(store.list_pending().await.len(), 3);
        Ok(())
    }

    // ── approve / deny ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn approve_is_idempotent() -> anyhow::Result<()> {
        let store = store();
        let req = store.create(stop_101()).await?;
        let first = store.approve(&req.id, "alice").await?;
        assert_eq!(first.status, ApprovalStatus::Approved);
        assert_eq!(first.decided_by.as_deref(), Some("alice"));
        let second = store.approve(&req.id, "bob").await?;
        assert_eq!(second.decided_by.as_deref(), Some("alice"));
        Ok(())
    }

    #[tokio::test]
    async fn approve_after_deadline_expires() -> anyhow::Result<()> {
        let store = store();
        let mut new = stop_101();
        new.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let req = store.create(new).await?;
        assert_eq!(
            store.approve(&req.id, "alice").await.unwrap_err(),
            ApprovalError::Expired(req.id.clone())
        );
        assert_eq!(store.get(&req.id).await.unwrap().status, ApprovalStatus::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn deny_records_reason_and_blocks_approval() -> anyhow::Result<()> {
        let store = store();
        let req = store.create(stop_101()).await?;
        let denied = store.deny(&req.id, "alice", "not during business hours").await?;
        assert_eq!(denied.status, ApprovalStatus::Denied);
        assert_eq!(denied.deny_reason.as_deref(), Some("not during business hours"));
        assert_eq!(
            store.approve(&req.id, "alice").await.unwrap_err(),
            ApprovalError::NotPending(ApprovalStatus::Denied)
        );
        assert_eq!(
            store.deny("nope", "alice", "").await.unwrap_err(),
            ApprovalError::NotFound("nope".into())
        );
        Ok(())
    }

    // ── consume ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn consume_is_single_use() -> anyhow::Result<()> {
        let store = store();
        let req = store.create(stop_101()).await?;
        store.approve(&req.id, "alice").await?;

        let consumed = store.consume(&req.id, "qm stop 101", "vm", "101").await?;
        assert_eq!(consumed.status, ApprovalStatus::Consumed);
        assert!(consumed.consumed_at.is_some());
        assert_eq!(
            store.consume(&req.id, "qm stop 101", "vm", "101").await.unwrap_err(),
            ApprovalError::AlreadyConsumed(req.id.clone())
        );
        Ok(())
    }

    #[tokio::test]
    async fn consume_requires_approval() -> anyhow::Result<()> {
        let store = store();
        let req = store.create(stop_101()).await?;
        assert_eq!(
            store.consume(&req.id, "qm stop 101", "vm", "101").await.unwrap_err(),
            ApprovalError::NotApproved(ApprovalStatus::Pending)
        );
        assert_eq!(
            store.consume("unknown", "qm stop 101", "vm", "101").await.unwrap_err(),
            ApprovalError::NotFound("unknown".into())
        );
        Ok(())
    }

    #[tokio::test]
    async fn consume_rejects_other_command_or_target() -> anyhow::Result<()> {
        let store = store();
        let req = store.create(stop_101()).await?;
        store.approve(&req.id, "alice").await?;

        for (cmd, ty, id) in [
            ("qm stop 102", "vm", "101"),
            ("qm stop 101", "container", "101"),
            ("qm stop 101", "vm", "102"),
        ] {
            assert_eq!(
                store.consume(&req.id, cmd, ty, id).await.unwrap_err(),
                ApprovalError::CommandMismatch
            );
        }
        // a mismatch does not spend it
        store.consume(&req.id, "qm stop 101", "vm", "101").await?;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_consume_has_one_winner() -> anyhow::Result<()> {
        let store = Arc::new(store());
        let req = store.create(stop_101()).await?;
        store.approve(&req.id, "alice").await?;

        let attempts = (0..16).map(|_| {
            let store = Arc::clone(&store);
            let id = req.id.clone();
            tokio::spawn(async move { store.consume(&id, "qm stop 101", "vm", "101").await })
        });
        let results = futures::future::join_all(attempts).await;
        let wins = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(store.get(&req.id).await.unwrap().status, ApprovalStatus::Consumed);
        Ok(())
    }

    // ── cleanup / stats ────────────────────────────────────────────────────

    #[tokio::test]
    async fn cleanup_expires_and_purges() -> anyhow::Result<()> {
        let config = ApprovalConfig {
            retention_secs: 0,
            ..ApprovalConfig::default()
        };
        let store = ApprovalStore::new(&config);

        let mut overdue = stop_101();
        overdue.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let overdue = store.create(overdue).await?;
        let denied = store.create(stop_101()).await?;
        store.deny(&denied.id, "alice", "").await?;
        let live = store.create(stop_101()).await?;

        let cleaned = store.cleanup_expired().await;
        assert_eq!(cleaned, 2);
        assert_eq!(store.get(&overdue.id).await.unwrap().status, ApprovalStatus::Expired);
        assert!(store.get(&denied.id).await.is_none());
        assert_eq!(store.get(&live.id).await.unwrap().status, ApprovalStatus::Pending);
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_every_status() -> anyhow::Result<()> {
        let store = store();
        let a = store.create(stop_101()).await?;
        let b = store.create(stop_101()).await?;
        let c = store.create(stop_101()).await?;
        store.create(stop_101()).await?;
        store.approve(&a.id, "alice").await?;
        store.approve(&b.id, "alice").await?;
        store.consume(&b.id, "qm stop 101", "vm", "101").await?;
        store.deny(&c.id, "alice", "no").await?;

        let stats = store.stats().await;
        assert_eq!(
            stats,
            ApprovalStats {
                pending: 1,
                approved: 1,
                consumed: 1,
                denied: 1,
                expired: 0,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn background_cleanup_stops_on_cancel() -> anyhow::Result<()> {
        let store = Arc::new(store());
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&store).spawn_cleanup(Duration::from_millis(10), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await??;
        Ok(())
    }
}
