pub mod events;

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::info;

use crate::events::AuditEvent;

pub const STRICT_RESOLUTION_BLOCK: &str = "strict_resolution_block";
pub const ROUTING_MISMATCH_BLOCK: &str = "routing_mismatch_block";
pub const AUTO_RECOVERY_ATTEMPT: &str = "auto_recovery_attempt";
pub const AUTO_RECOVERY_SUCCESS: &str = "auto_recovery_success";

fn event(kind: &str, tool: Option<&str>, details: impl Into<String>) -> AuditEvent {
    AuditEvent {
        kind: kind.to_string(),
        tool: tool.map(str::to_string),
        details: details.into(),
        timestamp: Utc::now(),
    }
}

pub fn strict_resolution_event(tool: &str, action: &str) -> AuditEvent {
    event(STRICT_RESOLUTION_BLOCK, Some(tool), format!("action={action}"))
}

pub fn routing_mismatch_event(tool: &str, target_kind: &str, child_kind: &str) -> AuditEvent {
    event(
        ROUTING_MISMATCH_BLOCK,
        Some(tool),
        format!("target_kind={target_kind} child_kind={child_kind}"),
    )
}

pub fn recovery_event(kind: &str, code: &str, tool: &str) -> AuditEvent {
    event(kind, Some(tool), format!("code={code}"))
}

// ── Telemetry callback ──────────────────────────────────────────────────────

/// Counters the executor reports as guards fire.  Implementations must be
/// cheap and must not block; they run on the invocation path.
pub trait Telemetry: Send + Sync {
    fn record_strict_resolution_block(&self, tool: &str, action: &str);
    fn record_routing_mismatch_block(&self, tool: &str, target_kind: &str, child_kind: &str);
    fn record_auto_recovery_attempt(&self, code: &str, tool: &str);
    fn record_auto_recovery_success(&self, code: &str, tool: &str);
}

/// Events kept by [`AuditLog::new`].
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

/// In-memory audit trail.  Every telemetry callback becomes an
/// [`AuditEvent`] and a structured log line.  Only the newest `capacity`
/// events are kept; per-kind counts cover everything ever recorded.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    events: VecDeque<AuditEvent>,
    counts: HashMap<String, usize>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Recorded::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, evt: AuditEvent) {
        info!(kind = %evt.kind, tool = ?evt.tool, details = %evt.details, "audit");
        let mut rec = self.lock();
        *rec.counts.entry(evt.kind.clone()).or_default() += 1;
        if rec.events.len() == self.capacity {
            rec.events.pop_front();
        }
        rec.events.push_back(evt);
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Events of `kind` recorded since creation, evicted ones included.
    pub fn count(&self, kind: &str) -> usize {
        self.lock().counts.get(kind).copied().unwrap_or(0)
    }
}

impl Telemetry for AuditLog {
    fn record_strict_resolution_block(&self, tool: &str, action: &str) {
        self.push(strict_resolution_event(tool, action));
    }

    fn record_routing_mismatch_block(&self, tool: &str, target_kind: &str, child_kind: &str) {
        self.push(routing_mismatch_event(tool, target_kind, child_kind));
    }

    fn record_auto_recovery_attempt(&self, code: &str, tool: &str) {
        self.push(recovery_event(AUTO_RECOVERY_ATTEMPT, code, tool));
    }

    fn record_auto_recovery_success(&self, code: &str, tool: &str) {
        self.push(recovery_event(AUTO_RECOVERY_SUCCESS, code, tool));
    }
}
