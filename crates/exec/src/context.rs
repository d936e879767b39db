//! Per-session record of what the model has actually seen.
//!
//! Query and discovery tools register resources here; action tools check
//! against it before touching anything.  Two clocks are kept per resource:
//! `last_access` moves on every registration and lookup, `explicit_access`
//! moves only when the model asked about that one resource.  Routing
//! decisions look at the second clock alone, so listing a whole node never
//! makes its guests look "recently referenced".

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::state::ResourceKind;

/// Everything a tool knows about a resource when it registers it.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistration {
    pub kind: Option<ResourceKind>,
    /// Stable per-kind id: the VMID for guests, container id for Docker.
    pub provider_uid: String,
    pub name: String,
    /// Extra names that resolve to this resource.  `name` is always added.
    pub aliases: Vec<String>,
    pub node: String,
    pub vmid: Option<u32>,
    /// Docker host or agent the resource lives on.
    pub host_name: String,
    pub agent_id: String,
}

impl ResourceRegistration {
    pub fn new(kind: ResourceKind, provider_uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            provider_uid: provider_uid.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn vmid(mut self, vmid: u32) -> Self {
        self.vmid = Some(vmid);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !alias.is_empty() {
            self.aliases.push(alias);
        }
        self
    }

    pub fn host(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedResource {
    /// `kind:provider_uid`
    pub resource_id: String,
    pub kind: Option<ResourceKind>,
    pub provider_uid: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub node: String,
    pub vmid: Option<u32>,
    pub host_name: String,
    pub agent_id: String,
}

/// Canonical id for a resource.  Unknown kinds fall back to the name.
pub fn resource_id(kind: Option<ResourceKind>, provider_uid: &str, name: &str) -> String {
    let kind = kind.map(|k| k.as_str()).unwrap_or("unknown");
    let uid = if provider_uid.is_empty() { name } else { provider_uid };
    format!("{kind}:{uid}")
}

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, ResolvedResource>,
    /// Lowercased alias to resource id.
    by_alias: HashMap<String, String>,
    last_access: HashMap<String, Instant>,
    explicit_access: HashMap<String, Instant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub resources: usize,
    pub aliases: usize,
    pub explicitly_accessed: usize,
}

/// Shared by every tool call in one session.  Writes are rare; reads come
/// from concurrent tool calls.
#[derive(Debug, Default)]
pub struct ResolvedContext {
    session_id: String,
    inner: RwLock<Inner>,
}

impl ResolvedContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            inner: RwLock::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    // A poisoned lock means a tool panicked mid-update; the maps are still
    // consistent entry by entry.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a discovered resource.  Leaves the explicit-access clock
    /// alone.  An alias already pointing elsewhere is taken over by the newer
    /// registration.
    pub fn add_resolved_resource(&self, reg: ResourceRegistration) -> String {
        let id = resource_id(reg.kind, &reg.provider_uid, &reg.name);

        let mut aliases = Vec::with_capacity(reg.aliases.len() + 1);
        for alias in std::iter::once(&reg.name).chain(reg.aliases.iter()) {
            if !alias.is_empty() && !aliases.contains(alias) {
                aliases.push(alias.clone());
            }
        }

        let resource = ResolvedResource {
            resource_id: id.clone(),
            kind: reg.kind,
            provider_uid: reg.provider_uid,
            name: reg.name,
            aliases,
            node: reg.node,
            vmid: reg.vmid,
            host_name: reg.host_name,
            agent_id: reg.agent_id,
        };

        let mut inner = self.write();
        for alias in &resource.aliases {
            inner.by_alias.insert(alias.to_lowercase(), id.clone());
        }
        inner.last_access.insert(id.clone(), Instant::now());
        inner.by_id.insert(id.clone(), resource);
        id
    }

    /// The model looked at this one resource.
    pub fn mark_explicit_access(&self, resource_id: &str) {
        self.mark_explicit_access_at(resource_id, Instant::now());
    }

    /// Like [`mark_explicit_access`](Self::mark_explicit_access) with a
    /// caller-supplied instant.  An earlier instant never replaces a later one.
    /// Ids that were never registered are ignored.
    pub fn mark_explicit_access_at(&self, resource_id: &str, at: Instant) {
        let mut inner = self.write();
        if !inner.by_id.contains_key(resource_id) {
            debug!(resource_id, "explicit access for unregistered resource ignored");
            return;
        }
        let slot = inner.explicit_access.entry(resource_id.to_string()).or_insert(at);
        if at > *slot {
            *slot = at;
        }
    }

    pub fn by_alias(&self, alias: &str) -> Option<ResolvedResource> {
        let mut inner = self.write();
        let id = inner.by_alias.get(&alias.to_lowercase())?.clone();
        let resource = inner.by_id.get(&id)?.clone();
        inner.last_access.insert(id, Instant::now());
        Some(resource)
    }

    pub fn by_id(&self, resource_id: &str) -> Option<ResolvedResource> {
        self.read().by_id.get(resource_id).cloned()
    }

    pub fn has_any_resources(&self) -> bool {
        !self.read().by_id.is_empty()
    }

    pub fn was_recently_accessed(&self, resource_id: &str, window: Duration) -> bool {
        self.read()
            .explicit_access
            .get(resource_id)
            .is_some_and(|at| at.elapsed() <= window)
    }

    /// Ids explicitly accessed within `window`, most recent first.
    pub fn recently_accessed(&self, window: Duration) -> Vec<String> {
        let inner = self.read();
        let mut recent: Vec<(&String, &Instant)> = inner
            .explicit_access
            .iter()
            .filter(|(_, at)| at.elapsed() <= window)
            .collect();
        recent.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        recent.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Recently accessed resources of the given kinds living on `node`.
    pub fn recent_children_of(
        &self,
        node: &str,
        kinds: &[ResourceKind],
        window: Duration,
    ) -> Vec<ResolvedResource> {
        let recent = self.recently_accessed(window);
        let inner = self.read();
        recent
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|r| r.node == node && r.kind.is_some_and(|k| kinds.contains(&k)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ContextStats {
        let inner = self.read();
        ContextStats {
            resources: inner.by_id.len(),
            aliases: inner.by_alias.len(),
            explicitly_accessed: inner.explicit_access.len(),
        }
    }

    pub fn clear(&self) {
        *self.write() = Inner::default();
    }
}
