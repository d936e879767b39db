//! Command routing: which agent runs a command, and how it gets inside the
//! intended guest.
//!
//! The topology in the [`Snapshot`] is authoritative.  Agent hostnames are
//! only consulted when the snapshot has never heard of the target, so an
//! agent that happens to share a name with an LXC can never pull a command
//! out of that container and onto its node.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::providers::ConnectedAgent;
use crate::state::{ResourceKind, ResourceLocation, Snapshot};

/// Docker container → LXC/VM → node.
const MAX_ROUTE_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Direct,
    PctExec,
    QmGuestExec,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Direct => "direct",
            Transport::PctExec => "pct_exec",
            Transport::QmGuestExec => "qm_guest_exec",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    #[default]
    Host,
    Container,
    Vm,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Host => "host",
            TargetType::Container => "container",
            TargetType::Vm => "vm",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a command will run.  An empty `agent_id` means no agent can take
/// it; the other fields still describe what the target resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingResult {
    pub agent_id: String,
    pub target_type: TargetType,
    /// VMID for guests, empty for hosts.
    pub target_id: String,
    pub agent_hostname: String,
    pub resolved_kind: Option<ResourceKind>,
    pub resolved_node: String,
    pub transport: Transport,
}

impl RoutingResult {
    pub fn is_routed(&self) -> bool {
        !self.agent_id.is_empty()
    }

    pub fn resolved_kind_str(&self) -> &'static str {
        self.resolved_kind.map(|k| k.as_str()).unwrap_or("")
    }

    /// Where the command actually ran, for response envelopes.
    pub fn provenance(&self, requested_target: &str) -> Value {
        json!({
            "requested_target_host": requested_target,
            "resolved_kind": self.resolved_kind_str(),
            "resolved_node": self.resolved_node,
            "agent_host": self.agent_hostname,
            "transport": self.transport.as_str(),
            "target_type": self.target_type.as_str(),
            "target_id": self.target_id,
        })
    }

    fn attach(&mut self, agents: &[ConnectedAgent], agent_id: Option<String>) {
        if let Some(id) = agent_id {
            if let Some(agent) = agents.iter().find(|a| a.agent_id == id) {
                self.agent_hostname = agent.hostname.clone();
            }
            self.agent_id = id;
        }
    }
}

/// The agent running on a Proxmox node: hostname equal to the node name,
/// else a host agent linked to the node's id.
pub fn find_agent_for_node(snapshot: &Snapshot, agents: &[ConnectedAgent], node: &str) -> Option<String> {
    if node.is_empty() {
        return None;
    }
    if let Some(agent) = agents.iter().find(|a| a.hostname == node) {
        return Some(agent.agent_id.clone());
    }

    let node_ids: Vec<&str> = snapshot
        .nodes
        .iter()
        .filter(|n| n.name == node)
        .map(|n| n.id.as_str())
        .collect();
    snapshot
        .hosts
        .iter()
        .filter(|h| h.linked_node_id.as_deref().is_some_and(|id| node_ids.contains(&id)))
        .find_map(|h| {
            agents
                .iter()
                .find(|a| a.hostname == h.hostname || a.agent_id == h.id)
                .map(|a| a.agent_id.clone())
        })
}

/// Resolve `target_host` to an agent and transport.
pub fn resolve_route(snapshot: &Snapshot, agents: &[ConnectedAgent], target_host: &str) -> RoutingResult {
    let mut result = RoutingResult::default();
    if agents.is_empty() {
        return result;
    }

    if target_host.is_empty() {
        if let [only] = agents {
            result.agent_id = only.agent_id.clone();
            result.agent_hostname = only.hostname.clone();
            result.resolved_kind = Some(ResourceKind::Host);
        }
        return result;
    }

    let loc = snapshot.resolve_resource(target_host);
    if loc.found {
        if let Some(routed) = route_location(snapshot, agents, &loc, 0) {
            debug!(
                target_host,
                agent_id = %routed.agent_id,
                resolved_kind = routed.resolved_kind_str(),
                transport = %routed.transport,
                "routed by topology"
            );
            return routed;
        }
    }

    // Unknown to the topology: plain hosts with an agent on them.
    if let Some(agent) = agents
        .iter()
        .find(|a| a.hostname == target_host || a.agent_id == target_host)
    {
        result.agent_id = agent.agent_id.clone();
        result.agent_hostname = agent.hostname.clone();
        result.resolved_kind = Some(ResourceKind::Host);
        debug!(target_host, agent_id = %agent.agent_id, "routed by agent hostname");
    }
    result
}

/// `None` only for a standalone Docker host with no agent, which falls back
/// to hostname matching.
fn route_location(
    snapshot: &Snapshot,
    agents: &[ConnectedAgent],
    loc: &ResourceLocation,
    depth: usize,
) -> Option<RoutingResult> {
    let mut result = RoutingResult {
        resolved_kind: loc.kind,
        resolved_node: loc.node.clone(),
        ..RoutingResult::default()
    };

    match loc.kind? {
        ResourceKind::Node => {
            result.attach(agents, find_agent_for_node(snapshot, agents, &loc.node));
            Some(result)
        }
        ResourceKind::Lxc => {
            result.target_type = TargetType::Container;
            result.transport = Transport::PctExec;
            result.target_id = loc.vmid.map(|v| v.to_string()).unwrap_or_default();
            result.attach(agents, find_agent_for_node(snapshot, agents, &loc.node));
            Some(result)
        }
        ResourceKind::Vm => {
            result.target_type = TargetType::Vm;
            result.transport = Transport::QmGuestExec;
            result.target_id = loc.vmid.map(|v| v.to_string()).unwrap_or_default();
            result.attach(agents, find_agent_for_node(snapshot, agents, &loc.node));
            Some(result)
        }
        ResourceKind::DockerContainer | ResourceKind::DockerHost => {
            if let (Some(host_kind), Some(vmid)) = (loc.docker_host_kind, loc.docker_host_vmid) {
                if depth >= MAX_ROUTE_DEPTH {
                    return Some(result);
                }
                let guest = ResourceLocation {
                    found: true,
                    name: loc.docker_host_name.clone(),
                    kind: Some(host_kind),
                    node: loc.node.clone(),
                    vmid: Some(vmid),
                    ..ResourceLocation::default()
                };
                let mut routed = route_location(snapshot, agents, &guest, depth + 1)?;
                routed.resolved_kind = loc.kind;
                return Some(routed);
            }

            // Standalone Docker host: its own agent, by id then hostname.
            let host = snapshot.find_docker_host(&loc.docker_host_name);
            let agent = host.and_then(|h| {
                h.agent_id
                    .as_deref()
                    .and_then(|id| agents.iter().find(|a| a.agent_id == id))
                    .or_else(|| agents.iter().find(|a| a.hostname == h.hostname || a.agent_id == h.hostname))
            })?;
            result.agent_id = agent.agent_id.clone();
            result.agent_hostname = agent.hostname.clone();
            Some(result)
        }
        ResourceKind::Host => None,
    }
}

/// Agent labels for error messages: at most `max` names, then `(+N more)`.
pub fn format_agent_list(agents: &[ConnectedAgent], max: usize) -> Option<String> {
    let names: Vec<&str> = agents.iter().map(|a| a.label()).filter(|n| !n.is_empty()).collect();
    if names.is_empty() {
        return None;
    }
    let mut list = names.iter().take(max).copied().collect::<Vec<_>>().join(", ");
    if names.len() > max {
        list.push_str(&format!(" (+{} more)", names.len() - max));
    }
    Some(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DockerContainer, DockerHost, Guest, HostInfo, Node};

    fn agent(id: &str, hostname: &str) -> ConnectedAgent {
        ConnectedAgent {
            agent_id: id.into(),
            hostname: hostname.into(),
            capabilities: vec![],
        }
    }

    fn guest(vmid: u32, name: &str, node: &str) -> Guest {
        Guest {
            id: format!("{node}-{vmid}"),
            vmid,
            name: name.into(),
            node: node.into(),
            status: "running".into(),
            ..Default::default()
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            nodes: vec![Node {
                id: "node-delly".into(),
                name: "delly".into(),
                status: "online".into(),
                ..Default::default()
            }],
            vms: vec![guest(300, "docker-vm", "delly")],
            containers: vec![guest(141, "homepage-docker", "delly")],
            docker_hosts: vec![
                DockerHost {
                    id: "dh-vm".into(),
                    hostname: "docker-vm".into(),
                    status: "online".into(),
                    containers: vec![DockerContainer {
                        id: "c1".into(),
                        name: "grafana".into(),
                        state: "running".into(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                DockerHost {
                    id: "dh-nas".into(),
                    hostname: "nas".into(),
                    agent_id: Some("agent-nas".into()),
                    status: "online".into(),
                    containers: vec![DockerContainer {
                        id: "c2".into(),
                        name: "minio".into(),
                        state: "running".into(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn no_agents_routes_nowhere() {
        let r = resolve_route(&snapshot(), &[], "delly");
        assert!(!r.is_routed());
    }

    #[test]
    fn empty_target_needs_exactly_one_agent() {
        let snap = snapshot();
        let one = [agent("a1", "delly")];
        let r = resolve_route(&snap, &one, "");
        assert_eq!(r.agent_id, "a1");
        assert_eq!(r.resolved_kind, Some(ResourceKind::Host));

        let two = [agent("a1", "delly"), agent("a2", "nas")];
        assert!(!resolve_route(&snap, &two, "").is_routed());
    }

    #[test]
    fn node_routes_direct_to_node_agent() {
        let r = resolve_route(&snapshot(), &[agent("agent-delly", "delly")], "delly");
        assert_eq!(r.agent_id, "agent-delly");
        assert_eq!(r.transport, Transport::Direct);
        assert_eq!(r.target_type, TargetType::Host);
        assert_eq!(r.resolved_kind, Some(ResourceKind::Node));
    }

    #[test]
    fn topology_beats_colliding_agent_hostname() {
        let agents = [
            agent("agent-delly", "delly"),
            agent("agent-homepage-docker", "homepage-docker"),
        ];
        let r = resolve_route(&snapshot(), &agents, "homepage-docker");
        assert_eq!(r.agent_id, "agent-delly");
        assert_eq!(r.transport, Transport::PctExec);
        assert_eq!(r.target_type, TargetType::Container);
        assert_eq!(r.target_id, "141");
        assert_eq!(r.resolved_node, "delly");
    }

    #[test]
    fn vm_uses_guest_agent_transport() {
        let r = resolve_route(&snapshot(), &[agent("agent-delly", "delly")], "300");
        assert_eq!(r.transport, Transport::QmGuestExec);
        assert_eq!(r.target_type, TargetType::Vm);
        assert_eq!(r.target_id, "300");
    }

    #[test]
    fn guest_without_node_agent_keeps_kind_but_no_agent() {
        let r = resolve_route(&snapshot(), &[agent("agent-nas", "nas")], "homepage-docker");
        assert!(!r.is_routed());
        assert_eq!(r.target_type, TargetType::Container);
        assert_eq!(r.resolved_kind, Some(ResourceKind::Lxc));
    }

    #[test]
    fn docker_container_in_vm_recurses_to_node() {
        let r = resolve_route(&snapshot(), &[agent("agent-delly", "delly")], "grafana");
        assert_eq!(r.agent_id, "agent-delly");
        assert_eq!(r.transport, Transport::QmGuestExec);
        assert_eq!(r.target_id, "300");
        assert_eq!(r.resolved_kind, Some(ResourceKind::DockerContainer));
    }

    #[test]
    fn standalone_docker_host_uses_its_agent() {
        let agents = [agent("agent-delly", "delly"), agent("agent-nas", "nas-box")];
        let r = resolve_route(&snapshot(), &agents, "minio");
        assert_eq!(r.agent_id, "agent-nas");
        assert_eq!(r.transport, Transport::Direct);
        assert_eq!(r.resolved_kind, Some(ResourceKind::DockerContainer));
    }

    #[test]
    fn unknown_target_falls_back_to_agent_hostname() {
        let agents = [agent("agent-delly", "delly"), agent("agent-pi", "raspberrypi")];
        let r = resolve_route(&snapshot(), &agents, "raspberrypi");
        assert_eq!(r.agent_id, "agent-pi");
        assert_eq!(r.transport, Transport::Direct);
        assert_eq!(r.resolved_kind, Some(ResourceKind::Host));

        let by_id = resolve_route(&snapshot(), &agents, "agent-pi");
        assert_eq!(by_id.agent_id, "agent-pi");

        assert!(!resolve_route(&snapshot(), &agents, "nowhere").is_routed());
    }

    #[test]
    fn node_agent_found_through_linked_host() {
        let mut snap = snapshot();
        snap.hosts.push(HostInfo {
            id: "host-7".into(),
            hostname: "delly.lan".into(),
            status: "online".into(),
            linked_node_id: Some("node-delly".into()),
            ..Default::default()
        });
        let agents = [agent("agent-7", "delly.lan")];
        assert_eq!(find_agent_for_node(&snap, &agents, "delly").as_deref(), Some("agent-7"));
    }

    #[test]
    fn routing_invariants_hold_for_every_guest() {
        let snap = snapshot();
        let agents = [agent("agent-delly", "delly"), agent("x", "homepage-docker"), agent("y", "docker-vm")];
        for name in ["homepage-docker", "141", "docker-vm", "300"] {
            let r = resolve_route(&snap, &agents, name);
            match r.resolved_kind {
                Some(ResourceKind::Lxc) => {
                    assert_eq!(r.transport, Transport::PctExec, "{name}");
                    assert_eq!(r.target_type, TargetType::Container, "{name}");
                }
                Some(ResourceKind::Vm) => {
                    assert_eq!(r.transport, Transport::QmGuestExec, "{name}");
                    assert_eq!(r.target_type, TargetType::Vm, "{name}");
                }
                other => panic!("{name} resolved to {other:?}"),
            }
            assert_eq!(r.agent_id, "agent-delly", "{name}");
        }
    }

    #[test]
    fn agent_list_is_capped() {
        let agents: Vec<_> = (1..=8).map(|i| agent(&format!("a{i}"), &format!("h{i}"))).collect();
        assert_eq!(
            format_agent_list(&agents, 6).unwrap(),
            "h1, h2, h3, h4, h5, h6 (+2 more)"
        );
        assert_eq!(format_agent_list(&agents[..2], 6).unwrap(), "h1, h2");
        assert!(format_agent_list(&[], 6).is_none());
    }

    #[test]
    fn provenance_shape() {
        let r = resolve_route(&snapshot(), &[agent("agent-delly", "delly")], "homepage-docker");
        let p = r.provenance("homepage-docker");
        assert_eq!(p["requested_target_host"], "homepage-docker");
        assert_eq!(p["transport"], "pct_exec");
        assert_eq!(p["agent_host"], "delly");
        assert_eq!(p["target_id"], "141");
        assert_eq!(p["resolved_kind"], "lxc");
    }
}
