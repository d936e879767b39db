//! Fleet snapshot and name resolution.
//!
//! A [`Snapshot`] is immutable once built; providers swap in a fresh one per
//! refresh cycle and readers hold an `Arc` for the duration of a call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{
    Alert, CephCluster, DockerContainer, DockerHost, Guest, GuestSnapshot, HostInfo,
    KubernetesCluster, Node, PmgInstance, ReplicationJob, StoragePool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Node,
    Vm,
    Lxc,
    DockerHost,
    DockerContainer,
    Host,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Node => "node",
            ResourceKind::Vm => "vm",
            ResourceKind::Lxc => "lxc",
            ResourceKind::DockerHost => "docker_host",
            ResourceKind::DockerContainer => "docker_container",
            ResourceKind::Host => "host",
        }
    }

    /// LXC and VM guests; writes to them must run inside the guest.
    pub fn is_guest(&self) -> bool {
        matches!(self, ResourceKind::Lxc | ResourceKind::Vm)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a name landed in the topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocation {
    pub found: bool,
    pub name: String,
    pub kind: Option<ResourceKind>,
    /// Proxmox node hosting the resource (the node itself for nodes).
    pub node: String,
    /// VMID for guests.
    pub vmid: Option<u32>,
    /// Docker containers and hosts: the guest the Docker host runs in.
    pub docker_host_kind: Option<ResourceKind>,
    pub docker_host_vmid: Option<u32>,
    /// Docker containers and hosts: the Docker host's hostname.
    pub docker_host_name: String,
    /// Docker containers: the container name.
    pub container_name: String,
}

impl ResourceLocation {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn is_kind(&self, kind: ResourceKind) -> bool {
        self.found && self.kind == Some(kind)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub nodes: Vec<Node>,
    pub vms: Vec<Guest>,
    pub containers: Vec<Guest>,
    pub docker_hosts: Vec<DockerHost>,
    pub kubernetes_clusters: Vec<KubernetesCluster>,
    pub pmg_instances: Vec<PmgInstance>,
    pub storage: Vec<StoragePool>,
    pub ceph_clusters: Vec<CephCluster>,
    pub replication_jobs: Vec<ReplicationJob>,
    pub guest_snapshots: Vec<GuestSnapshot>,
    pub hosts: Vec<HostInfo>,
    pub active_alerts: Vec<Alert>,
}

fn guest_matches(guest: &Guest, name: &str) -> bool {
    guest.name == name || guest.id == name || guest.vmid.to_string() == name
}

impl Snapshot {
    /// Resolve a free-form name.  Matching is case-sensitive on name, id and
    /// VMID; classes are tried in the order node, vm, lxc, docker container,
    /// docker host and the first hit wins.
    pub fn resolve_resource(&self, name: &str) -> ResourceLocation {
        if name.is_empty() {
            return ResourceLocation::not_found();
        }

        if let Some(node) = self.nodes.iter().find(|n| n.name == name || n.id == name) {
            return ResourceLocation {
                found: true,
                name: node.name.clone(),
                kind: Some(ResourceKind::Node),
                node: node.name.clone(),
                ..Default::default()
            };
        }

        if let Some(vm) = self.vms.iter().find(|g| guest_matches(g, name)) {
            return guest_location(vm, ResourceKind::Vm);
        }

        if let Some(ct) = self.containers.iter().find(|g| guest_matches(g, name)) {
            return guest_location(ct, ResourceKind::Lxc);
        }

        for host in &self.docker_hosts {
            if let Some(c) = host
                .containers
                .iter()
                .find(|c| c.name == name || c.id == name || trim_slash(&c.name) == name)
            {
                let mut loc = self.docker_host_location(host);
                loc.name = trim_slash(&c.name).to_string();
                loc.kind = Some(ResourceKind::DockerContainer);
                loc.container_name = trim_slash(&c.name).to_string();
                return loc;
            }
        }

        if let Some(host) = self
            .docker_hosts
            .iter()
            .find(|h| h.hostname == name || h.id == name || (!h.display_name.is_empty() && h.display_name == name))
        {
            let mut loc = self.docker_host_location(host);
            loc.name = host.hostname.clone();
            loc.kind = Some(ResourceKind::DockerHost);
            return loc;
        }

        ResourceLocation::not_found()
    }

    /// A Docker host's own place in the topology: if a VM or LXC carries the
    /// same name as its hostname, the host runs inside that guest.
    fn docker_host_location(&self, host: &DockerHost) -> ResourceLocation {
        let mut loc = ResourceLocation {
            found: true,
            docker_host_name: host.hostname.clone(),
            ..Default::default()
        };
        let parent = self
            .vms
            .iter()
            .find(|g| g.name == host.hostname)
            .map(|g| (g, ResourceKind::Vm))
            .or_else(|| {
                self.containers
                    .iter()
                    .find(|g| g.name == host.hostname)
                    .map(|g| (g, ResourceKind::Lxc))
            });
        if let Some((guest, kind)) = parent {
            loc.node = guest.node.clone();
            loc.docker_host_kind = Some(kind);
            loc.docker_host_vmid = Some(guest.vmid);
        }
        loc
    }

    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name || n.id == name)
    }

    /// VMs first, then containers.  The flag is true for containers.
    pub fn find_guest(&self, guest_id: &str) -> Option<(&Guest, bool)> {
        self.vms
            .iter()
            .find(|g| guest_matches(g, guest_id))
            .map(|g| (g, false))
            .or_else(|| {
                self.containers
                    .iter()
                    .find(|g| guest_matches(g, guest_id))
                    .map(|g| (g, true))
            })
    }

    pub fn find_docker_host(&self, name: &str) -> Option<&DockerHost> {
        self.docker_hosts.iter().find(|h| {
            h.hostname == name || h.id == name || (!h.display_name.is_empty() && h.display_name == name)
        })
    }

    /// The host running a container with this name or id.
    pub fn find_docker_container(&self, name: &str) -> Option<(&DockerHost, &DockerContainer)> {
        self.docker_hosts.iter().find_map(|h| {
            h.containers
                .iter()
                .find(|c| c.name == name || c.id == name || trim_slash(&c.name) == name)
                .map(|c| (h, c))
        })
    }

    pub fn find_cluster(&self, name: &str) -> Option<&KubernetesCluster> {
        self.kubernetes_clusters
            .iter()
            .find(|c| c.id == name || c.name == name || (!c.display_name.is_empty() && c.display_name == name))
    }

    pub fn guest_count(&self) -> usize {
        self.vms.len() + self.containers.len()
    }
}

fn guest_location(guest: &Guest, kind: ResourceKind) -> ResourceLocation {
    ResourceLocation {
        found: true,
        name: guest.name.clone(),
        kind: Some(kind),
        node: guest.node.clone(),
        vmid: Some(guest.vmid),
        ..Default::default()
    }
}

/// Docker reports names as `/name`.
pub(crate) fn trim_slash(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}
