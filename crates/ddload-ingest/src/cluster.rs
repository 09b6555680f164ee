//! Cluster inventory
//!
//! Reads the cluster's node list and each node's physical memory once, at
//! planning time. The resulting [`ClusterView`] is an immutable snapshot.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info};

use crate::error::{IngestError, Result};

/// Membership service the inventory reads from
pub trait ClusterMembership: Send + Sync {
    /// Ids of every node currently in the cluster
    fn list_nodes(&self) -> std::result::Result<Vec<String>, String>;

    /// Physical memory of one node, in bytes
    fn node_memory(&self, node_id: &str) -> std::result::Result<u64, String>;
}

/// One node as seen at survey time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub physical_memory_bytes: u64,
}

/// Snapshot of cluster nodes and their memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    nodes: Vec<NodeInfo>,
}

impl ClusterView {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[NodeInfo] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| n.physical_memory_bytes)
            .fold(0u64, u64::saturating_add)
    }
}

/// Enumerate all nodes and read their memory
pub fn survey_cluster(membership: &dyn ClusterMembership) -> Result<ClusterView> {
    let node_ids = membership
        .list_nodes()
        .map_err(|e| IngestError::ClusterUnavailable(format!("cannot list nodes: {}", e)))?;

    if node_ids.is_empty() {
        return Err(IngestError::ClusterUnavailable(
            "membership service reported no nodes".to_string(),
        ));
    }

    let mut nodes = Vec::with_capacity(node_ids.len());
    for node_id in node_ids {
        let physical_memory_bytes = membership.node_memory(&node_id).map_err(|e| {
            IngestError::ClusterUnavailable(format!("cannot read memory of {}: {}", node_id, e))
        })?;
        debug!(node = %node_id, physical_memory_bytes, "Surveyed node");
        nodes.push(NodeInfo {
            node_id,
            physical_memory_bytes,
        });
    }

    let view = ClusterView::new(nodes);
    info!(
        nodes = view.node_count(),
        total_memory = %ddload_common::units::human_bytes(view.total_memory_bytes()),
        "Cluster surveyed"
    );

    Ok(view)
}

/// The machine this process runs on, as a one-node cluster
#[derive(Debug, Clone)]
pub struct LocalHost {
    node_id: String,
}

impl LocalHost {
    pub fn new() -> Self {
        Self {
            node_id: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".to_string()),
        }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterMembership for LocalHost {
    fn list_nodes(&self) -> std::result::Result<Vec<String>, String> {
        Ok(vec![self.node_id.clone()])
    }

    fn node_memory(&self, node_id: &str) -> std::result::Result<u64, String> {
        if node_id != self.node_id {
            return Err(format!("unknown node {}", node_id));
        }
        let mut system = System::new();
        system.refresh_memory();
        match system.total_memory() {
            0 => Err("host reported zero physical memory".to_string()),
            bytes => Ok(bytes),
        }
    }
}

/// Fixed node list, e.g. from `--node name=bytes` flags
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    nodes: Vec<NodeInfo>,
}

impl StaticMembership {
    pub fn new(nodes: Vec<NodeInfo>) -> Self {
        Self { nodes }
    }

    /// Parse `name=bytes` node specs
    pub fn parse_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let mut nodes = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.as_ref();
            let (name, bytes) = spec.split_once('=').ok_or_else(|| {
                IngestError::Config(format!("node spec '{}' must look like name=bytes", spec))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(IngestError::Config(format!("node spec '{}' has no name", spec)));
            }
            let physical_memory_bytes = bytes.trim().parse::<u64>().map_err(|e| {
                IngestError::Config(format!("node spec '{}' has bad byte count: {}", spec, e))
            })?;
            nodes.push(NodeInfo {
                node_id: name.to_string(),
                physical_memory_bytes,
            });
        }
        Ok(Self::new(nodes))
    }
}

impl ClusterMembership for StaticMembership {
    fn list_nodes(&self) -> std::result::Result<Vec<String>, String> {
        Ok(self.nodes.iter().map(|n| n.node_id.clone()).collect())
    }

    fn node_memory(&self, node_id: &str) -> std::result::Result<u64, String> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| n.physical_memory_bytes)
            .ok_or_else(|| format!("unknown node {}", node_id))
    }
}
