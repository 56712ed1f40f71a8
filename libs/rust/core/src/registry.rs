//! Registry of participating nodes and their push endpoints.
//!
//! Plain data structure with no interior locking: the coordinator's
//! single mutex serializes all access alongside the round state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub endpoint: String,
    pub status: NodeStatus,
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, NodeRecord>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { nodes: BTreeMap::new() }
    }

    /// Registers a node or refreshes an existing registration. Re-registering
    /// overwrites the endpoint and reactivates the node; idempotent.
    pub fn register(&mut self, id: &str, endpoint: &str) -> bool {
        let record = NodeRecord {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            status: NodeStatus::Active,
        };
        let replaced = self.nodes.insert(id.to_string(), record).is_some();
        info!(node_id = id, endpoint, replaced, "node_registered");
        true
    }

    /// Endpoints of active nodes, keyed by node id.
    pub fn list(&self) -> BTreeMap<String, String> {
        self.nodes
            .values()
            .filter(|r| r.status == NodeStatus::Active)
            .map(|r| (r.id.clone(), r.endpoint.clone()))
            .collect()
    }

    pub fn remove(&mut self, id: &str) {
        if self.nodes.remove(id).is_some() {
            info!(node_id = id, "node_removed");
        } else {
            warn!(node_id = id, "remove_unknown_node");
        }
    }

    pub fn set_status(&mut self, id: &str, status: NodeStatus) {
        match self.nodes.get_mut(id) {
            Some(record) => {
                record.status = status;
                info!(node_id = id, ?status, "node_status_updated");
            }
            None => warn!(node_id = id, "status_update_unknown_node"),
        }
    }

    pub fn active_len(&self) -> usize {
        self.nodes.values().filter(|r| r.status == NodeStatus::Active).count()
    }

    pub fn is_empty(&self) -> bool {
        self.active_len() == 0
    }
}
