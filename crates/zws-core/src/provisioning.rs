//! SmartStart provisioning entries.

use serde::{Deserialize, Serialize};

use crate::{NodeId, SecurityClass};

/// An entry on the SmartStart provisioning list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningEntry {
    /// Device-specific key in `xxxxx-xxxxx-...` form.
    pub dsk: String,
    pub security_classes: Vec<SecurityClass>,
    /// Set once the device has joined the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

/// Identifies a provisioning entry by DSK or by assigned node ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DskOrNodeId {
    NodeId(NodeId),
    Dsk(String),
}

impl DskOrNodeId {
    /// Returns true if this key selects `entry`.
    pub fn matches(&self, entry: &ProvisioningEntry) -> bool {
        match self {
            DskOrNodeId::NodeId(id) => entry.node_id == Some(*id),
            DskOrNodeId::Dsk(dsk) => entry.dsk == *dsk,
        }
    }
}
