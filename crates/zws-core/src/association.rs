//! Association groups and addresses.

use serde::{Deserialize, Serialize};

use crate::NodeId;

/// A node, optionally narrowed to one of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationAddress {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<u8>,
}

impl AssociationAddress {
    pub fn node(node_id: NodeId) -> Self {
        Self {
            node_id,
            endpoint: None,
        }
    }
}

/// Describes one association group of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationGroup {
    pub max_nodes: u8,
    pub is_lifeline: bool,
    pub multi_channel: bool,
    pub label: String,
}
