//! Point-in-time snapshots of controller and node state.
//!
//! Snapshots are plain data. The wire protocol decides which fields a
//! client sees based on its negotiated schema version.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{HomeId, NodeId, SecurityClass, ValueId, ValueMetadata};

/// Reachability of a node as last observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Asleep,
    Awake,
    Dead,
    Alive,
}

/// A command class implemented by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandClassInfo {
    pub id: u16,
    pub name: String,
    pub version: u8,
    pub is_secure: bool,
    /// Whether the endpoint controls (rather than supports) this class.
    #[serde(default)]
    pub is_controlled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSnapshot {
    pub node_id: NodeId,
    pub index: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    pub command_classes: Vec<CommandClassInfo>,
}

impl EndpointSnapshot {
    pub fn command_class(&self, cc: u16) -> Option<&CommandClassInfo> {
        self.command_classes.iter().find(|info| info.id == cc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSnapshot {
    #[serde(flatten)]
    pub value_id: ValueId,
    pub value: Value,
    pub metadata: ValueMetadata,
}

/// Full state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: NodeStatus,
    pub ready: bool,
    pub is_listening: bool,
    pub is_secure: bool,
    pub security_classes: Vec<SecurityClass>,
    pub manufacturer_id: u16,
    pub product_id: u16,
    pub product_type: u16,
    pub firmware_version: String,
    pub is_controller_node: bool,
    pub endpoints: Vec<EndpointSnapshot>,
    pub values: Vec<ValueSnapshot>,
}

impl NodeSnapshot {
    pub fn highest_security_class(&self) -> Option<SecurityClass> {
        SecurityClass::highest(&self.security_classes)
    }

    pub fn endpoint(&self, index: u8) -> Option<&EndpointSnapshot> {
        self.endpoints.iter().find(|ep| ep.index == index)
    }

    /// Number of endpoints besides the root endpoint.
    pub fn endpoint_count(&self) -> u8 {
        let extra = self.endpoints.iter().filter(|ep| ep.index != 0).count();
        u8::try_from(extra).unwrap_or(u8::MAX)
    }

    pub fn value(&self, id: &ValueId) -> Option<&ValueSnapshot> {
        self.values.iter().find(|v| v.value_id.same_value(id))
    }

    pub fn value_mut(&mut self, id: &ValueId) -> Option<&mut ValueSnapshot> {
        self.values.iter_mut().find(|v| v.value_id.same_value(id))
    }
}

/// Static facts about the controller itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub home_id: HomeId,
    pub own_node_id: NodeId,
    pub library_version: String,
    pub is_primary: bool,
    pub is_suc: bool,
    pub supports_timers: bool,
}

/// Controller plus every known node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSnapshot {
    pub controller: ControllerSnapshot,
    pub nodes: Vec<NodeSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeSnapshot {
        NodeSnapshot {
            node_id: NodeId::new(2),
            name: None,
            location: None,
            status: NodeStatus::Alive,
            ready: true,
            is_listening: true,
            is_secure: true,
            security_classes: vec![SecurityClass::S0Legacy, SecurityClass::S2Authenticated],
            manufacturer_id: 0x86,
            product_id: 1,
            product_type: 3,
            firmware_version: "1.0".to_string(),
            is_controller_node: false,
            endpoints: vec![
                EndpointSnapshot {
                    node_id: NodeId::new(2),
                    index: 0,
                    device_class: None,
                    command_classes: vec![],
                },
                EndpointSnapshot {
                    node_id: NodeId::new(2),
                    index: 1,
                    device_class: None,
                    command_classes: vec![],
                },
            ],
            values: vec![ValueSnapshot {
                value_id: ValueId::new(37, 0, "currentValue"),
                value: Value::Bool(false),
                metadata: ValueMetadata::boolean("Current value", false),
            }],
        }
    }

    #[test]
    fn test_highest_class_and_endpoint_count() {
        let node = node();
        assert_eq!(
            node.highest_security_class(),
            Some(SecurityClass::S2Authenticated)
        );
        assert_eq!(node.endpoint_count(), 1);
        assert!(node.endpoint(1).is_some());
        assert!(node.endpoint(2).is_none());
    }

    #[test]
    fn test_value_lookup_ignores_missing_endpoint() {
        let node = node();
        let id = ValueId {
            command_class: 37,
            endpoint: None,
            property: "currentValue".into(),
            property_key: None,
        };
        assert!(node.value(&id).is_some());
    }

    #[test]
    fn test_value_snapshot_flattens_id() {
        let json = serde_json::to_value(&node().values).unwrap();
        assert_eq!(json[0]["commandClass"], 37);
        assert_eq!(json[0]["property"], "currentValue");
    }
}
