//! `multicast_group.*` commands, addressed to the listed nodes.

use zws_core::{Driver, NodeId, VirtualTarget};
use zws_protocol::VirtualNodeCommand;

use super::handle_virtual_node;
use crate::error::{CommandError, CommandResult};

pub async fn handle(
    driver: &dyn Driver,
    name: &str,
    node_ids: Vec<NodeId>,
    command: VirtualNodeCommand,
) -> CommandResult {
    if command == VirtualNodeCommand::Unknown {
        return Err(CommandError::UnknownCommand(name.to_string()));
    }
    if let Some(missing) = node_ids
        .iter()
        .copied()
        .find(|id| driver.node_state(*id).is_none())
    {
        return Err(CommandError::NodeNotFound(missing));
    }
    handle_virtual_node(driver, VirtualTarget::Multicast(node_ids), name, command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zws_core::sim::CC_BINARY_SWITCH;
    use zws_core::{SimulatedDriver, ValueId};
    use zws_protocol::{ErrorCode, VirtualCcAddress};

    fn nodes(ids: &[u16]) -> Vec<NodeId> {
        ids.iter().copied().map(NodeId::new).collect()
    }

    #[tokio::test]
    async fn test_set_value_only_touches_members() {
        let driver = SimulatedDriver::with_nodes(3);
        handle(
            &driver,
            "multicast_group.set_value",
            nodes(&[2, 4]),
            VirtualNodeCommand::SetValue {
                value_id: ValueId::new(CC_BINARY_SWITCH, 0, "targetValue"),
                value: json!(true),
                options: None,
            },
        )
        .await
        .unwrap();

        let current = ValueId::new(CC_BINARY_SWITCH, 0, "currentValue");
        let value = |id: u16| driver.get_value(NodeId::new(id), &current).unwrap();
        assert_eq!(value(2), Some(json!(true)));
        assert_eq!(value(3), Some(json!(false)));
        assert_eq!(value(4), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_missing_member() {
        let driver = SimulatedDriver::with_nodes(1);
        let err = handle(
            &driver,
            "multicast_group.get_endpoint_count",
            nodes(&[2, 30]),
            VirtualNodeCommand::GetEndpointCount,
        )
        .await
        .unwrap_err();
        assert_eq!(err, CommandError::NodeNotFound(NodeId::new(30)));
    }

    #[tokio::test]
    async fn test_virtual_endpoint_bounds() {
        let driver = SimulatedDriver::with_nodes(2);
        let version = handle(
            &driver,
            "multicast_group.get_cc_version",
            nodes(&[2, 3]),
            VirtualNodeCommand::GetCcVersion(VirtualCcAddress {
                index: Some(1),
                command_class: CC_BINARY_SWITCH,
            }),
        )
        .await
        .unwrap();
        assert_eq!(version, json!({ "version": 2 }));

        let err = handle(
            &driver,
            "multicast_group.supports_cc_api",
            nodes(&[2, 3]),
            VirtualNodeCommand::SupportsCcApi(VirtualCcAddress {
                index: Some(7),
                command_class: CC_BINARY_SWITCH,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VirtualEndpointNotFound);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let driver = SimulatedDriver::with_nodes(1);
        let err = handle(&driver, "multicast_group.dance", Vec::new(), VirtualNodeCommand::Unknown)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownCommand);
    }
}
