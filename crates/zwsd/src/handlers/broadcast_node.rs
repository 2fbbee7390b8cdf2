//! `broadcast_node.*` commands, addressed to every node at once.

use zws_core::{Driver, VirtualTarget};
use zws_protocol::VirtualNodeCommand;

use super::handle_virtual_node;
use crate::error::CommandResult;

pub async fn handle(driver: &dyn Driver, name: &str, command: VirtualNodeCommand) -> CommandResult {
    handle_virtual_node(driver, VirtualTarget::Broadcast, name, command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zws_core::sim::CC_BINARY_SWITCH;
    use zws_core::{NodeId, SimulatedDriver, ValueId};
    use zws_protocol::{CcApiCall, ErrorCode, VirtualCcAddress};

    #[tokio::test]
    async fn test_set_value_reaches_every_node() {
        let driver = SimulatedDriver::with_nodes(3);
        let result = handle(
            &driver,
            "broadcast_node.set_value",
            VirtualNodeCommand::SetValue {
                value_id: ValueId::new(CC_BINARY_SWITCH, 0, "targetValue"),
                value: json!(true),
                options: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(result, json!({ "success": true }));

        let current = ValueId::new(CC_BINARY_SWITCH, 0, "currentValue");
        for id in 2..=4 {
            assert_eq!(
                driver.get_value(NodeId::new(id), &current).unwrap(),
                Some(json!(true))
            );
        }
    }

    #[tokio::test]
    async fn test_endpoint_count_and_bounds() {
        let driver = SimulatedDriver::with_nodes(2);
        let count = handle(&driver, "broadcast_node.get_endpoint_count", VirtualNodeCommand::GetEndpointCount)
            .await
            .unwrap();
        assert_eq!(count, json!({ "count": 1 }));

        let err = handle(
            &driver,
            "broadcast_node.supports_cc",
            VirtualNodeCommand::SupportsCc(VirtualCcAddress {
                index: Some(2),
                command_class: CC_BINARY_SWITCH,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VirtualEndpointNotFound);
    }

    #[tokio::test]
    async fn test_invoke_cc_api_on_endpoint() {
        let driver = SimulatedDriver::with_nodes(2);
        let result = handle(
            &driver,
            "broadcast_node.invoke_cc_api",
            VirtualNodeCommand::InvokeCcApi(CcApiCall {
                address: VirtualCcAddress {
                    index: Some(1),
                    command_class: CC_BINARY_SWITCH,
                },
                method_name: "set".into(),
                args: vec![json!(true)],
            }),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({ "response": null }));
    }

    #[tokio::test]
    async fn test_defined_value_ids_are_writeable_only() {
        let driver = SimulatedDriver::with_nodes(2);
        let result = handle(
            &driver,
            "broadcast_node.get_defined_value_ids",
            VirtualNodeCommand::GetDefinedValueIds,
        )
        .await
        .unwrap();
        let ids = result["valueIds"].as_array().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id["property"] == "targetValue"));
    }
}
