//! `endpoint.*` commands: command-class queries on one endpoint of a node.
//!
//! Endpoint 0 is the node itself and always exists.

use serde_json::json;

use zws_core::{CcTarget, Driver};
use zws_protocol::{CcApiCall, EndpointAddress, EndpointCommand};

use crate::error::{CommandError, CommandResult};

pub async fn handle(driver: &dyn Driver, name: &str, command: EndpointCommand) -> CommandResult {
    let Some(address) = command.address() else {
        return Err(CommandError::UnknownCommand(name.to_string()));
    };
    let target = resolve(driver, address)?;

    match command {
        EndpointCommand::InvokeCcApi(CcApiCall {
            address,
            method_name,
            args,
        }) => {
            let response = driver
                .invoke_cc_api(target, address.command_class, method_name, args)
                .await?;
            Ok(json!({ "response": response }))
        }
        EndpointCommand::SupportsCcApi(address) => {
            let supported = driver.supports_cc_api(&target, address.command_class)?;
            Ok(json!({ "supported": supported }))
        }
        EndpointCommand::SupportsCc(address) => {
            let supported = driver.supports_cc(&target, address.command_class)?;
            Ok(json!({ "supported": supported }))
        }
        EndpointCommand::ControlsCc(address) => {
            let controlled = driver.controls_cc(&target, address.command_class)?;
            Ok(json!({ "controlled": controlled }))
        }
        EndpointCommand::IsCcSecure(address) => {
            let secure = driver.is_cc_secure(&target, address.command_class)?;
            Ok(json!({ "secure": secure }))
        }
        EndpointCommand::GetCcVersion(address) => {
            let version = driver.get_cc_version(&target, address.command_class)?;
            Ok(json!({ "version": version }))
        }
        EndpointCommand::Unknown => Err(CommandError::UnknownCommand(name.to_string())),
    }
}

/// Checks that both the node and the endpoint exist.
fn resolve(driver: &dyn Driver, address: &EndpointAddress) -> Result<CcTarget, CommandError> {
    let Some(count) = driver.endpoint_count(address.node_id) else {
        return Err(CommandError::NodeNotFound(address.node_id));
    };
    let index = address.index();
    if index > count {
        return Err(CommandError::EndpointNotFound {
            node_id: address.node_id,
            index,
        });
    }
    Ok(CcTarget::Endpoint {
        node_id: address.node_id,
        index,
    })
}
