//! Per-namespace command handlers.
//!
//! Each handler is a thin pass-through to the [`Driver`](zws_core::Driver):
//! look up what the command addresses, call the driver, wrap the answer in
//! a JSON object. Lookup failures are reported with their own error codes
//! before the driver is called.

pub mod broadcast_node;
pub mod controller;
pub mod driver;
pub mod endpoint;
pub mod multicast_group;
pub mod node;

use serde_json::{json, Value};

use zws_core::{CcTarget, Driver, VirtualTarget};
use zws_protocol::{CcApiCall, VirtualCcAddress, VirtualNodeCommand};

use crate::error::{CommandError, CommandResult};

/// The result object for commands with nothing to report.
pub(crate) fn empty() -> Value {
    json!({})
}

/// Shared implementation of `broadcast_node` and `multicast_group`.
pub(crate) async fn handle_virtual_node(
    driver: &dyn Driver,
    target: VirtualTarget,
    name: &str,
    command: VirtualNodeCommand,
) -> CommandResult {
    if let Some(address) = command.address() {
        ensure_virtual_endpoint(driver, &target, address)?;
    }

    match command {
        VirtualNodeCommand::SetValue {
            value_id,
            value,
            options,
        } => {
            let success = driver
                .virtual_set_value(target, value_id, value, options)
                .await?;
            Ok(json!({ "success": success }))
        }
        VirtualNodeCommand::GetEndpointCount => {
            let count = driver.virtual_endpoint_count(&target)?;
            Ok(json!({ "count": count }))
        }
        VirtualNodeCommand::SupportsCc(address) => {
            let supported = driver.supports_cc(&cc_target(target, &address), address.command_class)?;
            Ok(json!({ "supported": supported }))
        }
        VirtualNodeCommand::GetCcVersion(address) => {
            let version =
                driver.get_cc_version(&cc_target(target, &address), address.command_class)?;
            Ok(json!({ "version": version }))
        }
        VirtualNodeCommand::InvokeCcApi(CcApiCall {
            address,
            method_name,
            args,
        }) => {
            let response = driver
                .invoke_cc_api(
                    cc_target(target, &address),
                    address.command_class,
                    method_name,
                    args,
                )
                .await?;
            Ok(json!({ "response": response }))
        }
        VirtualNodeCommand::SupportsCcApi(address) => {
            let supported =
                driver.supports_cc_api(&cc_target(target, &address), address.command_class)?;
            Ok(json!({ "supported": supported }))
        }
        VirtualNodeCommand::GetDefinedValueIds => {
            let value_ids = driver.virtual_defined_value_ids(&target)?;
            Ok(json!({ "valueIds": value_ids }))
        }
        VirtualNodeCommand::Unknown => Err(CommandError::UnknownCommand(name.to_string())),
    }
}

fn cc_target(target: VirtualTarget, address: &VirtualCcAddress) -> CcTarget {
    CcTarget::Virtual {
        target,
        index: address.index(),
    }
}

/// Index 0 is the virtual root and always exists.
fn ensure_virtual_endpoint(
    driver: &dyn Driver,
    target: &VirtualTarget,
    address: &VirtualCcAddress,
) -> Result<(), CommandError> {
    let index = address.index();
    if index > driver.virtual_endpoint_count(target)? {
        return Err(CommandError::VirtualEndpointNotFound(index));
    }
    Ok(())
}
