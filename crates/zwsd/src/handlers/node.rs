//! `node.*` commands.

use std::sync::Arc;

use serde_json::{json, Value};

use zws_core::{Driver, NodeId, NodeSnapshot};
use zws_protocol::{dump_node, NodeCommand};

use super::empty;
use crate::error::{CommandError, CommandResult};
use crate::session::ClientSession;

pub async fn handle(
    driver: &dyn Driver,
    session: &Arc<ClientSession>,
    name: &str,
    command: NodeCommand,
) -> CommandResult {
    let Some(node_id) = command.node_id() else {
        return Err(CommandError::UnknownCommand(name.to_string()));
    };
    let node = lookup(driver, node_id)?;

    match command {
        NodeCommand::SetValue {
            value_id,
            value,
            options,
            ..
        } => {
            let success = driver.set_value(node_id, value_id, value, options).await?;
            Ok(json!({ "success": success }))
        }
        NodeCommand::GetDefinedValueIds { .. } => {
            let value_ids = driver.get_defined_value_ids(node_id)?;
            Ok(json!({ "valueIds": value_ids }))
        }
        NodeCommand::GetValueMetadata { value_id, .. } => {
            let metadata = driver.get_value_metadata(node_id, &value_id)?;
            Ok(serde_json::to_value(metadata).unwrap_or(Value::Null))
        }
        NodeCommand::GetValue { value_id, .. } => {
            let value = driver.get_value(node_id, &value_id)?;
            Ok(json!({ "value": value }))
        }
        NodeCommand::PollValue { value_id, .. } => {
            let value = driver.poll_value(node_id, value_id).await?;
            Ok(json!({ "value": value }))
        }
        NodeCommand::RefreshInfo { .. } => {
            driver.refresh_info(node_id).await?;
            Ok(empty())
        }
        NodeCommand::RefreshValues { .. } => {
            driver.refresh_values(node_id).await?;
            Ok(empty())
        }
        NodeCommand::Ping { .. } => {
            let responded = driver.ping(node_id).await?;
            Ok(json!({ "responded": responded }))
        }
        NodeCommand::SetName { name, .. } => {
            driver.set_name(node_id, name)?;
            Ok(empty())
        }
        NodeCommand::SetLocation { location, .. } => {
            driver.set_location(node_id, location)?;
            Ok(empty())
        }
        NodeCommand::HasSecurityClass { security_class, .. } => {
            let has = driver.has_security_class(node_id, security_class)?;
            Ok(json!({ "hasSecurityClass": has }))
        }
        NodeCommand::GetHighestSecurityClass { .. } => {
            let highest = driver.get_highest_security_class(node_id)?;
            Ok(json!({ "highestSecurityClass": highest }))
        }
        NodeCommand::GetState { .. } => Ok(json!({
            "state": dump_node(&node, session.schema_version())
        })),
        NodeCommand::Unknown => Err(CommandError::UnknownCommand(name.to_string())),
    }
}

fn lookup(driver: &dyn Driver, node_id: NodeId) -> Result<NodeSnapshot, CommandError> {
    driver
        .node_state(node_id)
        .ok_or(CommandError::NodeNotFound(node_id))
}
