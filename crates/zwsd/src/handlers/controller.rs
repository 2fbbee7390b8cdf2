//! `controller.*` commands.
//!
//! `begin_inclusion` and `replace_failed_node` are interactive: they are
//! refused while a question from an earlier inclusion is still open, and
//! the driver receives callbacks bound to the calling session.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use zws_core::{AssociationAddress, InclusionOptions, NodeId};
use zws_protocol::ControllerCommand;

use super::empty;
use crate::error::{CommandError, CommandResult};
use crate::router::ServerContext;
use crate::session::ClientSession;

pub async fn handle(
    ctx: &ServerContext,
    session: &Arc<ClientSession>,
    name: &str,
    command: ControllerCommand,
) -> CommandResult {
    let driver = ctx.driver.as_ref();

    match command {
        ControllerCommand::BeginInclusion {
            options,
            include_non_secure,
        } => {
            ctx.inclusion.ensure_idle()?;
            let options = inclusion_options(options, include_non_secure);
            info!(client_id = %session.id(), strategy = ?options.strategy, "Beginning inclusion");
            let callbacks = ctx.inclusion.callbacks_for(Arc::clone(session));
            let success = driver.begin_inclusion(options, callbacks).await?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::StopInclusion => {
            let success = driver.stop_inclusion().await?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::BeginExclusion { unprovision } => {
            let success = driver.begin_exclusion(unprovision.unwrap_or(false)).await?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::StopExclusion => {
            let success = driver.stop_exclusion().await?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::ReplaceFailedNode {
            node_id,
            options,
            include_non_secure,
        } => {
            ctx.inclusion.ensure_idle()?;
            let options = inclusion_options(options, include_non_secure);
            info!(client_id = %session.id(), node_id = %node_id, "Replacing failed node");
            let callbacks = ctx.inclusion.callbacks_for(Arc::clone(session));
            let success = driver
                .replace_failed_node(node_id, options, callbacks)
                .await?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::RemoveFailedNode { node_id } => {
            driver.remove_failed_node(node_id).await?;
            Ok(empty())
        }
        ControllerCommand::IsFailedNode { node_id } => {
            let failed = driver.is_failed_node(node_id).await?;
            Ok(json!({ "failed": failed }))
        }
        ControllerCommand::HealNode { node_id } => {
            let success = driver.heal_node(node_id).await?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::BeginHealingNetwork => {
            let success = driver.begin_healing_network()?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::StopHealingNetwork => {
            let success = driver.stop_healing_network()?;
            Ok(json!({ "success": success }))
        }
        ControllerCommand::GetNodeNeighbors { node_id } => {
            let neighbors = driver.get_node_neighbors(node_id).await?;
            Ok(json!({ "neighbors": neighbors }))
        }
        ControllerCommand::GetAssociationGroups { node_id, endpoint } => {
            let groups = driver.get_association_groups(source(node_id, endpoint))?;
            Ok(json!({ "groups": groups }))
        }
        ControllerCommand::GetAssociations { node_id, endpoint } => {
            let associations = driver.get_associations(source(node_id, endpoint))?;
            Ok(json!({ "associations": associations }))
        }
        ControllerCommand::IsAssociationAllowed {
            node_id,
            endpoint,
            group,
            association,
        } => {
            let allowed =
                driver.is_association_allowed(source(node_id, endpoint), group, association)?;
            Ok(json!({ "allowed": allowed }))
        }
        ControllerCommand::AddAssociations {
            node_id,
            endpoint,
            group,
            associations,
        } => {
            driver
                .add_associations(source(node_id, endpoint), group, associations)
                .await?;
            Ok(empty())
        }
        ControllerCommand::RemoveAssociations {
            node_id,
            endpoint,
            group,
            associations,
        } => {
            driver
                .remove_associations(source(node_id, endpoint), group, associations)
                .await?;
            Ok(empty())
        }
        ControllerCommand::RemoveNodeFromAllAssociations { node_id } => {
            driver.remove_node_from_all_associations(node_id).await?;
            Ok(empty())
        }
        ControllerCommand::GrantSecurityClasses { inclusion_grant } => {
            ctx.inclusion.grant_security_classes(inclusion_grant)?;
            Ok(empty())
        }
        ControllerCommand::ValidateDskAndEnterPin { pin } => {
            ctx.inclusion.validate_dsk_and_enter_pin(pin)?;
            Ok(empty())
        }
        ControllerCommand::ProvisionSmartStartNode { entry } => {
            driver.provision_smart_start_node(entry)?;
            Ok(empty())
        }
        ControllerCommand::UnprovisionSmartStartNode { dsk_or_node_id } => {
            driver.unprovision_smart_start_node(dsk_or_node_id)?;
            Ok(empty())
        }
        ControllerCommand::GetProvisioningEntries => {
            let entries = driver.get_provisioning_entries();
            Ok(json!({ "entries": entries }))
        }
        ControllerCommand::Unknown => Err(CommandError::UnknownCommand(name.to_string())),
    }
}

/// Explicit options win; otherwise the legacy flag picks S0 or insecure.
fn inclusion_options(
    options: Option<InclusionOptions>,
    include_non_secure: Option<bool>,
) -> InclusionOptions {
    options.unwrap_or_else(|| InclusionOptions::from_legacy_flag(include_non_secure.unwrap_or(false)))
}

fn source(node_id: NodeId, endpoint: Option<u8>) -> AssociationAddress {
    AssociationAddress { node_id, endpoint }
}
