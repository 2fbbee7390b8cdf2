//! Namespace routing.
//!
//! A static match over the closed set of namespaces. Each namespace's
//! handler receives the typed command and whatever shared state it is
//! allowed to touch; handlers are the only code that calls the driver.
//!
//! ```text
//!   IncomingCommand ──▶ route() ──┬─▶ handlers::controller      (driver, coordinator, session)
//!                                 ├─▶ handlers::driver          (driver, registry, session)
//!                                 ├─▶ handlers::node            (driver, session schema)
//!                                 ├─▶ handlers::endpoint        (driver)
//!                                 ├─▶ handlers::broadcast_node  (driver)
//!                                 └─▶ handlers::multicast_group (driver)
//! ```

use std::sync::Arc;

use zws_core::Driver;
use zws_protocol::IncomingCommand;

use crate::error::{CommandError, CommandResult};
use crate::handlers;
use crate::inclusion::InclusionCoordinator;
use crate::registry::RegistryHandle;
use crate::session::ClientSession;

/// Shared state every command may need.
#[derive(Clone)]
pub struct ServerContext {
    pub driver: Arc<dyn Driver>,
    pub registry: RegistryHandle,
    pub inclusion: Arc<InclusionCoordinator>,
}

impl ServerContext {
    pub fn new(driver: Arc<dyn Driver>, registry: RegistryHandle) -> Self {
        Self {
            driver,
            registry,
            inclusion: Arc::new(InclusionCoordinator::new()),
        }
    }
}

/// Runs one namespaced command to completion.
///
/// `name` is the command as the client spelled it, used for
/// `unknown_command` failures.
pub async fn route(
    ctx: &ServerContext,
    session: &Arc<ClientSession>,
    name: &str,
    command: IncomingCommand,
) -> CommandResult {
    match command {
        IncomingCommand::Controller(command) => {
            handlers::controller::handle(ctx, session, name, command).await
        }
        IncomingCommand::Driver(command) => {
            handlers::driver::handle(ctx, session, name, command).await
        }
        IncomingCommand::Node(command) => {
            handlers::node::handle(ctx.driver.as_ref(), session, name, command).await
        }
        IncomingCommand::Endpoint(command) => {
            handlers::endpoint::handle(ctx.driver.as_ref(), name, command).await
        }
        IncomingCommand::BroadcastNode(command) => {
            handlers::broadcast_node::handle(ctx.driver.as_ref(), name, command).await
        }
        IncomingCommand::MulticastGroup { node_ids, command } => {
            handlers::multicast_group::handle(ctx.driver.as_ref(), name, node_ids, command).await
        }
        // Session commands never carry a namespace.
        IncomingCommand::Session(_) => Err(CommandError::UnknownCommand(name.to_string())),
    }
}
