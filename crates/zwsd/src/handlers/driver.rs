//! `driver.*` commands.
//!
//! Log configuration lives with the session commands; the `driver.`
//! spellings are aliased there by the parser.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use zws_protocol::DriverCommand;

use super::empty;
use crate::error::{CommandError, CommandResult};
use crate::router::ServerContext;
use crate::session::ClientSession;

pub async fn handle(
    ctx: &ServerContext,
    session: &Arc<ClientSession>,
    name: &str,
    command: DriverCommand,
) -> CommandResult {
    let driver = ctx.driver.as_ref();

    match command {
        DriverCommand::GetConfig => Ok(json!({ "config": driver.get_config() })),
        DriverCommand::StartListeningLogs => {
            session.set_receive_logs(true);
            debug!(client_id = %session.id(), "Client listening to driver logs");
            ctx.registry.reconcile_logs().await?;
            Ok(empty())
        }
        DriverCommand::StopListeningLogs => {
            session.set_receive_logs(false);
            debug!(client_id = %session.id(), "Client stopped listening to driver logs");
            ctx.registry.reconcile_logs().await?;
            Ok(empty())
        }
        DriverCommand::EnableStatistics {
            application_name,
            application_version,
        } => {
            info!(
                application = %application_name,
                version = %application_version,
                "Enabling usage statistics"
            );
            driver
                .enable_statistics(application_name, application_version)
                .await?;
            Ok(empty())
        }
        DriverCommand::DisableStatistics => {
            driver.disable_statistics().await?;
            Ok(empty())
        }
        DriverCommand::IsStatisticsEnabled => Ok(json!({
            "statisticsEnabled": driver.statistics_enabled()
        })),
        DriverCommand::CheckForConfigUpdates => {
            let result = match driver.check_for_config_updates().await? {
                Some(version) => json!({ "updateAvailable": true, "newVersion": version }),
                None => json!({ "updateAvailable": false }),
            };
            Ok(result)
        }
        DriverCommand::InstallConfigUpdate => {
            let success = driver.install_config_update().await?;
            Ok(json!({ "success": success }))
        }
        DriverCommand::Unknown => Err(CommandError::UnknownCommand(name.to_string())),
    }
}
