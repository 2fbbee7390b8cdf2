//! Frame dispatch for one session.
//!
//! Every command runs to completion before the next frame is read, so a
//! session's commands take effect in arrival order. Interactive operations
//! return once the driver has started them; the answers arrive later as
//! ordinary commands and are never queued behind the question.
//!
//! Every failure is turned into a failure result here, once. Only a frame
//! that cannot be read as a command envelope is returned as an error, and
//! the connection closes on it.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use zws_protocol::{
    dump_state, DriverState, Envelope, IncomingCommand, ParseError, SchemaVersion, SessionCommand,
};

use crate::error::{CommandError, CommandResult};
use crate::router::{self, ServerContext};
use crate::session::ClientSession;

/// Handles one raw text frame.
pub async fn handle_frame(
    ctx: &ServerContext,
    session: &Arc<ClientSession>,
    raw: &str,
) -> Result<(), ParseError> {
    let envelope = Envelope::parse(raw)?;
    debug!(
        client_id = %session.id(),
        message_id = %envelope.message_id,
        command = %envelope.command,
        "Received command"
    );

    let command = match IncomingCommand::parse(&envelope) {
        Ok(command) => command,
        Err(e) => {
            session.send_result(envelope.message_id, Err(e.into()), false);
            return Ok(());
        }
    };
    let Envelope {
        message_id,
        command: name,
        ..
    } = envelope;

    match command {
        IncomingCommand::Session(SessionCommand::StartListening) => {
            session.start_listening(message_id, |schema| {
                json!({
                    "state": dump_state(
                        &ctx.driver.network_state(),
                        &DriverState {
                            log_config: ctx.driver.log_config(),
                            statistics_enabled: ctx.driver.statistics_enabled(),
                        },
                        schema,
                    )
                })
            });
            info!(client_id = %session.id(), "Client started listening");
        }
        IncomingCommand::Session(command) => {
            let outcome = session_command(ctx, session, &name, command).await;
            session.send_result(message_id, outcome, false);
        }
        command => {
            let outcome = router::route(ctx, session, &name, command).await;
            session.send_result(message_id, outcome, false);
        }
    }
    Ok(())
}

async fn session_command(
    ctx: &ServerContext,
    session: &ClientSession,
    name: &str,
    command: SessionCommand,
) -> CommandResult {
    match command {
        SessionCommand::SetApiSchema { schema_version } => {
            let version = SchemaVersion::new(schema_version)?;
            session.set_schema_version(version);
            debug!(client_id = %session.id(), schema_version, "Schema version set");
            Ok(json!({}))
        }
        SessionCommand::GetLogConfig => Ok(json!({ "config": ctx.driver.log_config() })),
        SessionCommand::UpdateLogConfig { config } => {
            ctx.driver.update_log_config(config)?;
            ctx.registry.reconcile_logs().await?;
            Ok(json!({}))
        }
        SessionCommand::StartListening | SessionCommand::Unknown => {
            Err(CommandError::UnknownCommand(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use zws_core::{Driver, LogLevel};

    use crate::session::ClientId;
    use crate::testing::{next_frame, recv_frame, test_context, test_session};

    async fn send(ctx: &ServerContext, session: &Arc<ClientSession>, raw: &str) {
        handle_frame(ctx, session, raw).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frames_are_errors() {
        let (ctx, _sim) = test_context();
        let (session, mut rx) = test_session();
        for raw in [
            "not json",
            "[1,2,3]",
            r#"{"command":"start_listening"}"#,
            r#"{"messageId":1,"command":"start_listening"}"#,
        ] {
            assert!(handle_frame(&ctx, &session, raw).await.is_err(), "{raw}");
        }
        assert!(next_frame(&mut rx).is_none());
    }

    #[tokio::test]
    async fn test_schema_negotiation() {
        let (ctx, _sim) = test_context();
        let (session, mut rx) = test_session();

        send(&ctx, &session, r#"{"messageId":"a","command":"set_api_schema","schemaVersion":2}"#).await;
        let ok = next_frame(&mut rx).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["result"], json!({}));
        assert_eq!(session.schema_version().get(), 2);

        send(&ctx, &session, r#"{"messageId":"b","command":"set_api_schema","schemaVersion":99}"#).await;
        let rejected = next_frame(&mut rx).unwrap();
        assert_eq!(rejected["messageId"], "b");
        assert_eq!(rejected["errorCode"], "schema_incompatible");
        assert_eq!(session.schema_version().get(), 2);

        send(&ctx, &session, r#"{"messageId":"c","command":"set_api_schema","schemaVersion":3}"#).await;
        assert_eq!(next_frame(&mut rx).unwrap()["success"], true);
        assert_eq!(session.schema_version().get(), 3);
    }

    #[tokio::test]
    async fn test_start_listening_dumps_state() {
        let (ctx, _sim) = test_context();
        let (session, mut rx) = test_session();
        send(&ctx, &session, r#"{"messageId":"s","command":"set_api_schema","schemaVersion":3}"#).await;
        let _ = next_frame(&mut rx);

        send(&ctx, &session, r#"{"messageId":"l","command":"start_listening"}"#).await;
        let frame = next_frame(&mut rx).unwrap();
        let state = &frame["result"]["state"];
        assert_eq!(state["nodes"].as_array().map(Vec::len), Some(3));
        assert!(state["nodes"][1].get("isControllerNode").is_some());
        assert_eq!(state["driver"]["statisticsEnabled"], false);
        assert!(session.receives_events());
    }

    #[tokio::test]
    async fn test_unknown_commands() {
        let (ctx, _sim) = test_context();
        let (session, mut rx) = test_session();

        send(&ctx, &session, r#"{"messageId":"1","command":"frobnicate"}"#).await;
        let bare = next_frame(&mut rx).unwrap();
        assert_eq!(bare["errorCode"], "unknown_command");

        send(&ctx, &session, r#"{"messageId":"2","command":"toaster.toast"}"#).await;
        assert_eq!(next_frame(&mut rx).unwrap()["errorCode"], "unknown_command");

        send(&ctx, &session, r#"{"messageId":"3","command":"node.explode","nodeId":2}"#).await;
        let frame = recv_frame(&mut rx).await.unwrap();
        assert_eq!(frame["messageId"], "3");
        assert_eq!(frame["errorCode"], "unknown_command");
    }

    #[tokio::test]
    async fn test_invalid_params_are_unknown_error() {
        let (ctx, _sim) = test_context();
        let (session, mut rx) = test_session();
        send(&ctx, &session, r#"{"messageId":"p","command":"node.ping"}"#).await;
        let frame = next_frame(&mut rx).unwrap();
        assert_eq!(frame["success"], false);
        assert_eq!(frame["errorCode"], "unknown_error");
        assert!(frame["message"].is_string());
    }

    #[tokio::test]
    async fn test_log_config_round_trip() {
        let (ctx, sim) = test_context();
        let (session, mut rx) = test_session();

        send(
            &ctx,
            &session,
            r#"{"messageId":"u","command":"update_log_config","config":{"level":"debug"}}"#,
        )
        .await;
        assert_eq!(next_frame(&mut rx).unwrap()["success"], true);
        assert_eq!(sim.log_config().level, LogLevel::Debug);

        send(&ctx, &session, r#"{"messageId":"g","command":"driver.get_log_config"}"#).await;
        let frame = next_frame(&mut rx).unwrap();
        assert_eq!(frame["result"]["config"]["level"], "debug");
    }

    #[tokio::test]
    async fn test_results_follow_arrival_order() {
        let (ctx, _sim) = test_context();
        let (session, mut rx) = test_session();
        send(&ctx, &session, r#"{"messageId":"n1","command":"node.ping","nodeId":2}"#).await;
        send(&ctx, &session, r#"{"messageId":"n2","command":"node.ping","nodeId":99}"#).await;

        let first = next_frame(&mut rx).unwrap();
        let second = next_frame(&mut rx).unwrap();
        assert_eq!(first["messageId"], "n1");
        assert_eq!(first["result"]["responded"], true);
        assert_eq!(second["messageId"], "n2");
        assert_eq!(second["errorCode"], "node_not_found");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_start_then_stop_logs_leaves_logs_off() {
        let (ctx, sim) = test_context();
        for id in 1..=50 {
            let (session, mut rx) = ClientSession::new(ClientId::new(id), 16);
            ctx.registry.add_session(Arc::clone(&session)).await.unwrap();
            send(&ctx, &session, r#"{"messageId":"1","command":"driver.start_listening_logs"}"#).await;
            send(&ctx, &session, r#"{"messageId":"2","command":"driver.stop_listening_logs"}"#).await;

            assert_eq!(next_frame(&mut rx).unwrap()["messageId"], "1");
            assert_eq!(next_frame(&mut rx).unwrap()["messageId"], "2");
            assert!(!session.receives_logs());
            assert_eq!(sim.active_log_sinks(), 0);
        }
    }
}
