//! End-to-end tests for the WebSocket server.
//!
//! These drive a real `ZwaveServer` over loopback with the simulated driver,
//! checking the greeting, schema negotiation, listening, fan-out, log
//! forwarding and shutdown.

mod common;

use serde_json::json;

use common::TestServer;
use zws_core::error::codes;
use zws_core::{ControllerEvent, Driver, DriverError, EventSource, LogLevel, NodeId};
use zws_protocol::{MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};
use zwsd::{ShutdownReason, SERVER_VERSION};

#[tokio::test]
async fn test_version_is_first_frame() {
    let server = TestServer::spawn().await;
    let client = server.connect().await;

    assert_eq!(client.version["type"], "version");
    assert_eq!(client.version["serverVersion"], SERVER_VERSION);
    assert_eq!(client.version["driverVersion"], server.sim.driver_version());
    assert_eq!(client.version["minSchemaVersion"], MIN_SCHEMA_VERSION);
    assert_eq!(client.version["maxSchemaVersion"], MAX_SCHEMA_VERSION);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_schema_negotiation() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let rejected = client
        .command("1", "set_api_schema", json!({ "schemaVersion": MAX_SCHEMA_VERSION + 1 }))
        .await;
    assert_eq!(rejected["success"], false);
    assert_eq!(rejected["errorCode"], "schema_incompatible");

    let accepted = client
        .command("2", "set_api_schema", json!({ "schemaVersion": MAX_SCHEMA_VERSION }))
        .await;
    assert_eq!(accepted["success"], true);

    let state = client.command("3", "start_listening", json!({})).await;
    let nodes = state["result"]["state"]["nodes"].as_array().unwrap();
    assert!(nodes.iter().all(|node| node.get("isControllerNode").is_some()));

    server.shutdown().await;
}

#[tokio::test]
async fn test_events_only_after_start_listening() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    server
        .sim
        .emit(ControllerEvent::new(EventSource::Controller, "before listening"));
    let _ = client.command("1", "start_listening", json!({})).await;

    server
        .sim
        .emit(ControllerEvent::new(EventSource::Controller, "after listening"));
    let next = client.next_json().await.unwrap();
    assert_eq!(next["type"], "event");
    assert_eq!(next["event"]["event"], "after listening");

    server.shutdown().await;
}

#[tokio::test]
async fn test_events_render_at_each_session_schema() {
    let server = TestServer::spawn().await;
    let mut old = server.connect().await;
    let mut new = server.connect().await;

    let _ = new
        .command("s", "set_api_schema", json!({ "schemaVersion": 3 }))
        .await;
    let _ = old.command("l", "start_listening", json!({})).await;
    let _ = new.command("l", "start_listening", json!({})).await;

    let node = server.sim.node_state(NodeId::new(2)).unwrap();
    server.sim.emit(
        ControllerEvent::new(EventSource::Controller, "node added").with_node(node),
    );

    let seen_by_old = old.event("node added").await;
    let seen_by_new = new.event("node added").await;
    assert!(seen_by_old["node"].get("endpoints").is_none());
    assert!(seen_by_old["node"].get("isControllerNode").is_none());
    assert!(seen_by_new["node"].get("endpoints").is_some());
    assert_eq!(seen_by_new["node"]["isControllerNode"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn test_results_go_only_to_the_caller() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    let pinged = a.command("p", "node.ping", json!({ "nodeId": 2 })).await;
    assert_eq!(pinged["result"], json!({ "responded": true }));

    // b's first frame is its own result, not a's.
    let own = b.command("q", "node.ping", json!({ "nodeId": 99 })).await;
    assert_eq!(own["errorCode"], "node_not_found");

    server.shutdown().await;
}

#[tokio::test]
async fn test_log_forwarding_lifecycle() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let started = client.command("1", "driver.start_listening_logs", json!({})).await;
    assert_eq!(started["success"], true);
    assert_eq!(server.sim.active_log_sinks(), 1);

    server.sim.log(LogLevel::Info, "CNTRLR", "hello from the radio");
    let entry = client.event("logging").await;
    assert_eq!(entry["message"], "hello from the radio");

    let stopped = client.command("2", "driver.stop_listening_logs", json!({})).await;
    assert_eq!(stopped["success"], true);
    assert_eq!(server.sim.active_log_sinks(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_log_level_change_reattaches_sink() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let _ = client.command("1", "driver.start_listening_logs", json!({})).await;

    let updated = client
        .command("2", "update_log_config", json!({ "config": { "level": "debug" } }))
        .await;
    assert_eq!(updated["success"], true);
    assert_eq!(server.registry.stats().await.log_level, Some(LogLevel::Debug));

    // The level change itself is logged through the old sink first.
    server.sim.log(LogLevel::Debug, "DRIVER", "now visible");
    loop {
        let entry = client.event("logging").await;
        if entry["message"] == "now visible" {
            assert_eq!(entry["level"], "debug");
            break;
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let server = TestServer::spawn().await;
    let mut bad = server.connect().await;
    let mut good = server.connect().await;

    bad.send_raw("{ this is not json").await;
    bad.expect_closed().await;

    let still_fine = good.command("1", "node.ping", json!({ "nodeId": 2 })).await;
    assert_eq!(still_fine["success"], true);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    let _ = client.command("1", "start_listening", json!({})).await;

    assert_eq!(server.shutdown().await, ShutdownReason::Cancelled);
    client.expect_closed().await;
}

#[tokio::test]
async fn test_fatal_driver_error_shuts_down() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let error = DriverError::new(codes::DRIVER_FAILED, "controller unplugged");
    server.sim.fail_fatally(error.clone());
    client.expect_closed().await;

    let reason = server.stopped().await;
    assert_eq!(reason, ShutdownReason::DriverFailed(error));
    assert!(reason.is_failure());
}
