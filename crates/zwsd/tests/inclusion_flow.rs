//! End-to-end tests for interactive inclusion across sessions.

mod common;

use serde_json::json;

use common::TestServer;
use zws_core::sim::SIM_DSK;

/// Strategy number for S2-only inclusion.
const STRATEGY_S2: u8 = 4;
/// Wire value of `S2Authenticated`.
const S2_AUTHENTICATED: i8 = 1;

#[tokio::test]
async fn test_second_session_is_refused_while_asking() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    let started = a
        .command(
            "1",
            "controller.begin_inclusion",
            json!({ "options": { "strategy": STRATEGY_S2 } }),
        )
        .await;
    assert_eq!(started["result"], json!({ "success": true }));
    let asked = a.event("grant security classes").await;
    assert!(asked["requested"]["securityClasses"].is_array());

    let refused = b
        .command(
            "1",
            "controller.begin_inclusion",
            json!({ "options": { "strategy": STRATEGY_S2 } }),
        )
        .await;
    assert_eq!(refused["success"], false);
    assert_eq!(refused["errorCode"], "inclusion_already_in_progress");
    assert_eq!(server.sim.inclusion_attempts(), 1);

    let stopped = a.command("2", "controller.stop_inclusion", json!({})).await;
    assert_eq!(stopped["result"], json!({ "success": true }));
    a.event("inclusion aborted").await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_any_session_answers_and_node_joins() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    let _ = b.command("l", "start_listening", json!({})).await;

    let _ = a
        .command(
            "1",
            "controller.begin_inclusion",
            json!({ "options": { "strategy": STRATEGY_S2 } }),
        )
        .await;
    a.event("grant security classes").await;

    let granted = b
        .command(
            "g",
            "controller.grant_security_classes",
            json!({ "inclusionGrant": { "securityClasses": [S2_AUTHENTICATED], "clientSideAuth": false } }),
        )
        .await;
    assert_eq!(granted["success"], true);

    let dsk = a.event("validate dsk and enter pin").await;
    let (pin, rest) = SIM_DSK.split_once('-').unwrap();
    assert_eq!(dsk["dsk"], format!("-{rest}"));

    let entered = b
        .command("p", "controller.validate_dsk_and_enter_pin", json!({ "pin": pin }))
        .await;
    assert_eq!(entered["success"], true);

    let added = b.event("node added").await;
    assert_eq!(added["node"]["nodeId"], 4);
    assert_eq!(added["result"]["lowSecurity"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn test_answer_without_question_names_phase() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let answer = client
        .command("1", "controller.validate_dsk_and_enter_pin", json!({ "pin": "00000" }))
        .await;
    assert_eq!(answer["success"], false);
    assert_eq!(answer["errorCode"], "inclusion_phase_not_in_progress");
    assert_eq!(answer["phase"], "validate_dsk_and_enter_pin");

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_of_asker_does_not_wedge_coordinator() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let _ = a
        .command(
            "1",
            "controller.begin_inclusion",
            json!({ "options": { "strategy": STRATEGY_S2 } }),
        )
        .await;
    a.event("grant security classes").await;
    a.close().await;

    // The question is still open and can be answered by someone else.
    let mut b = server.connect().await;
    let _ = b.command("l", "start_listening", json!({})).await;
    let granted = b
        .command(
            "g",
            "controller.grant_security_classes",
            json!({ "inclusionGrant": { "securityClasses": [0], "clientSideAuth": false } }),
        )
        .await;
    assert_eq!(granted["success"], true);
    b.event("node added").await;

    let again = b
        .command(
            "2",
            "controller.begin_inclusion",
            json!({ "options": { "strategy": 2 } }),
        )
        .await;
    assert_eq!(again["result"], json!({ "success": true }));

    server.shutdown().await;
}
