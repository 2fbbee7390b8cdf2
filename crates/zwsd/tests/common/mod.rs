//! Shared helpers for the end-to-end tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use zws_core::SimulatedDriver;
use zwsd::{RegistryHandle, ServerConfig, ShutdownReason, ZwaveServer};

/// How long any single expected frame may take.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Server
// ============================================================================

/// A server on a loopback port backed by a simulated network.
pub struct TestServer {
    pub url: String,
    pub sim: SimulatedDriver,
    pub registry: RegistryHandle,
    cancel_token: CancellationToken,
    run: JoinHandle<ShutdownReason>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    /// Spawns with `config`, forcing a loopback host and an ephemeral port.
    pub async fn spawn_with(config: ServerConfig) -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..config
        };
        let sim = SimulatedDriver::with_nodes(2);
        let server = ZwaveServer::bind(&config, Arc::new(sim.clone()))
            .await
            .expect("bind test server");

        let url = format!("ws://{}", server.local_addr());
        let registry = server.registry().clone();
        let cancel_token = server.cancel_token();
        let run = tokio::spawn(server.run());

        Self {
            url,
            sim,
            registry,
            cancel_token,
            run,
        }
    }

    /// Connects and consumes the version greeting.
    pub async fn connect(&self) -> TestClient {
        let (ws, _) = connect_async(&self.url).await.expect("connect");
        let mut client = TestClient {
            ws,
            events: VecDeque::new(),
            version: Value::Null,
        };
        client.version = client.next_json().await.expect("version frame");
        client
    }

    /// Waits for the server to stop on its own.
    pub async fn stopped(self) -> ShutdownReason {
        timeout(Duration::from_secs(5), self.run)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }

    pub async fn shutdown(self) -> ShutdownReason {
        self.cancel_token.cancel();
        self.stopped().await
    }
}

// ============================================================================
// Client
// ============================================================================

/// A protocol client that buffers events while waiting for results.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: VecDeque<Value>,
    pub version: Value,
}

impl TestClient {
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::text(text.to_string()))
            .await
            .expect("send frame");
    }

    /// Sends `{messageId, command, ...params}`.
    pub async fn send(&mut self, message_id: &str, command: &str, params: Value) {
        let mut frame = json!({ "messageId": message_id, "command": command });
        if let (Some(frame), Value::Object(params)) = (frame.as_object_mut(), params) {
            frame.extend(params);
        }
        self.send_raw(&frame.to_string()).await;
    }

    /// Sends a command and waits for its result.
    pub async fn command(&mut self, message_id: &str, command: &str, params: Value) -> Value {
        self.send(message_id, command, params).await;
        self.result(message_id).await
    }

    /// Waits for the result with `message_id`, buffering events seen first.
    pub async fn result(&mut self, message_id: &str) -> Value {
        loop {
            let frame = self.next_json().await.expect("result frame");
            match frame["type"].as_str() {
                Some("result") if frame["messageId"] == message_id => return frame,
                Some("event") => self.events.push_back(frame["event"].clone()),
                _ => panic!("unexpected frame while waiting for {message_id}: {frame}"),
            }
        }
    }

    /// Waits for the event named `name`; earlier events are discarded.
    pub async fn event(&mut self, name: &str) -> Value {
        while let Some(event) = self.events.pop_front() {
            if event["event"] == name {
                return event;
            }
        }
        loop {
            let frame = self.next_json().await.expect("event frame");
            if frame["type"] == "event" && frame["event"]["event"] == name {
                return frame["event"].clone();
            }
        }
    }

    /// Next text frame as JSON. `None` once the connection is closed.
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            let message = timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")?;
            match message.ok()? {
                Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Asserts the server closes this connection.
    pub async fn expect_closed(&mut self) {
        loop {
            match timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("connection was not closed")
            {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
