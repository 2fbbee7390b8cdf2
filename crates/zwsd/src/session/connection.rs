//! WebSocket transport for one client.
//!
//! Each accepted TCP stream is upgraded, greeted with a version frame and
//! registered, then split into two tasks:
//!
//! ```text
//!   socket ──▶ read loop ──▶ dispatch::handle_frame ──▶ session.send_* ──▶ outbox
//!                                                                           │
//!   socket ◀───────────────────────── write loop ◀──────────────────────────┘
//! ```
//!
//! Either side ending cancels the session, which stops the other side.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport errors end this connection only; they are logged, never
//!   propagated to other sessions

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, trace, warn};

use zws_protocol::ParseError;

use super::dispatch::handle_frame;
use super::{ClientId, ClientSession, Outbound};
use crate::registry::RegistryError;
use crate::router::ServerContext;

type WsStream = WebSocketStream<TcpStream>;

/// Time allowed for the HTTP upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for one frame to reach the socket.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Frames that may wait for the writer before the client counts as stalled.
    pub outbox_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbox_capacity: 1024,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Binary frame is not UTF-8")]
    InvalidUtf8,

    #[error("Malformed frame: {0}")]
    Malformed(#[from] ParseError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Serves one client until it disconnects or is disconnected.
///
/// Returns an error only if the session never became active; errors after
/// that are logged as the reason the connection closed.
pub async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    client_id: ClientId,
    ctx: ServerContext,
    settings: ConnectionSettings,
) -> Result<(), ConnectionError> {
    let ws = timeout(HANDSHAKE_TIMEOUT, accept_async(stream))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;
    let (sink, mut frames) = ws.split();

    let (session, outbox) = ClientSession::new(client_id, settings.outbox_capacity);
    session.send_version(ctx.driver.driver_version(), ctx.driver.home_id());
    let writer = tokio::spawn(write_loop(sink, outbox, Arc::clone(&session)));

    if let Err(e) = ctx.registry.add_session(Arc::clone(&session)).await {
        session.disconnect();
        let _ = writer.await;
        return Err(e.into());
    }
    info!(client_id = %client_id, peer = %peer, "Client connected");

    if let Err(e) = read_loop(&ctx, &session, &mut frames, settings.max_message_size).await {
        debug!(client_id = %client_id, error = %e, "Connection closed");
    }

    session.disconnect();
    let _ = writer.await;
    ctx.registry.session_closed(client_id).await;
    info!(client_id = %client_id, peer = %peer, "Client disconnected");
    Ok(())
}

/// Reads frames until the peer closes, the session is cancelled, or a
/// frame cannot be read as a command.
async fn read_loop(
    ctx: &ServerContext,
    session: &Arc<ClientSession>,
    frames: &mut SplitStream<WsStream>,
    max_message_size: usize,
) -> Result<(), ConnectionError> {
    loop {
        let message = tokio::select! {
            _ = session.disconnected() => return Ok(()),
            message = frames.next() => message,
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        };

        match message {
            Message::Text(text) => {
                handle_text(ctx, session, text.as_str(), max_message_size).await?;
            }
            Message::Binary(bytes) => {
                let text = std::str::from_utf8(&bytes).map_err(|_| ConnectionError::InvalidUtf8)?;
                handle_text(ctx, session, text, max_message_size).await?;
            }
            Message::Pong(_) => session.mark_alive(),
            Message::Close(frame) => {
                debug!(client_id = %session.id(), frame = ?frame, "Client sent close");
                return Ok(());
            }
            // Pings are answered by the protocol layer.
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }
}

async fn handle_text(
    ctx: &ServerContext,
    session: &Arc<ClientSession>,
    text: &str,
    max_message_size: usize,
) -> Result<(), ConnectionError> {
    if text.len() > max_message_size {
        warn!(
            client_id = %session.id(),
            size = text.len(),
            max = max_message_size,
            "Frame too large, closing connection"
        );
        return Err(ConnectionError::MessageTooLarge {
            size: text.len(),
            max: max_message_size,
        });
    }

    if let Err(e) = handle_frame(ctx, session, text).await {
        warn!(client_id = %session.id(), error = %e, "Malformed frame, closing connection");
        return Err(e.into());
    }
    Ok(())
}

/// Drains the outbox onto the socket until the session is cancelled.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbox: mpsc::Receiver<Outbound>,
    session: Arc<ClientSession>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = session.disconnected() => break,
            frame = outbox.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let message = match frame {
            Outbound::Text { json, compress } => {
                if compress {
                    trace!(client_id = %session.id(), bytes = json.len(), "Sending large frame");
                }
                Message::text(json)
            }
            Outbound::Ping => Message::Ping(Default::default()),
        };

        match timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client_id = %session.id(), error = %e, "Write failed");
                session.disconnect();
                break;
            }
            Err(_) => {
                warn!(client_id = %session.id(), "Write timed out, disconnecting");
                session.disconnect();
                break;
            }
        }
    }

    let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
    let _ = timeout(WRITE_TIMEOUT, sink.close()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;

    use crate::testing::test_context;

    /// Serves exactly one connection on a loopback port.
    async fn serve_one(settings: ConnectionSettings) -> (String, ServerContext) {
        let (ctx, _sim) = test_context();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_ctx = ctx.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let _ = serve(stream, peer, ClientId::new(7), server_ctx, settings).await;
        });
        (format!("ws://{addr}"), ctx)
    }

    fn json(message: Message) -> Value {
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    #[test]
    fn test_error_display() {
        let err = ConnectionError::MessageTooLarge { size: 20, max: 10 };
        assert_eq!(err.to_string(), "Message too large: 20 bytes (max: 10)");
        assert_eq!(
            ConnectionError::HandshakeTimeout.to_string(),
            "WebSocket handshake timed out"
        );
    }

    #[tokio::test]
    async fn test_version_then_registration() {
        let (url, ctx) = serve_one(ConnectionSettings::default()).await;
        let (mut ws, _) = connect_async(&url).await.unwrap();

        let version = json(ws.next().await.unwrap().unwrap());
        assert_eq!(version["type"], "version");
        assert_eq!(version["serverVersion"], crate::SERVER_VERSION);

        ws.send(Message::text(r#"{"messageId":"1","command":"node.ping","nodeId":2}"#))
            .await
            .unwrap();
        let result = json(ws.next().await.unwrap().unwrap());
        assert_eq!(result["result"]["responded"], true);
        assert_eq!(ctx.registry.sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes() {
        let (url, _ctx) = serve_one(ConnectionSettings {
            outbox_capacity: 8,
            max_message_size: 64,
        })
        .await;
        let (mut ws, _) = connect_async(&url).await.unwrap();
        let _version = ws.next().await;

        let big = format!(r#"{{"messageId":"{}","command":"start_listening"}}"#, "x".repeat(100));
        ws.send(Message::text(big)).await.unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(other)) => panic!("unexpected frame {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_binary_frames_are_commands() {
        let (url, _ctx) = serve_one(ConnectionSettings::default()).await;
        let (mut ws, _) = connect_async(&url).await.unwrap();
        let _version = ws.next().await;

        let frame = r#"{"messageId":"b","command":"set_api_schema","schemaVersion":1}"#;
        ws.send(Message::binary(frame.as_bytes().to_vec())).await.unwrap();
        let result = json(ws.next().await.unwrap().unwrap());
        assert_eq!(result["messageId"], "b");
        assert_eq!(result["success"], true);
    }
}
