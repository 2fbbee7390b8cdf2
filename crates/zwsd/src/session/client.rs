//! Per-connection session state and its non-blocking send path.
//!
//! A [`ClientSession`] never touches the socket. Every outgoing frame is
//! pushed into a bounded outbox that the connection's writer task drains,
//! so frames reach the wire in exactly the order the send calls were made.
//!
//! ```text
//!   dispatch / forwarders ──try_send──▶ [ outbox ] ──▶ writer task ──▶ socket
//!                                           │
//!                                  full ────┴──▶ disconnect()
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - Send methods never block and never fail loudly; a closed or full outbox
//!   is reported through the return value and logged
//! - Flags are atomics, except the listening flag, which is a lock shared
//!   with event delivery; no lock is held across an await

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

use zws_core::{ControllerEvent, HomeId};
use zws_protocol::{render_event, OutgoingMessage, SchemaVersion};

use crate::error::{CommandError, CommandResult};
use crate::SERVER_VERSION;

/// Opaque per-connection identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A frame queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A JSON text frame. `compress` marks frames worth deflating.
    Text { json: String, compress: bool },
    /// A liveness probe.
    Ping,
}

/// One client's negotiated protocol state.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    schema_version: AtomicU32,
    receive_events: Mutex<bool>,
    receive_logs: AtomicBool,
    outstanding_ping: AtomicBool,
    outbox: mpsc::Sender<Outbound>,
    cancel_token: CancellationToken,
}

impl ClientSession {
    /// Creates a session and the receiving end of its outbox.
    pub fn new(id: ClientId, outbox_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (outbox, receiver) = mpsc::channel(outbox_capacity.max(1));
        let session = Arc::new(Self {
            id,
            schema_version: AtomicU32::new(SchemaVersion::MIN.get()),
            receive_events: Mutex::new(false),
            receive_logs: AtomicBool::new(false),
            outstanding_ping: AtomicBool::new(false),
            outbox,
            cancel_token: CancellationToken::new(),
        });
        (session, receiver)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    // ------------------------------------------------------------------------
    // Protocol state
    // ------------------------------------------------------------------------

    pub fn schema_version(&self) -> SchemaVersion {
        SchemaVersion::new(self.schema_version.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_schema_version(&self, version: SchemaVersion) {
        self.schema_version.store(version.get(), Ordering::Release);
    }

    pub fn receives_events(&self) -> bool {
        *self.receive_events.lock()
    }

    pub fn set_receive_events(&self, enabled: bool) {
        *self.receive_events.lock() = enabled;
    }

    /// Queues the `start_listening` result built by `state`, then turns on
    /// events.
    ///
    /// Runs under the same lock as [`forward_controller_event`], so every
    /// event is either reflected in the state or delivered after it.
    ///
    /// [`forward_controller_event`]: Self::forward_controller_event
    pub fn start_listening(
        &self,
        message_id: String,
        state: impl FnOnce(SchemaVersion) -> Value,
    ) -> bool {
        let mut listening = self.receive_events.lock();
        let sent = self.send_result(message_id, Ok(state(self.schema_version())), true);
        *listening = true;
        sent
    }

    pub fn receives_logs(&self) -> bool {
        self.receive_logs.load(Ordering::Acquire)
    }

    pub fn set_receive_logs(&self, enabled: bool) {
        self.receive_logs.store(enabled, Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Sends the greeting. Called once, right after the session is created.
    pub fn send_version(&self, driver_version: String, home_id: HomeId) -> bool {
        self.send(
            &OutgoingMessage::version(driver_version, SERVER_VERSION.to_string(), home_id),
            false,
        )
    }

    /// Sends the outcome of one command.
    pub fn send_result(&self, message_id: String, outcome: CommandResult, compress: bool) -> bool {
        let message = match outcome {
            Ok(result) => OutgoingMessage::success(message_id, result),
            Err(error) => {
                debug!(
                    client_id = %self.id,
                    message_id = %message_id,
                    error_code = %error.code(),
                    error = %error,
                    "Command failed"
                );
                self.failure_message(message_id, &error)
            }
        };
        self.send(&message, compress)
    }

    fn failure_message(&self, message_id: String, error: &CommandError) -> OutgoingMessage {
        OutgoingMessage::failure(message_id, error.code(), error.detail())
    }

    /// Sends an already rendered event body.
    pub fn send_event(&self, event: Value) -> bool {
        self.send(&OutgoingMessage::event(event), false)
    }

    /// Renders a controller event at this session's schema and sends it.
    pub fn send_controller_event(&self, event: &ControllerEvent) -> bool {
        self.send_event(render_event(event, self.schema_version()))
    }

    /// Sends a broadcast controller event if this session is listening.
    pub fn forward_controller_event(&self, event: &ControllerEvent) -> bool {
        let listening = self.receive_events.lock();
        *listening && self.send_controller_event(event)
    }

    fn send(&self, message: &OutgoingMessage, compress: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "Failed to serialize outgoing message");
                return false;
            }
        };
        self.enqueue(Outbound::Text { json, compress })
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        match self.outbox.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %self.id, "Outbox full, disconnecting slow client");
                self.disconnect();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect();
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Liveness and lifecycle
    // ------------------------------------------------------------------------

    /// Probes the client. A probe still unanswered from last time disconnects.
    pub fn check_alive(&self) {
        if !self.is_connected() {
            return;
        }
        if self.outstanding_ping.swap(true, Ordering::AcqRel) {
            warn!(client_id = %self.id, "Client did not answer ping, disconnecting");
            self.disconnect();
            return;
        }
        self.enqueue(Outbound::Ping);
    }

    /// Records a pong.
    pub fn mark_alive(&self) {
        self.outstanding_ping.store(false, Ordering::Release);
    }

    pub fn has_outstanding_ping(&self) -> bool {
        self.outstanding_ping.load(Ordering::Acquire)
    }

    /// Closes the session. Idempotent.
    pub fn disconnect(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!(client_id = %self.id, "Disconnecting session");
            self.cancel_token.cancel();
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Resolves once the session has been disconnected.
    pub fn disconnected(&self) -> WaitForCancellationFuture<'_> {
        self.cancel_token.cancelled()
    }
}
