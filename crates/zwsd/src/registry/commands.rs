//! Registry actor commands and errors.
//!
//! - `RegistryCommand`: messages sent to the actor
//! - `RegistryError`: failures reported back through `RegistryHandle`
//! - `RegistryStats`: a point-in-time summary for logging and tests

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use zws_core::LogLevel;

use crate::session::{ClientId, ClientSession};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request-style commands carry a oneshot channel for the response. The
/// actor sends `SessionClosed`, `Sweep` and `CheckAlive` to itself as well.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Adds a freshly greeted session.
    ///
    /// The first session since the last teardown starts the liveness timer
    /// and the event forwarder.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyRegistered` if the id is taken
    AddSession {
        session: Arc<ClientSession>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// A connection ended. Schedules a sweep instead of removing inline.
    SessionClosed { client_id: ClientId },

    /// Removes every disconnected session, then reconciles the log sink.
    Sweep,

    /// Liveness tick: probes every connected session.
    CheckAlive,

    /// Returns the registered sessions.
    Sessions {
        respond_to: oneshot::Sender<Vec<Arc<ClientSession>>>,
    },

    /// Starts, restarts or stops the log forwarder to match the sessions'
    /// `receive_logs` flags and the driver's current log level.
    ///
    /// Replies after the forwarder is in its new state.
    ReconcileLogs { respond_to: oneshot::Sender<()> },

    /// Stops the timer and forwarders and disconnects every session.
    Teardown { respond_to: oneshot::Sender<()> },

    /// Returns a summary of the registry state.
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A session with this id is already registered.
    #[error("session already registered: {0}")]
    AlreadyRegistered(ClientId),

    /// The actor has stopped.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Stats
// ============================================================================

/// What the registry is currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered sessions, including disconnected ones not yet swept.
    pub sessions: usize,
    /// Level of the attached log sink, if one is attached.
    pub log_level: Option<LogLevel>,
    pub liveness_running: bool,
    pub events_running: bool,
}
