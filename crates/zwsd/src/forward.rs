//! Event and log fan-out.
//!
//! Both forwarders read the registry's published session set; neither owns
//! or mutates it. Delivery to a session never blocks: the session's own
//! outbox absorbs the frame or the session is dropped.
//!
//! ```text
//!   driver.subscribe()        ──▶ event forwarder ──┐
//!                                                   ├──▶ sessions (watch) ──▶ outbox
//!   driver.attach_log_sink()  ──▶ log forwarder   ──┘
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use zws_core::{Driver, LogLevel};
use zws_protocol::render_log_entry;

use crate::session::ClientSession;

/// The registry's current sessions, as published to the forwarders.
pub type SessionSet = Arc<Vec<Arc<ClientSession>>>;

fn snapshot(sessions: &watch::Receiver<SessionSet>) -> SessionSet {
    Arc::clone(&*sessions.borrow())
}

// ============================================================================
// Event Forwarder
// ============================================================================

/// Subscribes to the driver's events and spawns the forwarding task.
///
/// The subscription is taken before this returns, so no event emitted
/// afterwards is missed.
pub fn spawn_event_forwarder(
    driver: &dyn Driver,
    sessions: watch::Receiver<SessionSet>,
) -> JoinHandle<()> {
    let mut events = driver.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    for session in snapshot(&sessions).iter().filter(|s| s.is_connected()) {
                        session.forward_controller_event(&event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event forwarder lagged behind the driver");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Driver event stream closed");
                    break;
                }
            }
        }
    })
}

// ============================================================================
// Log Forwarder
// ============================================================================

/// A log sink attached at a fixed level.
#[derive(Debug)]
pub struct LogForwarder {
    level: LogLevel,
    task: JoinHandle<()>,
}

impl LogForwarder {
    /// Attaches a sink at the driver's current log level.
    pub fn start(driver: &dyn Driver, sessions: watch::Receiver<SessionSet>) -> Self {
        let level = driver.log_config().level;
        let mut entries = driver.attach_log_sink(level);
        info!(level = %level, "Log forwarder attached");

        let task = tokio::spawn(async move {
            while let Some(entry) = entries.recv().await {
                let body = render_log_entry(&entry);
                for session in snapshot(&sessions)
                    .iter()
                    .filter(|s| s.is_connected() && s.receives_logs())
                {
                    session.send_event(body.clone());
                }
            }
        });

        Self { level, task }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Detaches the sink. The sink is released when this returns.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        info!(level = %self.level, "Log forwarder detached");
    }
}
