//! Client interface for the `RegistryActor`.
//!
//! # Panic-Free Guarantees
//!
//! - Channel errors are mapped to `RegistryError::ChannelClosed`, or to an
//!   empty/default answer for read-only queries

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::commands::{RegistryCommand, RegistryError, RegistryStats};
use crate::session::{ClientId, ClientSession};

// ============================================================================
// Registry Handle
// ============================================================================

/// Cheap-to-clone handle to the registry actor.
///
/// The actor stops once every handle is dropped.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Registers a session that has already been sent its version frame.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyRegistered` if the id is taken
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn add_session(&self, session: Arc<ClientSession>) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::AddSession {
                session,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Reports a finished connection. Fire-and-forget.
    pub async fn session_closed(&self, client_id: ClientId) {
        if self
            .sender
            .send(RegistryCommand::SessionClosed { client_id })
            .await
            .is_err()
        {
            debug!(client_id = %client_id, "Registry gone, session close not reported");
        }
    }

    /// All registered sessions.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn sessions(&self) -> Vec<Arc<ClientSession>> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Sessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Brings the log forwarder in line with the current subscriptions and
    /// log level. Returns once it is.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn reconcile_logs(&self) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::ReconcileLogs { respond_to })
            .await
    }

    /// Stops timers and forwarders and disconnects every session. Idempotent.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn teardown(&self) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Teardown { respond_to })
            .await
    }

    /// Summary of the registry state.
    ///
    /// Returns default stats if the actor has shut down.
    pub async fn stats(&self) -> RegistryStats {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Stats { respond_to: tx })
            .await
            .is_err()
        {
            return RegistryStats::default();
        }

        rx.await.unwrap_or_default()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> RegistryCommand,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(command(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_handle() -> RegistryHandle {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        RegistryHandle::new(tx)
    }

    #[tokio::test]
    async fn test_closed_actor_errors() {
        let handle = closed_handle();
        let (session, _outbox) = ClientSession::new(ClientId::new(1), 4);

        assert_eq!(
            handle.add_session(session).await,
            Err(RegistryError::ChannelClosed)
        );
        assert_eq!(handle.reconcile_logs().await, Err(RegistryError::ChannelClosed));
        assert_eq!(handle.teardown().await, Err(RegistryError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_closed_actor_queries_default() {
        let handle = closed_handle();
        assert!(handle.sessions().await.is_empty());
        assert_eq!(handle.stats().await, RegistryStats::default());
        handle.session_closed(ClientId::new(1)).await;
    }
}
