//! TCP accept loop and ordered shutdown.
//!
//! The server:
//! - Listens on a TCP socket and hands each connection to `session::connection`
//! - Owns the registry handle shared by every connection
//! - Stops on cancellation or on a fatal driver failure
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ZwaveServer    │◀──── driver.fatal_errors()
//! │                 │◀──── CancellationToken
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ connection task │────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! Shutdown order: stop accepting, tear down the registry (which
//! disconnects every session and stops the forwarders and timer), then
//! release the listener.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop continues

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use zws_core::{Driver, DriverError};

use crate::config::{ConfigError, ServerConfig};
use crate::registry::{spawn_registry, RegistryHandle};
use crate::router::ServerContext;
use crate::session::connection::{self, ConnectionSettings};
use crate::session::ClientId;

/// Why [`ZwaveServer::run`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// The cancellation token fired.
    Cancelled,
    /// The driver reported an unrecoverable failure.
    DriverFailed(DriverError),
}

impl ShutdownReason {
    /// Whether the process should exit with a failure status.
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownReason::DriverFailed(_))
    }
}

/// The WebSocket server.
pub struct ZwaveServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: ServerContext,
    settings: ConnectionSettings,
    cancel_token: CancellationToken,
}

impl ZwaveServer {
    /// Binds the listener and spawns the registry.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn bind(config: &ServerConfig, driver: Arc<dyn Driver>) -> Result<Self, ServerError> {
        config.validate()?;

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ServerError::Bind {
                address: address.clone(),
                error: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            address,
            error: e.to_string(),
        })?;

        let registry = spawn_registry(Arc::clone(&driver), config.ping_interval());
        Ok(Self {
            listener,
            local_addr,
            ctx: ServerContext::new(driver, registry),
            settings: config.connection_settings(),
            cancel_token: CancellationToken::new(),
        })
    }

    /// The bound address. Useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Cancelling this token shuts the server down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.ctx.registry
    }

    /// Accepts connections until cancelled or the driver fails, then tears
    /// everything down.
    pub async fn run(self) -> ShutdownReason {
        let Self {
            listener,
            local_addr,
            ctx,
            settings,
            cancel_token,
        } = self;
        info!(address = %local_addr, "Server listening");

        let mut fatal = ctx.driver.fatal_errors();
        let mut fatal_open = true;
        let mut next_client: u64 = 1;

        let reason = loop {
            let failure = fatal.borrow_and_update().clone();
            if let Some(error) = failure {
                error!(error = %error, "Driver failed, shutting down");
                break ShutdownReason::DriverFailed(error);
            }

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break ShutdownReason::Cancelled;
                }

                changed = fatal.changed(), if fatal_open => {
                    if changed.is_err() {
                        debug!("Driver fatal-error channel closed");
                        fatal_open = false;
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let client_id = ClientId::new(next_client);
                            next_client += 1;
                            let ctx = ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    connection::serve(stream, peer, client_id, ctx, settings).await
                                {
                                    warn!(client_id = %client_id, peer = %peer, error = %e, "Connection failed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        };

        if let Err(e) = ctx.registry.teardown().await {
            warn!(error = %e, "Registry teardown failed");
        }
        drop(listener);
        info!(address = %local_addr, "Server stopped");
        reason
    }
}

/// Errors starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {error}")]
    Bind { address: String, error: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zws_core::error::codes;
    use zws_core::SimulatedDriver;

    fn loopback() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let server = ZwaveServer::bind(&loopback(), Arc::new(SimulatedDriver::with_nodes(1)))
            .await
            .unwrap();
        assert!(server.local_addr().ip().is_loopback());
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            outbox_capacity: 0,
            ..loopback()
        };
        let result = ZwaveServer::bind(&config, Arc::new(SimulatedDriver::with_nodes(1))).await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_server() {
        let server = ZwaveServer::bind(&loopback(), Arc::new(SimulatedDriver::with_nodes(1)))
            .await
            .unwrap();
        let token = server.cancel_token();
        let run = tokio::spawn(server.run());
        token.cancel();
        let reason = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Cancelled);
        assert!(!reason.is_failure());
    }

    #[tokio::test]
    async fn test_fatal_driver_error_stops_server() {
        let sim = SimulatedDriver::with_nodes(1);
        let server = ZwaveServer::bind(&loopback(), Arc::new(sim.clone()))
            .await
            .unwrap();
        let run = tokio::spawn(server.run());

        let error = DriverError::new(codes::DRIVER_FAILED, "serial port gone");
        sim.fail_fatally(error.clone());
        let reason = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::DriverFailed(error));
        assert!(reason.is_failure());
    }

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            address: "0.0.0.0:1".to_string(),
            error: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to bind 0.0.0.0:1: permission denied");
    }
}
