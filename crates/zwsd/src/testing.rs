//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use zws_core::SimulatedDriver;

use crate::registry::spawn_registry;
use crate::router::ServerContext;
use crate::session::{ClientId, ClientSession, Outbound};

/// A context over a fresh two-node simulated network.
///
/// Must be called inside a tokio runtime; the registry actor is spawned.
pub fn test_context() -> (ServerContext, SimulatedDriver) {
    let sim = SimulatedDriver::with_nodes(2);
    let driver: Arc<dyn zws_core::Driver> = Arc::new(sim.clone());
    let registry = spawn_registry(Arc::clone(&driver), Duration::from_secs(30));
    (ServerContext::new(driver, registry), sim)
}

pub fn test_session() -> (Arc<ClientSession>, mpsc::Receiver<Outbound>) {
    ClientSession::new(ClientId::new(1), 64)
}

/// Pops the next queued text frame as JSON.
pub fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Option<Value> {
    loop {
        match rx.try_recv().ok()? {
            Outbound::Text { json, .. } => return serde_json::from_str(&json).ok(),
            Outbound::Ping => continue,
        }
    }
}

/// Waits up to a second for the next text frame.
pub async fn recv_frame(rx: &mut mpsc::Receiver<Outbound>) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        let frame = tokio::time::timeout_at(deadline, rx.recv()).await.ok()??;
        if let Outbound::Text { json, .. } = frame {
            return serde_json::from_str(&json).ok();
        }
    }
}
