//! Session registry using the actor pattern.
//!
//! The registry owns the set of live sessions and the services shared by
//! all of them: the liveness timer, the event forwarder and the log
//! forwarder.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  RegistryCommand   ┌─────────────────┐  watch<SessionSet>  ┌────────────┐
//! │  connection  │───(mpsc channel)──▶│  RegistryActor  │────────────────────▶│ forwarders │
//! └──────────────┘                    └─────────────────┘                     └────────────┘
//!                                       ▲    │       ▲
//!                              CheckAlive    │       │ Sweep (coalesced, delayed)
//!                                       │    ▼       │
//!                                  liveness timer  sweep task
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use zws_core::Driver;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, SWEEP_DELAY};
pub use commands::{RegistryCommand, RegistryError, RegistryStats};
pub use handle::RegistryHandle;

const COMMAND_BUFFER: usize = 100;

/// Shortest accepted liveness interval.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Spawns the registry actor and returns a handle to it.
///
/// `ping_interval` is the period of the liveness probe. Nothing runs until
/// the first session is added.
pub fn spawn_registry(driver: Arc<dyn Driver>, ping_interval: Duration) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        driver,
        ping_interval.max(MIN_PING_INTERVAL),
    );
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
