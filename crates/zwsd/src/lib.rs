//! zws daemon - WebSocket sessions over a shared controller driver
//!
//! This crate provides the server side of the zws protocol:
//! - `session` - per-client protocol state, frame dispatch and transport
//! - `router` and `handlers` - the six command namespaces
//! - `inclusion` - routes interactive inclusion answers to the waiting driver
//! - `registry` - session set owner, liveness probing, forwarder lifecycle
//! - `forward` - event and log fan-out
//! - `server` - accept loop and ordered shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           zwsd                                   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌─────────────────┐       ┌──────────────────────────────┐      │
//! │  │   ZwaveServer   │──────▶│        RegistryActor         │      │
//! │  │  (TcpListener)  │       │  (session set, timer, sinks) │      │
//! │  └────────┬────────┘       └──────────────┬───────────────┘      │
//! │           │ connections                   │ watch<SessionSet>    │
//! │           ▼                               ▼                      │
//! │  ┌─────────────────┐       ┌──────────────────────────────┐      │
//! │  │  ClientSession  │◀──────│  event / log forwarders      │      │
//! │  │  (per client)   │       └──────────────────────────────┘      │
//! │  └────────┬────────┘                                             │
//! │           │ route()                                              │
//! │           ▼                                                      │
//! │  ┌─────────────────┐       ┌──────────────────────────────┐      │
//! │  │    handlers     │──────▶│     Arc<dyn Driver>          │      │
//! │  └─────────────────┘       └──────────────────────────────┘      │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod deferred;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod inclusion;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ServerConfig};
pub use error::{CommandError, CommandResult};
pub use registry::{spawn_registry, RegistryHandle};
pub use router::ServerContext;
pub use server::{ServerError, ShutdownReason, ZwaveServer};
pub use session::{ClientId, ClientSession};

/// Version reported to clients in the greeting.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
