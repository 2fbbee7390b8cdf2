//! Client sessions.
//!
//! - `client` - per-connection protocol state and the outbox send path
//! - `dispatch` - turns frames into commands and commands into results
//! - `connection` - the WebSocket reader and writer tasks

mod client;
pub mod connection;
pub mod dispatch;

pub use client::{ClientId, ClientSession, Outbound};
pub use connection::{ConnectionError, ConnectionSettings};
