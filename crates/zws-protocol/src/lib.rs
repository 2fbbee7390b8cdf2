//! zws protocol - JSON-over-WebSocket wire format
//!
//! This crate provides frame parsing, typed commands, outgoing message
//! types and the schema-aware state dump shared by the server and its
//! tests.

pub mod command;
pub mod dump;
pub mod message;
pub mod parse;
pub mod version;

pub use command::{
    CcApiCall, CommandParseError, ControllerCommand, DriverCommand, EndpointAddress,
    EndpointCommand, IncomingCommand, Namespace, NodeCommand, SessionCommand, VirtualCcAddress,
    VirtualNodeCommand,
};
pub use dump::{dump_node, dump_state, render_event, render_log_entry, DriverState};
pub use message::{ErrorCode, OutgoingMessage, ResultMessage, VersionMessage};
pub use parse::{Envelope, ParseError};
pub use version::{SchemaVersion, VersionError, MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};
