//! zws core - controller domain types and the driver capability
//!
//! This crate defines what the server knows about a controller: node and
//! value snapshots, security classes, log configuration, events, and the
//! [`Driver`] trait through which every hardware operation flows. It also
//! ships [`SimulatedDriver`], an in-memory implementation.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod association;
pub mod driver;
pub mod error;
pub mod event;
pub mod ids;
pub mod log;
pub mod provisioning;
pub mod security;
pub mod sim;
pub mod state;
pub mod value;

// Re-exports for convenience
pub use association::{AssociationAddress, AssociationGroup};
pub use driver::{CcTarget, Driver, InclusionUserCallbacks, VirtualTarget};
pub use error::{DriverError, DriverResult};
pub use event::{ControllerEvent, EventSource};
pub use ids::{HomeId, NodeId};
pub use log::{LogConfig, LogEntry, LogLevel, PartialLogConfig};
pub use provisioning::{DskOrNodeId, ProvisioningEntry};
pub use security::{InclusionGrant, InclusionOptions, InclusionStrategy, SecurityClass};
pub use sim::SimulatedDriver;
pub use state::{
    CommandClassInfo, ControllerSnapshot, EndpointSnapshot, NetworkSnapshot, NodeSnapshot,
    NodeStatus, ValueSnapshot,
};
pub use value::{PropertyKey, ValueId, ValueMetadata};
