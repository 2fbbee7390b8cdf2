//! The controller driver capability.
//!
//! The server never talks to hardware directly. Everything it exposes to
//! clients goes through the [`Driver`] trait, shared as `Arc<dyn Driver>`.
//!
//! # Interactive operations
//!
//! Inclusion and node replacement may pause halfway and ask a human for
//! input. The driver receives an [`InclusionUserCallbacks`] object for this
//! and awaits its answers. A callback returning `None` means the client
//! declined or the exchange was abandoned; the driver continues without
//! security in that case.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    AssociationAddress, AssociationGroup, ControllerEvent, DriverError, DriverResult,
    DskOrNodeId, HomeId, InclusionGrant, InclusionOptions, LogConfig, LogEntry, LogLevel,
    NetworkSnapshot, NodeId, NodeSnapshot, PartialLogConfig, ProvisioningEntry, SecurityClass,
    ValueId, ValueMetadata,
};

/// User interaction hooks handed to the driver for one inclusion.
#[async_trait]
pub trait InclusionUserCallbacks: Send + Sync {
    /// Asks which of the `requested` security classes to grant.
    async fn grant_security_classes(&self, requested: InclusionGrant) -> Option<InclusionGrant>;

    /// Shows the partial DSK and asks for the 5-digit PIN.
    async fn validate_dsk_and_enter_pin(&self, dsk: String) -> Option<String>;

    /// Called by the driver when it gives up on the interaction.
    fn abort(&self);
}

/// A virtual node addressing several real nodes at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualTarget {
    /// Every node in the network.
    Broadcast,
    /// A fixed set of nodes.
    Multicast(Vec<NodeId>),
}

/// The recipient of a command-class call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcTarget {
    Endpoint { node_id: NodeId, index: u8 },
    Virtual { target: VirtualTarget, index: u8 },
}

/// Access to a stateful controller.
///
/// Methods that touch the radio are async. Lookups against cached state are
/// synchronous. Every fallible operation reports failures as [`DriverError`].
#[async_trait]
pub trait Driver: Send + Sync {
    // ------------------------------------------------------------------------
    // Identity, events, lifecycle
    // ------------------------------------------------------------------------

    fn driver_version(&self) -> String;

    fn home_id(&self) -> HomeId;

    /// Subscribes to every event the driver emits from now on.
    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent>;

    /// Becomes `Some` once the driver has failed unrecoverably.
    fn fatal_errors(&self) -> watch::Receiver<Option<DriverError>>;

    fn network_state(&self) -> NetworkSnapshot;

    /// Driver options as a JSON object.
    fn get_config(&self) -> Value;

    // ------------------------------------------------------------------------
    // Logging and statistics
    // ------------------------------------------------------------------------

    fn log_config(&self) -> LogConfig;

    fn update_log_config(&self, update: PartialLogConfig) -> DriverResult<()>;

    /// Attaches a sink receiving every log entry at or below `level`.
    ///
    /// The sink detaches when the receiver is dropped.
    fn attach_log_sink(&self, level: LogLevel) -> mpsc::UnboundedReceiver<LogEntry>;

    async fn enable_statistics(
        &self,
        application_name: String,
        application_version: String,
    ) -> DriverResult<()>;

    async fn disable_statistics(&self) -> DriverResult<()>;

    fn statistics_enabled(&self) -> bool;

    /// Returns the newer config version, if one is available.
    async fn check_for_config_updates(&self) -> DriverResult<Option<String>>;

    async fn install_config_update(&self) -> DriverResult<bool>;

    // ------------------------------------------------------------------------
    // Controller
    // ------------------------------------------------------------------------

    async fn begin_inclusion(
        &self,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool>;

    async fn stop_inclusion(&self) -> DriverResult<bool>;

    async fn begin_exclusion(&self, unprovision: bool) -> DriverResult<bool>;

    async fn stop_exclusion(&self) -> DriverResult<bool>;

    async fn replace_failed_node(
        &self,
        node_id: NodeId,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool>;

    async fn remove_failed_node(&self, node_id: NodeId) -> DriverResult<()>;

    async fn is_failed_node(&self, node_id: NodeId) -> DriverResult<bool>;

    async fn heal_node(&self, node_id: NodeId) -> DriverResult<bool>;

    fn begin_healing_network(&self) -> DriverResult<bool>;

    fn stop_healing_network(&self) -> DriverResult<bool>;

    async fn get_node_neighbors(&self, node_id: NodeId) -> DriverResult<Vec<NodeId>>;

    fn get_association_groups(
        &self,
        source: AssociationAddress,
    ) -> DriverResult<BTreeMap<u8, AssociationGroup>>;

    fn get_associations(
        &self,
        source: AssociationAddress,
    ) -> DriverResult<BTreeMap<u8, Vec<AssociationAddress>>>;

    fn is_association_allowed(
        &self,
        source: AssociationAddress,
        group: u8,
        destination: AssociationAddress,
    ) -> DriverResult<bool>;

    async fn add_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()>;

    async fn remove_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()>;

    async fn remove_node_from_all_associations(&self, node_id: NodeId) -> DriverResult<()>;

    fn provision_smart_start_node(&self, entry: ProvisioningEntry) -> DriverResult<()>;

    fn unprovision_smart_start_node(&self, key: DskOrNodeId) -> DriverResult<()>;

    fn get_provisioning_entries(&self) -> Vec<ProvisioningEntry>;

    // ------------------------------------------------------------------------
    // Nodes and endpoints
    // ------------------------------------------------------------------------

    /// Number of endpoints besides the root, or `None` for unknown nodes.
    fn endpoint_count(&self, node_id: NodeId) -> Option<u8>;

    fn node_state(&self, node_id: NodeId) -> Option<NodeSnapshot>;

    async fn set_value(
        &self,
        node_id: NodeId,
        value_id: ValueId,
        value: Value,
        options: Option<Value>,
    ) -> DriverResult<bool>;

    fn get_defined_value_ids(&self, node_id: NodeId) -> DriverResult<Vec<ValueId>>;

    fn get_value_metadata(&self, node_id: NodeId, value_id: &ValueId)
        -> DriverResult<ValueMetadata>;

    fn get_value(&self, node_id: NodeId, value_id: &ValueId) -> DriverResult<Option<Value>>;

    async fn poll_value(&self, node_id: NodeId, value_id: ValueId) -> DriverResult<Option<Value>>;

    async fn refresh_info(&self, node_id: NodeId) -> DriverResult<()>;

    async fn refresh_values(&self, node_id: NodeId) -> DriverResult<()>;

    async fn ping(&self, node_id: NodeId) -> DriverResult<bool>;

    fn set_name(&self, node_id: NodeId, name: String) -> DriverResult<()>;

    fn set_location(&self, node_id: NodeId, location: String) -> DriverResult<()>;

    fn has_security_class(&self, node_id: NodeId, class: SecurityClass) -> DriverResult<bool>;

    fn get_highest_security_class(&self, node_id: NodeId) -> DriverResult<Option<SecurityClass>>;

    // ------------------------------------------------------------------------
    // Command classes (real and virtual endpoints)
    // ------------------------------------------------------------------------

    async fn invoke_cc_api(
        &self,
        target: CcTarget,
        command_class: u16,
        method_name: String,
        args: Vec<Value>,
    ) -> DriverResult<Value>;

    fn supports_cc_api(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool>;

    fn supports_cc(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool>;

    fn controls_cc(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool>;

    fn is_cc_secure(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool>;

    fn get_cc_version(&self, target: &CcTarget, command_class: u16) -> DriverResult<u8>;

    // ------------------------------------------------------------------------
    // Virtual nodes
    // ------------------------------------------------------------------------

    async fn virtual_set_value(
        &self,
        target: VirtualTarget,
        value_id: ValueId,
        value: Value,
        options: Option<Value>,
    ) -> DriverResult<bool>;

    fn virtual_endpoint_count(&self, target: &VirtualTarget) -> DriverResult<u8>;

    fn virtual_defined_value_ids(&self, target: &VirtualTarget) -> DriverResult<Vec<ValueId>>;
}
