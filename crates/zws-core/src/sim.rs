//! In-memory driver.
//!
//! `SimulatedDriver` models a small network of binary switches behind a
//! controller. It is what the `zwsd` binary runs against when no hardware
//! is attached, and what the test suites drive.
//!
//! ```text
//!   node 1        controller (no values)
//!   node 2..=N+1  binary switch, endpoints 0 and 1,
//!                 lifeline association to node 1
//! ```
//!
//! Inclusion walks the same interactive path real hardware would: for the
//! `Default` and `Security_S2` strategies it asks for a security grant,
//! then (for authenticated classes) for the PIN matching [`SIM_DSK`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::driver::{CcTarget, Driver, InclusionUserCallbacks, VirtualTarget};
use crate::error::codes;
use crate::{
    AssociationAddress, AssociationGroup, CommandClassInfo, ControllerEvent, ControllerSnapshot,
    DriverError, DriverResult, DskOrNodeId, EndpointSnapshot, EventSource, HomeId,
    InclusionGrant, InclusionOptions, InclusionStrategy, LogConfig, LogEntry, LogLevel,
    NetworkSnapshot, NodeId, NodeSnapshot, NodeStatus, PartialLogConfig, PropertyKey,
    ProvisioningEntry, SecurityClass, ValueId, ValueMetadata, ValueSnapshot,
};

pub const CC_BASIC: u16 = 0x20;
pub const CC_BINARY_SWITCH: u16 = 0x25;
pub const CC_MULTI_CHANNEL: u16 = 0x60;
pub const CC_ASSOCIATION: u16 = 0x85;
pub const CC_VERSION: u16 = 0x86;

/// DSK of every simulated joining node. The first block is the PIN.
pub const SIM_DSK: &str = "12345-23456-34567-45678-56789-61234-71234-81234";

const CONTROLLER_NODE: NodeId = NodeId::new(1);
const DEFAULT_HOME_ID: u32 = 0xC0FF_EE01;
const EVENT_CAPACITY: usize = 256;
const INTERACTION_TIMEOUT: Duration = Duration::from_secs(240);

// ============================================================================
// State
// ============================================================================

enum ControllerOp {
    Idle,
    Including {
        generation: u64,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    },
    Excluding {
        unprovision: bool,
    },
}

struct LogSink {
    level: LogLevel,
    tx: mpsc::UnboundedSender<LogEntry>,
}

struct SimState {
    nodes: BTreeMap<NodeId, NodeSnapshot>,
    associations: BTreeMap<AssociationAddress, BTreeMap<u8, Vec<AssociationAddress>>>,
    provisioning: Vec<ProvisioningEntry>,
    log_config: LogConfig,
    statistics: Option<(String, String)>,
    config_update: Option<String>,
    controller_op: ControllerOp,
    healing: bool,
    next_node_id: u16,
    next_generation: u64,
}

impl SimState {
    fn new(node_count: u16) -> Self {
        let mut state = Self {
            nodes: BTreeMap::new(),
            associations: BTreeMap::new(),
            provisioning: Vec::new(),
            log_config: LogConfig::default(),
            statistics: None,
            config_update: Some("0.1.1".to_string()),
            controller_op: ControllerOp::Idle,
            healing: false,
            next_node_id: 2,
            next_generation: 0,
        };
        state
            .nodes
            .insert(CONTROLLER_NODE, build_controller_node());
        for i in 0..node_count {
            let node_id = state.allocate_node_id();
            let security = if i % 2 == 0 {
                vec![SecurityClass::S2Authenticated]
            } else {
                Vec::new()
            };
            state.add_node(build_node(node_id, security));
        }
        state
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        id
    }

    fn add_node(&mut self, node: NodeSnapshot) {
        self.associations
            .insert(AssociationAddress::node(node.node_id), lifeline());
        self.nodes.insert(node.node_id, node);
    }

    fn node(&self, node_id: NodeId) -> DriverResult<&NodeSnapshot> {
        self.nodes
            .get(&node_id)
            .ok_or_else(|| DriverError::node_not_found(node_id))
    }

    fn node_mut(&mut self, node_id: NodeId) -> DriverResult<&mut NodeSnapshot> {
        self.nodes
            .get_mut(&node_id)
            .ok_or_else(|| DriverError::node_not_found(node_id))
    }

    fn is_idle(&self) -> bool {
        matches!(self.controller_op, ControllerOp::Idle)
    }

    fn is_including(&self, generation: u64) -> bool {
        matches!(
            self.controller_op,
            ControllerOp::Including { generation: g, .. } if g == generation
        )
    }

    fn start_inclusion(&mut self, callbacks: Arc<dyn InclusionUserCallbacks>) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.controller_op = ControllerOp::Including {
            generation,
            callbacks,
        };
        generation
    }

    fn virtual_members(&self, target: &VirtualTarget) -> DriverResult<Vec<NodeId>> {
        match target {
            VirtualTarget::Broadcast => Ok(self
                .nodes
                .values()
                .filter(|node| !node.is_controller_node)
                .map(|node| node.node_id)
                .collect()),
            VirtualTarget::Multicast(ids) => {
                if ids.is_empty() {
                    return Err(DriverError::new(
                        codes::ARGUMENT_INVALID,
                        "A multicast group needs at least one node",
                    ));
                }
                for id in ids {
                    self.node(*id)?;
                }
                Ok(ids.clone())
            }
        }
    }

    fn target_endpoints(&self, target: &CcTarget) -> DriverResult<Vec<&EndpointSnapshot>> {
        let (members, index) = match target {
            CcTarget::Endpoint { node_id, index } => (vec![*node_id], *index),
            CcTarget::Virtual { target, index } => (self.virtual_members(target)?, *index),
        };
        members
            .into_iter()
            .map(|node_id| {
                self.node(node_id)?.endpoint(index).ok_or_else(|| {
                    DriverError::new(
                        codes::ARGUMENT_INVALID,
                        format!("Node {node_id} has no endpoint {index}"),
                    )
                })
            })
            .collect()
    }

    fn association_groups(
        &self,
        source: AssociationAddress,
    ) -> DriverResult<BTreeMap<u8, AssociationGroup>> {
        let node = self.node(source.node_id)?;
        if node.endpoint(source.endpoint.unwrap_or(0)).is_none() {
            return Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                format!("Node {} has no such endpoint", source.node_id),
            ));
        }
        if node.is_controller_node {
            return Ok(BTreeMap::new());
        }
        let mut groups = BTreeMap::new();
        groups.insert(
            1,
            AssociationGroup {
                max_nodes: 1,
                is_lifeline: true,
                multi_channel: true,
                label: "Lifeline".to_string(),
            },
        );
        groups.insert(
            2,
            AssociationGroup {
                max_nodes: 5,
                is_lifeline: false,
                multi_channel: false,
                label: "On/Off control".to_string(),
            },
        );
        Ok(groups)
    }

    /// Sets a binary switch on one endpoint and returns the resulting event.
    fn apply_switch(
        &mut self,
        node_id: NodeId,
        index: u8,
        on: bool,
    ) -> DriverResult<Option<ControllerEvent>> {
        let node = self.node_mut(node_id)?;
        let target_id = ValueId::new(CC_BINARY_SWITCH, index, "targetValue");
        let current_id = ValueId::new(CC_BINARY_SWITCH, index, "currentValue");
        let Some(target) = node.value_mut(&target_id) else {
            return Ok(None);
        };
        target.value = Value::Bool(on);
        let Some(current) = node.value_mut(&current_id) else {
            return Ok(None);
        };
        let prev = std::mem::replace(&mut current.value, Value::Bool(on));
        Ok(Some(ControllerEvent::for_node(node_id, "value updated").with(
            "args",
            json!({
                "commandClassName": "Binary Switch",
                "commandClass": CC_BINARY_SWITCH,
                "endpoint": index,
                "property": "currentValue",
                "newValue": on,
                "prevValue": prev,
            }),
        )))
    }
}

fn lifeline() -> BTreeMap<u8, Vec<AssociationAddress>> {
    let mut groups = BTreeMap::new();
    groups.insert(1, vec![AssociationAddress::node(CONTROLLER_NODE)]);
    groups.insert(2, Vec::new());
    groups
}

fn normalize(address: AssociationAddress) -> AssociationAddress {
    AssociationAddress {
        node_id: address.node_id,
        endpoint: address.endpoint.filter(|ep| *ep != 0),
    }
}

fn cc(id: u16, name: &str, version: u8, is_secure: bool, is_controlled: bool) -> CommandClassInfo {
    CommandClassInfo {
        id,
        name: name.to_string(),
        version,
        is_secure,
        is_controlled,
    }
}

fn switch_values(index: u8) -> [ValueSnapshot; 2] {
    [
        ValueSnapshot {
            value_id: ValueId::new(CC_BINARY_SWITCH, index, "currentValue"),
            value: Value::Bool(false),
            metadata: ValueMetadata::boolean("Current value", false),
        },
        ValueSnapshot {
            value_id: ValueId::new(CC_BINARY_SWITCH, index, "targetValue"),
            value: Value::Bool(false),
            metadata: ValueMetadata::boolean("Target value", true),
        },
    ]
}

fn build_node(node_id: NodeId, security_classes: Vec<SecurityClass>) -> NodeSnapshot {
    let secure = !security_classes.is_empty();
    let endpoint = |index: u8| {
        let mut command_classes = vec![
            cc(CC_BINARY_SWITCH, "Binary Switch", 2, secure, false),
            cc(CC_BASIC, "Basic", 2, false, true),
        ];
        if index == 0 {
            command_classes.push(cc(CC_MULTI_CHANNEL, "Multi Channel", 4, false, false));
            command_classes.push(cc(CC_ASSOCIATION, "Association", 2, secure, false));
            command_classes.push(cc(CC_VERSION, "Version", 3, false, false));
        }
        EndpointSnapshot {
            node_id,
            index,
            device_class: Some("Binary Switch".to_string()),
            command_classes,
        }
    };
    let mut values = Vec::with_capacity(4);
    values.extend(switch_values(0));
    values.extend(switch_values(1));

    NodeSnapshot {
        node_id,
        name: None,
        location: None,
        status: NodeStatus::Alive,
        ready: true,
        is_listening: true,
        is_secure: secure,
        security_classes,
        manufacturer_id: 0x0086,
        product_id: 0x0060,
        product_type: 0x0003,
        firmware_version: "1.4".to_string(),
        is_controller_node: false,
        endpoints: vec![endpoint(0), endpoint(1)],
        values,
    }
}

fn build_controller_node() -> NodeSnapshot {
    NodeSnapshot {
        node_id: CONTROLLER_NODE,
        name: Some("Controller".to_string()),
        location: None,
        status: NodeStatus::Alive,
        ready: true,
        is_listening: true,
        is_secure: false,
        security_classes: Vec::new(),
        manufacturer_id: 0x0000,
        product_id: 0x0001,
        product_type: 0x0001,
        firmware_version: "7.19".to_string(),
        is_controller_node: true,
        endpoints: vec![EndpointSnapshot {
            node_id: CONTROLLER_NODE,
            index: 0,
            device_class: Some("Static Controller".to_string()),
            command_classes: vec![cc(CC_VERSION, "Version", 3, false, false)],
        }],
        values: Vec::new(),
    }
}

// ============================================================================
// SimulatedDriver
// ============================================================================

struct SimInner {
    home_id: HomeId,
    events: broadcast::Sender<ControllerEvent>,
    fatal: watch::Sender<Option<DriverError>>,
    state: Mutex<SimState>,
    log_sinks: Mutex<Vec<LogSink>>,
    inclusion_attempts: AtomicUsize,
}

/// A `Driver` backed by in-memory state.
///
/// Cheap to clone; clones share the same network.
#[derive(Clone)]
pub struct SimulatedDriver {
    inner: Arc<SimInner>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::with_nodes(2)
    }
}

impl SimulatedDriver {
    /// Creates a network with the controller plus `node_count` switches.
    pub fn with_nodes(node_count: u16) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (fatal, _) = watch::channel(None);
        Self {
            inner: Arc::new(SimInner {
                home_id: HomeId::new(DEFAULT_HOME_ID),
                events,
                fatal,
                state: Mutex::new(SimState::new(node_count)),
                log_sinks: Mutex::new(Vec::new()),
                inclusion_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Publishes an event to every subscriber.
    pub fn emit(&self, event: ControllerEvent) {
        debug!(source = %event.source, event = %event.event, "Simulated driver event");
        let _ = self.inner.events.send(event);
    }

    /// Writes a log line to every attached sink that admits `level`.
    pub fn log(&self, level: LogLevel, label: &str, message: impl Into<String>) {
        let entry = LogEntry::new(level, label, message);
        let mut sinks = self.inner.log_sinks.lock();
        sinks.retain(|sink| !sink.tx.is_closed());
        for sink in sinks.iter().filter(|sink| sink.level.admits(level)) {
            let _ = sink.tx.send(entry.clone());
        }
    }

    /// Number of log sinks whose receiver is still alive.
    pub fn active_log_sinks(&self) -> usize {
        let mut sinks = self.inner.log_sinks.lock();
        sinks.retain(|sink| !sink.tx.is_closed());
        sinks.len()
    }

    /// Marks the driver as failed; the fatal watch fires.
    pub fn fail_fatally(&self, error: DriverError) {
        warn!(error = %error, "Simulated driver failing fatally");
        self.inner.fatal.send_replace(Some(error));
    }

    /// How many times `begin_inclusion` or `replace_failed_node` reached the driver.
    pub fn inclusion_attempts(&self) -> usize {
        self.inner.inclusion_attempts.load(Ordering::SeqCst)
    }

    /// Changes a node's status and emits the matching node event.
    pub fn set_node_status(&self, node_id: NodeId, status: NodeStatus) -> DriverResult<()> {
        self.inner.state.lock().node_mut(node_id)?.status = status;
        let event = match status {
            NodeStatus::Dead => "dead",
            NodeStatus::Alive => "alive",
            NodeStatus::Asleep => "sleep",
            NodeStatus::Awake => "wake up",
            NodeStatus::Unknown => return Ok(()),
        };
        self.emit(ControllerEvent::for_node(node_id, event));
        Ok(())
    }

    /// Completes a running exclusion by removing `node_id`.
    pub fn exclude_node(&self, node_id: NodeId) -> DriverResult<()> {
        let node = {
            let mut state = self.inner.state.lock();
            let ControllerOp::Excluding { unprovision } = state.controller_op else {
                return Err(DriverError::new(
                    codes::ARGUMENT_INVALID,
                    "Exclusion is not active",
                ));
            };
            let node = state
                .nodes
                .remove(&node_id)
                .ok_or_else(|| DriverError::node_not_found(node_id))?;
            state.associations.retain(|key, _| key.node_id != node_id);
            if unprovision {
                state
                    .provisioning
                    .retain(|entry| entry.node_id != Some(node_id));
            }
            state.controller_op = ControllerOp::Idle;
            node
        };
        self.emit(ControllerEvent::new(EventSource::Controller, "exclusion stopped"));
        self.emit(ControllerEvent::new(EventSource::Controller, "node removed").with_node(node));
        Ok(())
    }

    pub fn set_available_config_update(&self, version: Option<String>) {
        self.inner.state.lock().config_update = version;
    }

    fn still_including(&self, generation: u64) -> bool {
        self.inner.state.lock().is_including(generation)
    }

    /// Awaits a user answer, giving up after the interaction timeout.
    async fn ask<T>(
        &self,
        callbacks: &dyn InclusionUserCallbacks,
        question: impl Future<Output = Option<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(INTERACTION_TIMEOUT, question).await {
            Ok(answer) => answer,
            Err(_) => {
                warn!("Timed out waiting for user input during inclusion");
                callbacks.abort();
                None
            }
        }
    }

    /// Runs the S2 grant and PIN exchange.
    ///
    /// Returns `None` if the inclusion was stopped while waiting.
    async fn bootstrap_s2(
        &self,
        generation: u64,
        callbacks: &dyn InclusionUserCallbacks,
    ) -> Option<Vec<SecurityClass>> {
        let requested = InclusionGrant {
            security_classes: SecurityClass::BY_STRENGTH.to_vec(),
            client_side_auth: false,
        };
        let answer = self
            .ask(callbacks, callbacks.grant_security_classes(requested.clone()))
            .await;
        if !self.still_including(generation) {
            return None;
        }
        let Some(grant) = answer else {
            self.log(LogLevel::Warn, "CNTRLR", "Security grant declined, continuing insecurely");
            return Some(Vec::new());
        };
        let granted: Vec<SecurityClass> = grant
            .security_classes
            .into_iter()
            .filter(|class| requested.security_classes.contains(class))
            .collect();
        if !granted.iter().any(|class| class.requires_pin()) {
            return Some(granted);
        }

        let (pin, rest) = SIM_DSK.split_once('-').unwrap_or((SIM_DSK, ""));
        let answer = self
            .ask(
                callbacks,
                callbacks.validate_dsk_and_enter_pin(format!("-{rest}")),
            )
            .await;
        if !self.still_including(generation) {
            return None;
        }
        match answer {
            Some(entered) if entered == pin => Some(granted),
            Some(_) => {
                self.log(LogLevel::Warn, "CNTRLR", "Wrong PIN entered, S2 bootstrapping failed");
                Some(Vec::new())
            }
            None => Some(Vec::new()),
        }
    }

    async fn run_inclusion(
        self,
        generation: u64,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
        replacing: Option<NodeId>,
    ) {
        let security_classes = match options.strategy {
            InclusionStrategy::Insecure | InclusionStrategy::SmartStart => Vec::new(),
            InclusionStrategy::SecurityS0 => vec![SecurityClass::S0Legacy],
            InclusionStrategy::Default | InclusionStrategy::SecurityS2 => {
                match self.bootstrap_s2(generation, callbacks.as_ref()).await {
                    Some(classes) => classes,
                    None => {
                        debug!(generation, "Inclusion stopped during S2 bootstrapping");
                        return;
                    }
                }
            }
        };

        let node = {
            let mut state = self.inner.state.lock();
            if !state.is_including(generation) {
                return;
            }
            state.controller_op = ControllerOp::Idle;
            let node_id = match replacing {
                Some(id) => id,
                None => state.allocate_node_id(),
            };
            let node = build_node(node_id, security_classes);
            state.add_node(node.clone());
            node
        };

        let low_security =
            node.security_classes.is_empty() && options.strategy != InclusionStrategy::Insecure;
        info!(node_id = %node.node_id, low_security, "Simulated node joined");
        self.log(
            LogLevel::Info,
            "CNTRLR",
            format!("Node {} was included", node.node_id),
        );
        self.emit(ControllerEvent::new(EventSource::Controller, "inclusion stopped"));
        self.emit(
            ControllerEvent::new(EventSource::Controller, "node added")
                .with("result", json!({ "lowSecurity": low_security }))
                .with_node(node),
        );
    }

    fn spawn_inclusion(
        &self,
        generation: u64,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
        replacing: Option<NodeId>,
    ) {
        let driver = self.clone();
        tokio::spawn(driver.run_inclusion(generation, options, callbacks, replacing));
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn driver_version(&self) -> String {
        format!("{}-sim", env!("CARGO_PKG_VERSION"))
    }

    fn home_id(&self) -> HomeId {
        self.inner.home_id
    }

    fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    fn fatal_errors(&self) -> watch::Receiver<Option<DriverError>> {
        self.inner.fatal.subscribe()
    }

    fn network_state(&self) -> NetworkSnapshot {
        let state = self.inner.state.lock();
        NetworkSnapshot {
            controller: ControllerSnapshot {
                home_id: self.inner.home_id,
                own_node_id: CONTROLLER_NODE,
                library_version: "Z-Wave 7.19".to_string(),
                is_primary: true,
                is_suc: true,
                supports_timers: false,
            },
            nodes: state.nodes.values().cloned().collect(),
        }
    }

    fn get_config(&self) -> Value {
        let state = self.inner.state.lock();
        json!({
            "logConfig": state.log_config,
            "storage": { "cacheDir": ":memory:" },
            "timeouts": { "ack": 1000, "response": 10000, "report": 1000 },
        })
    }

    fn log_config(&self) -> LogConfig {
        self.inner.state.lock().log_config.clone()
    }

    fn update_log_config(&self, update: PartialLogConfig) -> DriverResult<()> {
        let level = {
            let mut state = self.inner.state.lock();
            update.apply(&mut state.log_config);
            state.log_config.level
        };
        self.log(LogLevel::Info, "DRIVER", format!("Log level is now {level}"));
        Ok(())
    }

    fn attach_log_sink(&self, level: LogLevel) -> mpsc::UnboundedReceiver<LogEntry> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.log_sinks.lock().push(LogSink { level, tx });
        rx
    }

    async fn enable_statistics(
        &self,
        application_name: String,
        application_version: String,
    ) -> DriverResult<()> {
        if application_name.trim().is_empty() || application_version.trim().is_empty() {
            return Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                "Statistics require an application name and version",
            ));
        }
        self.inner.state.lock().statistics = Some((application_name, application_version));
        Ok(())
    }

    async fn disable_statistics(&self) -> DriverResult<()> {
        self.inner.state.lock().statistics = None;
        Ok(())
    }

    fn statistics_enabled(&self) -> bool {
        self.inner.state.lock().statistics.is_some()
    }

    async fn check_for_config_updates(&self) -> DriverResult<Option<String>> {
        Ok(self.inner.state.lock().config_update.clone())
    }

    async fn install_config_update(&self) -> DriverResult<bool> {
        let installed = self.inner.state.lock().config_update.take();
        if let Some(version) = &installed {
            self.log(
                LogLevel::Info,
                "CONFIG",
                format!("Installed config version {version}"),
            );
        }
        Ok(installed.is_some())
    }

    async fn begin_inclusion(
        &self,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool> {
        self.inner.inclusion_attempts.fetch_add(1, Ordering::SeqCst);
        if options.strategy == InclusionStrategy::SmartStart {
            return Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                "SmartStart inclusion is driven by the provisioning list",
            ));
        }
        let generation = {
            let mut state = self.inner.state.lock();
            if !state.is_idle() {
                return Ok(false);
            }
            state.start_inclusion(callbacks.clone())
        };

        self.log(
            LogLevel::Info,
            "CNTRLR",
            format!("Starting inclusion with strategy {:?}", options.strategy),
        );
        self.emit(
            ControllerEvent::new(EventSource::Controller, "inclusion started")
                .with("secure", options.strategy != InclusionStrategy::Insecure),
        );
        self.spawn_inclusion(generation, options, callbacks, None);
        Ok(true)
    }

    async fn stop_inclusion(&self) -> DriverResult<bool> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut state.controller_op, ControllerOp::Idle) {
                ControllerOp::Including { callbacks, .. } => callbacks,
                other => {
                    state.controller_op = other;
                    return Ok(false);
                }
            }
        };
        callbacks.abort();
        self.emit(ControllerEvent::new(EventSource::Controller, "inclusion stopped"));
        Ok(true)
    }

    async fn begin_exclusion(&self, unprovision: bool) -> DriverResult<bool> {
        {
            let mut state = self.inner.state.lock();
            if !state.is_idle() {
                return Ok(false);
            }
            state.controller_op = ControllerOp::Excluding { unprovision };
        }
        self.emit(ControllerEvent::new(EventSource::Controller, "exclusion started"));
        Ok(true)
    }

    async fn stop_exclusion(&self) -> DriverResult<bool> {
        {
            let mut state = self.inner.state.lock();
            if !matches!(state.controller_op, ControllerOp::Excluding { .. }) {
                return Ok(false);
            }
            state.controller_op = ControllerOp::Idle;
        }
        self.emit(ControllerEvent::new(EventSource::Controller, "exclusion stopped"));
        Ok(true)
    }

    async fn replace_failed_node(
        &self,
        node_id: NodeId,
        options: InclusionOptions,
        callbacks: Arc<dyn InclusionUserCallbacks>,
    ) -> DriverResult<bool> {
        self.inner.inclusion_attempts.fetch_add(1, Ordering::SeqCst);
        let generation = {
            let mut state = self.inner.state.lock();
            if state.node(node_id)?.status != NodeStatus::Dead {
                return Err(DriverError::new(
                    codes::CONTROLLER_NODE_NOT_FAILED,
                    format!("Node {node_id} is not failed"),
                ));
            }
            if !state.is_idle() {
                return Ok(false);
            }
            state.start_inclusion(callbacks.clone())
        };
        self.emit(
            ControllerEvent::new(EventSource::Controller, "inclusion started")
                .with("secure", options.strategy != InclusionStrategy::Insecure),
        );
        self.spawn_inclusion(generation, options, callbacks, Some(node_id));
        Ok(true)
    }

    async fn remove_failed_node(&self, node_id: NodeId) -> DriverResult<()> {
        let node = {
            let mut state = self.inner.state.lock();
            if state.node(node_id)?.status != NodeStatus::Dead {
                return Err(DriverError::new(
                    codes::CONTROLLER_NODE_NOT_FAILED,
                    format!("Node {node_id} is not failed"),
                ));
            }
            state.associations.retain(|key, _| key.node_id != node_id);
            state
                .nodes
                .remove(&node_id)
                .ok_or_else(|| DriverError::node_not_found(node_id))?
        };
        self.emit(ControllerEvent::new(EventSource::Controller, "node removed").with_node(node));
        Ok(())
    }

    async fn is_failed_node(&self, node_id: NodeId) -> DriverResult<bool> {
        Ok(self.inner.state.lock().node(node_id)?.status == NodeStatus::Dead)
    }

    async fn heal_node(&self, node_id: NodeId) -> DriverResult<bool> {
        Ok(self.inner.state.lock().node(node_id)?.status != NodeStatus::Dead)
    }

    fn begin_healing_network(&self) -> DriverResult<bool> {
        let mut state = self.inner.state.lock();
        if state.healing {
            return Ok(false);
        }
        state.healing = true;
        Ok(true)
    }

    fn stop_healing_network(&self) -> DriverResult<bool> {
        let mut state = self.inner.state.lock();
        Ok(std::mem::replace(&mut state.healing, false))
    }

    async fn get_node_neighbors(&self, node_id: NodeId) -> DriverResult<Vec<NodeId>> {
        let state = self.inner.state.lock();
        state.node(node_id)?;
        Ok(state
            .nodes
            .values()
            .filter(|node| node.node_id != node_id && node.status != NodeStatus::Dead)
            .map(|node| node.node_id)
            .collect())
    }

    fn get_association_groups(
        &self,
        source: AssociationAddress,
    ) -> DriverResult<BTreeMap<u8, AssociationGroup>> {
        self.inner.state.lock().association_groups(source)
    }

    fn get_associations(
        &self,
        source: AssociationAddress,
    ) -> DriverResult<BTreeMap<u8, Vec<AssociationAddress>>> {
        let state = self.inner.state.lock();
        let groups = state.association_groups(source)?;
        let stored = state.associations.get(&normalize(source));
        Ok(groups
            .keys()
            .map(|group| {
                let members = stored
                    .and_then(|all| all.get(group))
                    .cloned()
                    .unwrap_or_default();
                (*group, members)
            })
            .collect())
    }

    fn is_association_allowed(
        &self,
        source: AssociationAddress,
        group: u8,
        destination: AssociationAddress,
    ) -> DriverResult<bool> {
        let state = self.inner.state.lock();
        let groups = state.association_groups(source)?;
        Ok(groups.contains_key(&group)
            && destination.node_id != source.node_id
            && state.nodes.contains_key(&destination.node_id))
    }

    async fn add_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        let groups = state.association_groups(source)?;
        let Some(info) = groups.get(&group) else {
            return Err(DriverError::new(
                codes::ASSOCIATION_INVALID,
                format!("Group {group} does not exist"),
            ));
        };
        for destination in &destinations {
            if destination.node_id == source.node_id
                || !state.nodes.contains_key(&destination.node_id)
            {
                return Err(DriverError::new(
                    codes::ASSOCIATION_INVALID,
                    format!("Association to node {} is not allowed", destination.node_id),
                ));
            }
        }
        let max_nodes = usize::from(info.max_nodes);
        let members = state
            .associations
            .entry(normalize(source))
            .or_default()
            .entry(group)
            .or_default();
        for destination in destinations {
            if members.contains(&destination) {
                continue;
            }
            if members.len() >= max_nodes {
                return Err(DriverError::new(
                    codes::ASSOCIATION_INVALID,
                    format!("Group {group} is full"),
                ));
            }
            members.push(destination);
        }
        Ok(())
    }

    async fn remove_associations(
        &self,
        source: AssociationAddress,
        group: u8,
        destinations: Vec<AssociationAddress>,
    ) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        if !state.association_groups(source)?.contains_key(&group) {
            return Err(DriverError::new(
                codes::ASSOCIATION_INVALID,
                format!("Group {group} does not exist"),
            ));
        }
        if let Some(members) = state
            .associations
            .get_mut(&normalize(source))
            .and_then(|groups| groups.get_mut(&group))
        {
            members.retain(|member| !destinations.contains(member));
        }
        Ok(())
    }

    async fn remove_node_from_all_associations(&self, node_id: NodeId) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        state.node(node_id)?;
        for groups in state.associations.values_mut() {
            for members in groups.values_mut() {
                members.retain(|member| member.node_id != node_id);
            }
        }
        Ok(())
    }

    fn provision_smart_start_node(&self, entry: ProvisioningEntry) -> DriverResult<()> {
        if entry.dsk.split('-').count() != 8 {
            return Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                format!("Invalid DSK {}", entry.dsk),
            ));
        }
        let mut state = self.inner.state.lock();
        match state
            .provisioning
            .iter_mut()
            .find(|existing| existing.dsk == entry.dsk)
        {
            Some(existing) => *existing = entry,
            None => state.provisioning.push(entry),
        }
        Ok(())
    }

    fn unprovision_smart_start_node(&self, key: DskOrNodeId) -> DriverResult<()> {
        self.inner
            .state
            .lock()
            .provisioning
            .retain(|entry| !key.matches(entry));
        Ok(())
    }

    fn get_provisioning_entries(&self) -> Vec<ProvisioningEntry> {
        self.inner.state.lock().provisioning.clone()
    }

    fn endpoint_count(&self, node_id: NodeId) -> Option<u8> {
        self.inner
            .state
            .lock()
            .nodes
            .get(&node_id)
            .map(NodeSnapshot::endpoint_count)
    }

    fn node_state(&self, node_id: NodeId) -> Option<NodeSnapshot> {
        self.inner.state.lock().nodes.get(&node_id).cloned()
    }

    async fn set_value(
        &self,
        node_id: NodeId,
        value_id: ValueId,
        value: Value,
        _options: Option<Value>,
    ) -> DriverResult<bool> {
        let event = {
            let mut state = self.inner.state.lock();
            let node = state.node(node_id)?;
            let Some(slot) = node.value(&value_id) else {
                return Ok(false);
            };
            if !slot.metadata.writeable {
                return Ok(false);
            }
            let Some(on) = value.as_bool() else {
                return Err(DriverError::new(
                    codes::ARGUMENT_INVALID,
                    format!("Value {value_id} expects a boolean"),
                ));
            };
            state.apply_switch(node_id, value_id.endpoint_index(), on)?
        };
        if let Some(event) = event {
            self.emit(event);
        }
        self.log(
            LogLevel::Debug,
            "CNTRLR",
            format!("Node {node_id}: set {value_id} to {value}"),
        );
        Ok(true)
    }

    fn get_defined_value_ids(&self, node_id: NodeId) -> DriverResult<Vec<ValueId>> {
        let state = self.inner.state.lock();
        Ok(state
            .node(node_id)?
            .values
            .iter()
            .map(|v| v.value_id.clone())
            .collect())
    }

    fn get_value_metadata(
        &self,
        node_id: NodeId,
        value_id: &ValueId,
    ) -> DriverResult<ValueMetadata> {
        let state = self.inner.state.lock();
        state
            .node(node_id)?
            .value(value_id)
            .map(|v| v.metadata.clone())
            .ok_or_else(|| {
                DriverError::new(
                    codes::ARGUMENT_INVALID,
                    format!("Node {node_id} has no value {value_id}"),
                )
            })
    }

    fn get_value(&self, node_id: NodeId, value_id: &ValueId) -> DriverResult<Option<Value>> {
        let state = self.inner.state.lock();
        Ok(state.node(node_id)?.value(value_id).map(|v| v.value.clone()))
    }

    async fn poll_value(&self, node_id: NodeId, value_id: ValueId) -> DriverResult<Option<Value>> {
        let value = self.get_value(node_id, &value_id)?;
        self.log(
            LogLevel::Debug,
            "CNTRLR",
            format!("Node {node_id}: polled {value_id}"),
        );
        Ok(value)
    }

    async fn refresh_info(&self, node_id: NodeId) -> DriverResult<()> {
        let node = self.inner.state.lock().node(node_id)?.clone();
        self.emit(ControllerEvent::for_node(node_id, "interview started"));
        self.emit(ControllerEvent::for_node(node_id, "ready").with_node(node));
        Ok(())
    }

    async fn refresh_values(&self, node_id: NodeId) -> DriverResult<()> {
        self.inner.state.lock().node(node_id)?;
        self.log(
            LogLevel::Verbose,
            "CNTRLR",
            format!("Node {node_id}: refreshing values"),
        );
        Ok(())
    }

    async fn ping(&self, node_id: NodeId) -> DriverResult<bool> {
        Ok(self.inner.state.lock().node(node_id)?.status != NodeStatus::Dead)
    }

    fn set_name(&self, node_id: NodeId, name: String) -> DriverResult<()> {
        self.inner.state.lock().node_mut(node_id)?.name = Some(name);
        Ok(())
    }

    fn set_location(&self, node_id: NodeId, location: String) -> DriverResult<()> {
        self.inner.state.lock().node_mut(node_id)?.location = Some(location);
        Ok(())
    }

    fn has_security_class(&self, node_id: NodeId, class: SecurityClass) -> DriverResult<bool> {
        Ok(self
            .inner
            .state
            .lock()
            .node(node_id)?
            .security_classes
            .contains(&class))
    }

    fn get_highest_security_class(&self, node_id: NodeId) -> DriverResult<Option<SecurityClass>> {
        Ok(self
            .inner
            .state
            .lock()
            .node(node_id)?
            .highest_security_class())
    }

    async fn invoke_cc_api(
        &self,
        target: CcTarget,
        command_class: u16,
        method_name: String,
        args: Vec<Value>,
    ) -> DriverResult<Value> {
        if !self.supports_cc_api(&target, command_class)? {
            return Err(DriverError::new(
                codes::CC_NOT_SUPPORTED,
                format!("Command class {command_class} has no API on this target"),
            ));
        }
        let events = {
            let mut state = self.inner.state.lock();
            let (members, index) = match &target {
                CcTarget::Endpoint { node_id, index } => (vec![*node_id], *index),
                CcTarget::Virtual { target, index } => (state.virtual_members(target)?, *index),
            };
            match method_name.as_str() {
                "get" => {
                    let CcTarget::Endpoint { node_id, index } = target else {
                        return Err(DriverError::new(
                            codes::CC_NOT_SUPPORTED,
                            "get is not available on virtual nodes",
                        ));
                    };
                    let current = ValueId::new(CC_BINARY_SWITCH, index, "currentValue");
                    let value = state
                        .node(node_id)?
                        .value(&current)
                        .map(|v| v.value.clone())
                        .unwrap_or(Value::Null);
                    return Ok(json!({ "currentValue": value }));
                }
                "set" => {
                    let Some(on) = args.first().and_then(Value::as_bool) else {
                        return Err(DriverError::new(
                            codes::ARGUMENT_INVALID,
                            "set expects a boolean argument",
                        ));
                    };
                    let mut events = Vec::with_capacity(members.len());
                    for node_id in members {
                        if let Some(event) = state.apply_switch(node_id, index, on)? {
                            events.push(event);
                        }
                    }
                    events
                }
                other => {
                    return Err(DriverError::new(
                        codes::CC_NOT_SUPPORTED,
                        format!("Method {other} is not implemented"),
                    ));
                }
            }
        };
        for event in events {
            self.emit(event);
        }
        Ok(Value::Null)
    }

    fn supports_cc_api(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool> {
        Ok(command_class == CC_BINARY_SWITCH && self.supports_cc(target, command_class)?)
    }

    fn supports_cc(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool> {
        let state = self.inner.state.lock();
        let endpoints = state.target_endpoints(target)?;
        Ok(!endpoints.is_empty()
            && endpoints.iter().all(|ep| {
                ep.command_class(command_class)
                    .is_some_and(|info| !info.is_controlled)
            }))
    }

    fn controls_cc(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool> {
        let state = self.inner.state.lock();
        let endpoints = state.target_endpoints(target)?;
        Ok(!endpoints.is_empty()
            && endpoints.iter().all(|ep| {
                ep.command_class(command_class)
                    .is_some_and(|info| info.is_controlled)
            }))
    }

    fn is_cc_secure(&self, target: &CcTarget, command_class: u16) -> DriverResult<bool> {
        let state = self.inner.state.lock();
        let endpoints = state.target_endpoints(target)?;
        Ok(!endpoints.is_empty()
            && endpoints.iter().all(|ep| {
                ep.command_class(command_class)
                    .is_some_and(|info| info.is_secure)
            }))
    }

    fn get_cc_version(&self, target: &CcTarget, command_class: u16) -> DriverResult<u8> {
        let state = self.inner.state.lock();
        let endpoints = state.target_endpoints(target)?;
        Ok(endpoints
            .iter()
            .map(|ep| ep.command_class(command_class).map_or(0, |info| info.version))
            .min()
            .unwrap_or(0))
    }

    async fn virtual_set_value(
        &self,
        target: VirtualTarget,
        value_id: ValueId,
        value: Value,
        _options: Option<Value>,
    ) -> DriverResult<bool> {
        let Some(on) = value.as_bool() else {
            return Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                format!("Value {value_id} expects a boolean"),
            ));
        };
        let is_switch_target = value_id.command_class == CC_BINARY_SWITCH
            && value_id.property == PropertyKey::from("targetValue");
        if !is_switch_target {
            return Ok(false);
        }
        let events = {
            let mut state = self.inner.state.lock();
            let members = state.virtual_members(&target)?;
            let mut events = Vec::with_capacity(members.len());
            for node_id in members {
                if let Some(event) =
                    state.apply_switch(node_id, value_id.endpoint_index(), on)?
                {
                    events.push(event);
                }
            }
            events
        };
        for event in events {
            self.emit(event);
        }
        Ok(true)
    }

    fn virtual_endpoint_count(&self, target: &VirtualTarget) -> DriverResult<u8> {
        let state = self.inner.state.lock();
        let members = state.virtual_members(target)?;
        let mut counts = Vec::with_capacity(members.len());
        for node_id in members {
            counts.push(state.node(node_id)?.endpoint_count());
        }
        Ok(counts.into_iter().min().unwrap_or(0))
    }

    fn virtual_defined_value_ids(&self, target: &VirtualTarget) -> DriverResult<Vec<ValueId>> {
        let state = self.inner.state.lock();
        let members = state.virtual_members(target)?;
        let mut nodes = Vec::with_capacity(members.len());
        for node_id in members {
            nodes.push(state.node(node_id)?);
        }
        let Some((first, rest)) = nodes.split_first() else {
            return Ok(Vec::new());
        };
        Ok(first
            .values
            .iter()
            .filter(|v| v.metadata.writeable)
            .map(|v| v.value_id.clone())
            .filter(|id| rest.iter().all(|node| node.value(id).is_some()))
            .collect())
    }
}
