//! Typed client commands.
//!
//! A frame's `command` is either a bare session command or
//! `<namespace>.<action>`. Each namespace owns a closed enum of actions,
//! decoded with serde's internal tagging on the action name. Actions that
//! are not in the enum land in the explicit `Unknown` arm so the router can
//! answer `unknown_command` instead of failing the parse.
//!
//! ```text
//!   "start_listening"          -> IncomingCommand::Session(StartListening)
//!   "driver.get_log_config"    -> IncomingCommand::Session(GetLogConfig)   (alias)
//!   "node.ping"                -> IncomingCommand::Node(NodeCommand::Ping { .. })
//!   "node.explode"             -> IncomingCommand::Node(NodeCommand::Unknown)
//!   "toaster.ping"             -> Err(CommandParseError::UnknownCommand)
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zws_core::{
    AssociationAddress, DskOrNodeId, InclusionGrant, InclusionOptions, NodeId, PartialLogConfig,
    ProvisioningEntry, SecurityClass, ValueId,
};

use crate::parse::Envelope;

// ============================================================================
// Namespaces
// ============================================================================

/// The closed set of command namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Controller,
    Driver,
    Node,
    Endpoint,
    BroadcastNode,
    MulticastGroup,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Controller => "controller",
            Namespace::Driver => "driver",
            Namespace::Node => "node",
            Namespace::Endpoint => "endpoint",
            Namespace::BroadcastNode => "broadcast_node",
            Namespace::MulticastGroup => "multicast_group",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "controller" => Ok(Namespace::Controller),
            "driver" => Ok(Namespace::Driver),
            "node" => Ok(Namespace::Node),
            "endpoint" => Ok(Namespace::Endpoint),
            "broadcast_node" => Ok(Namespace::BroadcastNode),
            "multicast_group" => Ok(Namespace::MulticastGroup),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Session commands
// ============================================================================

/// Commands that change or read the session itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    #[serde(rename_all = "camelCase")]
    SetApiSchema { schema_version: u32 },
    StartListening,
    GetLogConfig,
    UpdateLogConfig { config: PartialLogConfig },
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Namespaced commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControllerCommand {
    #[serde(rename_all = "camelCase")]
    BeginInclusion {
        #[serde(default)]
        options: Option<InclusionOptions>,
        #[serde(default)]
        include_non_secure: Option<bool>,
    },
    StopInclusion,
    BeginExclusion {
        #[serde(default)]
        unprovision: Option<bool>,
    },
    StopExclusion,
    #[serde(rename_all = "camelCase")]
    ReplaceFailedNode {
        node_id: NodeId,
        #[serde(default)]
        options: Option<InclusionOptions>,
        #[serde(default)]
        include_non_secure: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveFailedNode { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    IsFailedNode { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    HealNode { node_id: NodeId },
    BeginHealingNetwork,
    StopHealingNetwork,
    #[serde(rename_all = "camelCase")]
    GetNodeNeighbors { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    GetAssociationGroups {
        node_id: NodeId,
        #[serde(default)]
        endpoint: Option<u8>,
    },
    #[serde(rename_all = "camelCase")]
    GetAssociations {
        node_id: NodeId,
        #[serde(default)]
        endpoint: Option<u8>,
    },
    #[serde(rename_all = "camelCase")]
    IsAssociationAllowed {
        node_id: NodeId,
        #[serde(default)]
        endpoint: Option<u8>,
        group: u8,
        association: AssociationAddress,
    },
    #[serde(rename_all = "camelCase")]
    AddAssociations {
        node_id: NodeId,
        #[serde(default)]
        endpoint: Option<u8>,
        group: u8,
        associations: Vec<AssociationAddress>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveAssociations {
        node_id: NodeId,
        #[serde(default)]
        endpoint: Option<u8>,
        group: u8,
        associations: Vec<AssociationAddress>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveNodeFromAllAssociations { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    GrantSecurityClasses { inclusion_grant: InclusionGrant },
    ValidateDskAndEnterPin { pin: String },
    ProvisionSmartStartNode { entry: ProvisioningEntry },
    #[serde(rename_all = "camelCase")]
    UnprovisionSmartStartNode { dsk_or_node_id: DskOrNodeId },
    GetProvisioningEntries,
    #[serde(other)]
    Unknown,
}

impl ControllerCommand {
    /// Operations that may pause for interactive input.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            ControllerCommand::BeginInclusion { .. } | ControllerCommand::ReplaceFailedNode { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DriverCommand {
    GetConfig,
    StartListeningLogs,
    StopListeningLogs,
    #[serde(rename_all = "camelCase")]
    EnableStatistics {
        application_name: String,
        application_version: String,
    },
    DisableStatistics,
    IsStatisticsEnabled,
    CheckForConfigUpdates,
    InstallConfigUpdate,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum NodeCommand {
    #[serde(rename_all = "camelCase")]
    SetValue {
        node_id: NodeId,
        value_id: ValueId,
        value: Value,
        #[serde(default)]
        options: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    GetDefinedValueIds { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    GetValueMetadata { node_id: NodeId, value_id: ValueId },
    #[serde(rename_all = "camelCase")]
    GetValue { node_id: NodeId, value_id: ValueId },
    #[serde(rename_all = "camelCase")]
    PollValue { node_id: NodeId, value_id: ValueId },
    #[serde(rename_all = "camelCase")]
    RefreshInfo { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    RefreshValues { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    Ping { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    SetName { node_id: NodeId, name: String },
    #[serde(rename_all = "camelCase")]
    SetLocation { node_id: NodeId, location: String },
    #[serde(rename_all = "camelCase")]
    HasSecurityClass {
        node_id: NodeId,
        security_class: SecurityClass,
    },
    #[serde(rename_all = "camelCase")]
    GetHighestSecurityClass { node_id: NodeId },
    #[serde(rename_all = "camelCase")]
    GetState { node_id: NodeId },
    #[serde(other)]
    Unknown,
}

impl NodeCommand {
    /// The node every known action targets.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            NodeCommand::SetValue { node_id, .. }
            | NodeCommand::GetDefinedValueIds { node_id }
            | NodeCommand::GetValueMetadata { node_id, .. }
            | NodeCommand::GetValue { node_id, .. }
            | NodeCommand::PollValue { node_id, .. }
            | NodeCommand::RefreshInfo { node_id }
            | NodeCommand::RefreshValues { node_id }
            | NodeCommand::Ping { node_id }
            | NodeCommand::SetName { node_id, .. }
            | NodeCommand::SetLocation { node_id, .. }
            | NodeCommand::HasSecurityClass { node_id, .. }
            | NodeCommand::GetHighestSecurityClass { node_id }
            | NodeCommand::GetState { node_id } => Some(*node_id),
            NodeCommand::Unknown => None,
        }
    }
}

/// A command-class API call: where, which method, and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcApiCall<A> {
    #[serde(flatten)]
    pub address: A,
    pub method_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Addresses one command class on one endpoint of a real node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAddress {
    pub node_id: NodeId,
    #[serde(default)]
    pub endpoint: Option<u8>,
    pub command_class: u16,
}

impl EndpointAddress {
    pub fn index(&self) -> u8 {
        self.endpoint.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EndpointCommand {
    InvokeCcApi(CcApiCall<EndpointAddress>),
    SupportsCcApi(EndpointAddress),
    SupportsCc(EndpointAddress),
    ControlsCc(EndpointAddress),
    IsCcSecure(EndpointAddress),
    GetCcVersion(EndpointAddress),
    #[serde(other)]
    Unknown,
}

impl EndpointCommand {
    pub fn address(&self) -> Option<&EndpointAddress> {
        match self {
            EndpointCommand::InvokeCcApi(CcApiCall { address, .. })
            | EndpointCommand::SupportsCcApi(address)
            | EndpointCommand::SupportsCc(address)
            | EndpointCommand::ControlsCc(address)
            | EndpointCommand::IsCcSecure(address)
            | EndpointCommand::GetCcVersion(address) => Some(address),
            EndpointCommand::Unknown => None,
        }
    }
}

/// A command class on an endpoint of a virtual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualCcAddress {
    #[serde(default)]
    pub index: Option<u8>,
    pub command_class: u16,
}

impl VirtualCcAddress {
    pub fn index(&self) -> u8 {
        self.index.unwrap_or(0)
    }
}

/// Actions shared by `broadcast_node` and `multicast_group`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum VirtualNodeCommand {
    #[serde(rename_all = "camelCase")]
    SetValue {
        value_id: ValueId,
        value: Value,
        #[serde(default)]
        options: Option<Value>,
    },
    GetEndpointCount,
    SupportsCc(VirtualCcAddress),
    GetCcVersion(VirtualCcAddress),
    InvokeCcApi(CcApiCall<VirtualCcAddress>),
    SupportsCcApi(VirtualCcAddress),
    GetDefinedValueIds,
    #[serde(other)]
    Unknown,
}

impl VirtualNodeCommand {
    pub fn address(&self) -> Option<&VirtualCcAddress> {
        match self {
            VirtualNodeCommand::SupportsCc(address)
            | VirtualNodeCommand::GetCcVersion(address)
            | VirtualNodeCommand::InvokeCcApi(CcApiCall { address, .. })
            | VirtualNodeCommand::SupportsCcApi(address) => Some(address),
            VirtualNodeCommand::SetValue { .. }
            | VirtualNodeCommand::GetEndpointCount
            | VirtualNodeCommand::GetDefinedValueIds
            | VirtualNodeCommand::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MulticastTarget {
    #[serde(rename = "nodeIDs")]
    node_ids: Vec<NodeId>,
}

// ============================================================================
// Incoming command
// ============================================================================

/// A fully decoded client command.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingCommand {
    Session(SessionCommand),
    Controller(ControllerCommand),
    Driver(DriverCommand),
    Node(NodeCommand),
    Endpoint(EndpointCommand),
    BroadcastNode(VirtualNodeCommand),
    MulticastGroup {
        node_ids: Vec<NodeId>,
        command: VirtualNodeCommand,
    },
}

/// Errors for frames that are well-formed but cannot be decoded.
///
/// Both are answered with a failure result; neither closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid parameters for {command}: {message}")]
    InvalidParams { command: String, message: String },
}

impl IncomingCommand {
    /// Decodes an envelope into a typed command.
    pub fn parse(envelope: &Envelope) -> Result<Self, CommandParseError> {
        let (namespace, action) = envelope.split_command();
        let namespace = match namespace {
            None => {
                let command = decode::<SessionCommand>(envelope, action)?;
                if command == SessionCommand::Unknown {
                    return Err(CommandParseError::UnknownCommand(envelope.command.clone()));
                }
                return Ok(IncomingCommand::Session(command));
            }
            Some(prefix) => prefix
                .parse::<Namespace>()
                .map_err(|()| CommandParseError::UnknownCommand(envelope.command.clone()))?,
        };

        match namespace {
            // Log configuration is session-level; the driver names are aliases.
            Namespace::Driver if matches!(action, "get_log_config" | "update_log_config") => {
                decode(envelope, action).map(IncomingCommand::Session)
            }
            Namespace::Controller => decode(envelope, action).map(IncomingCommand::Controller),
            Namespace::Driver => decode(envelope, action).map(IncomingCommand::Driver),
            Namespace::Node => decode(envelope, action).map(IncomingCommand::Node),
            Namespace::Endpoint => decode(envelope, action).map(IncomingCommand::Endpoint),
            Namespace::BroadcastNode => decode(envelope, action).map(IncomingCommand::BroadcastNode),
            Namespace::MulticastGroup => {
                let command: VirtualNodeCommand = decode(envelope, action)?;
                let node_ids = if command == VirtualNodeCommand::Unknown {
                    Vec::new()
                } else {
                    decode_params::<MulticastTarget>(envelope)?.node_ids
                };
                Ok(IncomingCommand::MulticastGroup { node_ids, command })
            }
        }
    }

    /// The namespace this command is routed to, if any.
    pub fn namespace(&self) -> Option<Namespace> {
        match self {
            IncomingCommand::Session(_) => None,
            IncomingCommand::Controller(_) => Some(Namespace::Controller),
            IncomingCommand::Driver(_) => Some(Namespace::Driver),
            IncomingCommand::Node(_) => Some(Namespace::Node),
            IncomingCommand::Endpoint(_) => Some(Namespace::Endpoint),
            IncomingCommand::BroadcastNode(_) => Some(Namespace::BroadcastNode),
            IncomingCommand::MulticastGroup { .. } => Some(Namespace::MulticastGroup),
        }
    }
}

/// Deserializes the envelope's params with `action` as the tag.
fn decode<T: DeserializeOwned>(envelope: &Envelope, action: &str) -> Result<T, CommandParseError> {
    let mut fields: Map<String, Value> = envelope.params.clone();
    fields.insert("command".to_string(), Value::String(action.to_string()));
    serde_json::from_value(Value::Object(fields)).map_err(|e| CommandParseError::InvalidParams {
        command: envelope.command.clone(),
        message: e.to_string(),
    })
}

fn decode_params<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, CommandParseError> {
    serde_json::from_value(Value::Object(envelope.params.clone())).map_err(|e| {
        CommandParseError::InvalidParams {
            command: envelope.command.clone(),
            message: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zws_core::{InclusionStrategy, SecurityClass};

    fn parse(raw: &str) -> Result<IncomingCommand, CommandParseError> {
        IncomingCommand::parse(&Envelope::parse(raw).unwrap())
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(
            parse(r#"{"messageId":"1","command":"set_api_schema","schemaVersion":2}"#).unwrap(),
            IncomingCommand::Session(SessionCommand::SetApiSchema { schema_version: 2 })
        );
        assert_eq!(
            parse(r#"{"messageId":"1","command":"start_listening"}"#).unwrap(),
            IncomingCommand::Session(SessionCommand::StartListening)
        );
        assert!(matches!(
            parse(r#"{"messageId":"1","command":"frobnicate"}"#),
            Err(CommandParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_log_config_aliases() {
        assert_eq!(
            parse(r#"{"messageId":"1","command":"driver.get_log_config"}"#).unwrap(),
            IncomingCommand::Session(SessionCommand::GetLogConfig)
        );
        let cmd = parse(
            r#"{"messageId":"1","command":"driver.update_log_config","config":{"level":"debug"}}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            IncomingCommand::Session(SessionCommand::UpdateLogConfig { .. })
        ));
    }

    #[test]
    fn test_unknown_namespace_and_action() {
        assert!(matches!(
            parse(r#"{"messageId":"1","command":"toaster.ping"}"#),
            Err(CommandParseError::UnknownCommand(_))
        ));
        assert_eq!(
            parse(r#"{"messageId":"1","command":"node.explode","nodeId":2}"#).unwrap(),
            IncomingCommand::Node(NodeCommand::Unknown)
        );
    }

    #[test]
    fn test_invalid_params_on_known_action() {
        let err = parse(r#"{"messageId":"1","command":"node.ping"}"#).unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidParams { .. }));
    }

    #[test]
    fn test_controller_inclusion_params() {
        let cmd = parse(
            r#"{"messageId":"1","command":"controller.begin_inclusion","options":{"strategy":2}}"#,
        )
        .unwrap();
        let IncomingCommand::Controller(ControllerCommand::BeginInclusion { options, .. }) = cmd else {
            panic!("expected begin_inclusion");
        };
        assert_eq!(options.unwrap().strategy, InclusionStrategy::Insecure);

        let cmd = parse(
            r#"{"messageId":"1","command":"controller.grant_security_classes","inclusionGrant":{"securityClasses":[1],"clientSideAuth":false}}"#,
        )
        .unwrap();
        let IncomingCommand::Controller(ControllerCommand::GrantSecurityClasses { inclusion_grant }) = cmd else {
            panic!("expected grant_security_classes");
        };
        assert_eq!(
            inclusion_grant.security_classes,
            vec![SecurityClass::S2Authenticated]
        );
    }

    #[test]
    fn test_endpoint_address_flattened() {
        let cmd = parse(
            r#"{"messageId":"1","command":"endpoint.invoke_cc_api","nodeId":2,"endpoint":1,"commandClass":37,"methodName":"set","args":[true]}"#,
        )
        .unwrap();
        let IncomingCommand::Endpoint(command) = cmd else {
            panic!("expected endpoint command");
        };
        let address = command.address().unwrap();
        assert_eq!(address.node_id, NodeId::new(2));
        assert_eq!(address.index(), 1);
        assert_eq!(address.command_class, 37);
    }

    #[test]
    fn test_multicast_requires_node_ids() {
        let cmd = parse(
            r#"{"messageId":"1","command":"multicast_group.get_endpoint_count","nodeIDs":[2,3]}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            IncomingCommand::MulticastGroup {
                node_ids: vec![NodeId::new(2), NodeId::new(3)],
                command: VirtualNodeCommand::GetEndpointCount,
            }
        );

        let err = parse(r#"{"messageId":"1","command":"multicast_group.get_endpoint_count"}"#)
            .unwrap_err();
        assert!(matches!(err, CommandParseError::InvalidParams { .. }));

        // Unknown actions stay unknown even without nodeIDs.
        let cmd = parse(r#"{"messageId":"1","command":"multicast_group.dance"}"#).unwrap();
        assert!(matches!(
            cmd,
            IncomingCommand::MulticastGroup {
                command: VirtualNodeCommand::Unknown,
                ..
            }
        ));
    }
}
