//! Command failures and their wire representation.
//!
//! Every handler returns `Result<Value, CommandError>`. The session converts
//! an error into a failure result exactly once, at the dispatch boundary.

use serde_json::{json, Map, Value};
use thiserror::Error;

use zws_core::{DriverError, NodeId};
use zws_protocol::{CommandParseError, ErrorCode, VersionError};

use crate::registry::RegistryError;

/// Name of an interactive channel, as reported in `phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionPhase {
    GrantSecurityClasses,
    ValidateDskAndEnterPin,
}

impl InclusionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            InclusionPhase::GrantSecurityClasses => "grant_security_classes",
            InclusionPhase::ValidateDskAndEnterPin => "validate_dsk_and_enter_pin",
        }
    }
}

/// Errors a command can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    SchemaIncompatible(#[from] VersionError),

    #[error("An inclusion is already in progress")]
    InclusionAlreadyInProgress,

    #[error("Inclusion phase {} is not in progress", .0.as_str())]
    InclusionPhaseNotInProgress(InclusionPhase),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Endpoint {index} of node {node_id} not found")]
    EndpointNotFound { node_id: NodeId, index: u8 },

    #[error("Virtual endpoint {0} not found")]
    VirtualEndpointNotFound(u8),

    #[error("{0}")]
    Unknown(String),
}

impl CommandError {
    /// The wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            CommandError::SchemaIncompatible(_) => ErrorCode::SchemaIncompatible,
            CommandError::InclusionAlreadyInProgress => ErrorCode::InclusionAlreadyInProgress,
            CommandError::InclusionPhaseNotInProgress(_) => ErrorCode::InclusionPhaseNotInProgress,
            CommandError::Driver(_) => ErrorCode::ZwaveError,
            CommandError::NodeNotFound(_) => ErrorCode::NodeNotFound,
            CommandError::EndpointNotFound { .. } => ErrorCode::EndpointNotFound,
            CommandError::VirtualEndpointNotFound(_) => ErrorCode::VirtualEndpointNotFound,
            CommandError::Unknown(_) => ErrorCode::UnknownError,
        }
    }

    /// Extra top-level fields of the failure result.
    pub fn detail(&self) -> Map<String, Value> {
        let mut detail = Map::new();
        match self {
            CommandError::InclusionPhaseNotInProgress(phase) => {
                detail.insert("phase".into(), json!(phase.as_str()));
            }
            CommandError::Driver(error) => {
                detail.insert("zwaveErrorCode".into(), json!(error.code));
                detail.insert("zwaveErrorMessage".into(), json!(error.message));
            }
            CommandError::Unknown(message) => {
                detail.insert("message".into(), json!(message));
            }
            _ => {}
        }
        detail
    }
}

impl From<CommandParseError> for CommandError {
    fn from(error: CommandParseError) -> Self {
        match error {
            CommandParseError::UnknownCommand(command) => CommandError::UnknownCommand(command),
            invalid @ CommandParseError::InvalidParams { .. } => {
                CommandError::Unknown(invalid.to_string())
            }
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(error: RegistryError) -> Self {
        CommandError::Unknown(error.to_string())
    }
}

/// Result type for command handlers.
pub type CommandResult = Result<Value, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;
    use zws_core::error::codes;

    #[test]
    fn test_driver_error_detail() {
        let err = CommandError::from(DriverError::new(codes::CONTROLLER_BUSY, "busy"));
        assert_eq!(err.code(), ErrorCode::ZwaveError);
        let detail = err.detail();
        assert_eq!(detail["zwaveErrorCode"], 207);
        assert_eq!(detail["zwaveErrorMessage"], "busy");
    }

    #[test]
    fn test_phase_detail() {
        let err = CommandError::InclusionPhaseNotInProgress(InclusionPhase::ValidateDskAndEnterPin);
        assert_eq!(err.code(), ErrorCode::InclusionPhaseNotInProgress);
        assert_eq!(err.detail()["phase"], "validate_dsk_and_enter_pin");
    }

    #[test]
    fn test_invalid_params_become_unknown_error() {
        let err = CommandError::from(CommandParseError::InvalidParams {
            command: "node.ping".into(),
            message: "missing field `nodeId`".into(),
        });
        assert_eq!(err.code(), ErrorCode::UnknownError);
        assert!(err.detail()["message"]
            .as_str()
            .is_some_and(|m| m.contains("nodeId")));
    }

    #[test]
    fn test_lookup_errors_have_no_detail() {
        assert!(CommandError::NodeNotFound(NodeId::new(9)).detail().is_empty());
        assert_eq!(
            CommandError::VirtualEndpointNotFound(3).code(),
            ErrorCode::VirtualEndpointNotFound
        );
    }

    #[test]
    fn test_registry_failure_is_unknown_error() {
        let err = CommandError::from(RegistryError::ChannelClosed);
        assert_eq!(err.code(), ErrorCode::UnknownError);
        assert_eq!(err.detail()["message"], "registry channel closed");
    }
}
