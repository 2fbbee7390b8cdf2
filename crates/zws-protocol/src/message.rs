//! Server-to-client messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use zws_core::HomeId;

use crate::version::{MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};

/// Machine-readable failure codes carried in failure results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SchemaIncompatible,
    UnknownCommand,
    InclusionAlreadyInProgress,
    InclusionPhaseNotInProgress,
    ZwaveError,
    NodeNotFound,
    EndpointNotFound,
    VirtualEndpointNotFound,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SchemaIncompatible => "schema_incompatible",
            ErrorCode::UnknownCommand => "unknown_command",
            ErrorCode::InclusionAlreadyInProgress => "inclusion_already_in_progress",
            ErrorCode::InclusionPhaseNotInProgress => "inclusion_phase_not_in_progress",
            ErrorCode::ZwaveError => "zwave_error",
            ErrorCode::NodeNotFound => "node_not_found",
            ErrorCode::EndpointNotFound => "endpoint_not_found",
            ErrorCode::VirtualEndpointNotFound => "virtual_endpoint_not_found",
            ErrorCode::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The answer to exactly one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    pub message_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Extra failure fields, sent at the top level.
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

/// Sent once, immediately after a client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMessage {
    pub driver_version: String,
    pub server_version: String,
    pub home_id: HomeId,
    pub min_schema_version: u32,
    pub max_schema_version: u32,
}

/// Every frame the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Version(VersionMessage),
    Result(ResultMessage),
    Event { event: Value },
}

impl OutgoingMessage {
    /// Creates the version greeting.
    pub fn version(driver_version: String, server_version: String, home_id: HomeId) -> Self {
        Self::Version(VersionMessage {
            driver_version,
            server_version,
            home_id,
            min_schema_version: MIN_SCHEMA_VERSION,
            max_schema_version: MAX_SCHEMA_VERSION,
        })
    }

    /// Creates a success result. `result` should be a JSON object.
    pub fn success(message_id: String, result: Value) -> Self {
        Self::Result(ResultMessage {
            message_id,
            success: true,
            result: Some(result),
            error_code: None,
            detail: Map::new(),
        })
    }

    /// Creates a failure result with extra top-level fields.
    pub fn failure(message_id: String, error_code: ErrorCode, detail: Map<String, Value>) -> Self {
        Self::Result(ResultMessage {
            message_id,
            success: false,
            result: None,
            error_code: Some(error_code),
            detail,
        })
    }

    /// Creates an event frame around an already rendered event object.
    pub fn event(event: Value) -> Self {
        Self::Event { event }
    }

    /// Serializes to frame text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
