//! Driver error type, surfaced verbatim to clients.

use thiserror::Error;

/// Well-known error codes raised by drivers.
///
/// Drivers are free to use any code; these are the ones the bundled
/// simulated driver produces.
pub mod codes {
    /// The driver lost its controller and cannot continue.
    pub const DRIVER_FAILED: u32 = 1;
    /// An argument was out of range or otherwise unusable.
    pub const ARGUMENT_INVALID: u32 = 5;
    /// The target does not support the requested command class or method.
    pub const CC_NOT_SUPPORTED: u32 = 10;
    /// The operation requires a node that is not part of the network.
    pub const CONTROLLER_NODE_NOT_FOUND: u32 = 205;
    /// The node is responsive, so it cannot be treated as failed.
    pub const CONTROLLER_NODE_NOT_FAILED: u32 = 206;
    /// The controller is busy with another inclusion, exclusion or heal.
    pub const CONTROLLER_BUSY: u32 = 207;
    /// The association is not allowed for this group.
    pub const ASSOCIATION_INVALID: u32 = 300;
    /// No configuration update is available.
    pub const CONFIG_UPDATE_UNAVAILABLE: u32 = 400;
}

/// Error raised by the controller driver.
///
/// Carries the driver's own numeric code and message. The server passes
/// both through to clients unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (ZW{code:04})")]
pub struct DriverError {
    /// Driver-specific error code
    pub code: u32,
    /// Human-readable message from the driver
    pub message: String,
}

impl DriverError {
    /// Creates a new driver error.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convenience constructor for missing nodes.
    pub fn node_not_found(node_id: crate::NodeId) -> Self {
        Self::new(
            codes::CONTROLLER_NODE_NOT_FOUND,
            format!("Node {node_id} was not found"),
        )
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;

    #[test]
    fn test_display_includes_padded_code() {
        let err = DriverError::new(7, "Something broke");
        assert_eq!(err.to_string(), "Something broke (ZW0007)");
    }

    #[test]
    fn test_node_not_found_helper() {
        let err = DriverError::node_not_found(NodeId::new(12));
        assert_eq!(err.code, codes::CONTROLLER_NODE_NOT_FOUND);
        assert!(err.message.contains("12"));
    }
}
