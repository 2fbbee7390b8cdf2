//! Security classes, inclusion strategies and grants.
//!
//! These enums travel over the wire as integers, matching the numbering
//! used by controller firmware.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{codes, DriverError};

// ============================================================================
// Security Class
// ============================================================================

/// Security class a node can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum SecurityClass {
    /// Node is included but has no security class yet.
    Temporary,
    /// Node is included without security.
    None,
    S2Unauthenticated,
    S2Authenticated,
    S2AccessControl,
    S0Legacy,
}

impl SecurityClass {
    /// Classes ordered from strongest to weakest.
    pub const BY_STRENGTH: [SecurityClass; 4] = [
        SecurityClass::S2AccessControl,
        SecurityClass::S2Authenticated,
        SecurityClass::S2Unauthenticated,
        SecurityClass::S0Legacy,
    ];

    /// Returns true for the S2 classes that require DSK verification.
    pub fn requires_pin(self) -> bool {
        matches!(
            self,
            SecurityClass::S2AccessControl | SecurityClass::S2Authenticated
        )
    }

    /// Picks the strongest class out of a granted set.
    pub fn highest(granted: &[SecurityClass]) -> Option<SecurityClass> {
        Self::BY_STRENGTH
            .iter()
            .copied()
            .find(|class| granted.contains(class))
    }
}

impl From<SecurityClass> for i8 {
    fn from(class: SecurityClass) -> Self {
        match class {
            SecurityClass::Temporary => -2,
            SecurityClass::None => -1,
            SecurityClass::S2Unauthenticated => 0,
            SecurityClass::S2Authenticated => 1,
            SecurityClass::S2AccessControl => 2,
            SecurityClass::S0Legacy => 7,
        }
    }
}

impl TryFrom<i8> for SecurityClass {
    type Error = DriverError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -2 => Ok(SecurityClass::Temporary),
            -1 => Ok(SecurityClass::None),
            0 => Ok(SecurityClass::S2Unauthenticated),
            1 => Ok(SecurityClass::S2Authenticated),
            2 => Ok(SecurityClass::S2AccessControl),
            7 => Ok(SecurityClass::S0Legacy),
            other => Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                format!("Unknown security class {other}"),
            )),
        }
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityClass::Temporary => "Temporary",
            SecurityClass::None => "None",
            SecurityClass::S2Unauthenticated => "S2_Unauthenticated",
            SecurityClass::S2Authenticated => "S2_Authenticated",
            SecurityClass::S2AccessControl => "S2_AccessControl",
            SecurityClass::S0Legacy => "S0_Legacy",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Inclusion Strategy / Options
// ============================================================================

/// How the controller should secure a node during inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InclusionStrategy {
    /// Prefer S2, fall back to S0 or no security.
    Default,
    /// Include from the SmartStart provisioning list.
    SmartStart,
    /// Include without any encryption.
    Insecure,
    /// Include with legacy S0 only.
    SecurityS0,
    /// Include with S2 only.
    SecurityS2,
}

impl InclusionStrategy {
    /// Returns true if this strategy may prompt the client for a grant and PIN.
    pub fn is_interactive(self) -> bool {
        matches!(self, InclusionStrategy::Default | InclusionStrategy::SecurityS2)
    }
}

impl From<InclusionStrategy> for u8 {
    fn from(strategy: InclusionStrategy) -> Self {
        match strategy {
            InclusionStrategy::Default => 0,
            InclusionStrategy::SmartStart => 1,
            InclusionStrategy::Insecure => 2,
            InclusionStrategy::SecurityS0 => 3,
            InclusionStrategy::SecurityS2 => 4,
        }
    }
}

impl TryFrom<u8> for InclusionStrategy {
    type Error = DriverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InclusionStrategy::Default),
            1 => Ok(InclusionStrategy::SmartStart),
            2 => Ok(InclusionStrategy::Insecure),
            3 => Ok(InclusionStrategy::SecurityS0),
            4 => Ok(InclusionStrategy::SecurityS2),
            other => Err(DriverError::new(
                codes::ARGUMENT_INVALID,
                format!("Unknown inclusion strategy {other}"),
            )),
        }
    }
}

/// Options for `begin_inclusion` and `replace_failed_node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionOptions {
    pub strategy: InclusionStrategy,
    /// Force secure communication (S0) even when the node doesn't advertise it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_security: bool,
}

impl InclusionOptions {
    pub fn new(strategy: InclusionStrategy) -> Self {
        Self {
            strategy,
            force_security: false,
        }
    }

    /// Builds options from the pre-options boolean flag.
    ///
    /// `true` means insecure inclusion; `false` means legacy S0.
    pub fn from_legacy_flag(include_non_secure: bool) -> Self {
        if include_non_secure {
            Self::new(InclusionStrategy::Insecure)
        } else {
            Self::new(InclusionStrategy::SecurityS0)
        }
    }
}

/// The set of security classes granted to a joining node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionGrant {
    pub security_classes: Vec<SecurityClass>,
    pub client_side_auth: bool,
}
