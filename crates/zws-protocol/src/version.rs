//! API schema versioning.
//!
//! Every session speaks one schema version, chosen by the client with
//! `set_api_schema`. The version decides which fields appear in state
//! dumps; it never changes which commands are accepted.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Oldest schema version the server can speak.
pub const MIN_SCHEMA_VERSION: u32 = 0;

/// Newest schema version the server can speak.
pub const MAX_SCHEMA_VERSION: u32 = 3;

/// A schema version within `[MIN_SCHEMA_VERSION, MAX_SCHEMA_VERSION]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SchemaVersion(u32);

impl SchemaVersion {
    pub const MIN: SchemaVersion = SchemaVersion(MIN_SCHEMA_VERSION);
    pub const MAX: SchemaVersion = SchemaVersion(MAX_SCHEMA_VERSION);

    /// Validates a requested version.
    pub fn new(version: u32) -> Result<Self, VersionError> {
        if (MIN_SCHEMA_VERSION..=MAX_SCHEMA_VERSION).contains(&version) {
            Ok(Self(version))
        } else {
            Err(VersionError::Incompatible {
                requested: version,
                min: MIN_SCHEMA_VERSION,
                max: MAX_SCHEMA_VERSION,
            })
        }
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Schema 1 added per-node endpoint lists.
    pub fn has_endpoints(self) -> bool {
        self.0 >= 1
    }

    /// Schema 2 added `highestSecurityClass` to node state.
    pub fn has_highest_security_class(self) -> bool {
        self.0 >= 2
    }

    /// Schema 3 added `isControllerNode` to node state.
    pub fn has_controller_flag(self) -> bool {
        self.0 >= 3
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for SchemaVersion {
    type Error = VersionError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SchemaVersion> for u32 {
    fn from(version: SchemaVersion) -> Self {
        version.0
    }
}

/// Errors that can occur with version handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Schema version {requested} is not supported (supported: {min}..={max})")]
    Incompatible { requested: u32, min: u32, max: u32 },
}
