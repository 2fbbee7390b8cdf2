//! Value identifiers and metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A property or property key: either numeric or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    Number(i64),
    Text(String),
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Number(n) => write!(f, "{n}"),
            PropertyKey::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::Text(s.to_string())
    }
}

impl From<i64> for PropertyKey {
    fn from(n: i64) -> Self {
        PropertyKey::Number(n)
    }
}

/// Addresses a single value on a node.
///
/// An absent `endpoint` refers to the root endpoint (index 0).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueId {
    pub command_class: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<u8>,
    pub property: PropertyKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_key: Option<PropertyKey>,
}

impl ValueId {
    pub fn new(command_class: u16, endpoint: u8, property: impl Into<PropertyKey>) -> Self {
        Self {
            command_class,
            endpoint: Some(endpoint),
            property: property.into(),
            property_key: None,
        }
    }

    /// Effective endpoint index.
    pub fn endpoint_index(&self) -> u8 {
        self.endpoint.unwrap_or(0)
    }

    /// Compares two IDs treating a missing endpoint as the root endpoint.
    pub fn same_value(&self, other: &ValueId) -> bool {
        self.command_class == other.command_class
            && self.endpoint_index() == other.endpoint_index()
            && self.property == other.property
            && self.property_key == other.property_key
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.command_class,
            self.endpoint_index(),
            self.property
        )?;
        if let Some(key) = &self.property_key {
            write!(f, "-{key}")?;
        }
        Ok(())
    }
}

/// Describes a value's type and access rights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMetadata {
    #[serde(rename = "type")]
    pub value_type: String,
    pub readable: bool,
    pub writeable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ValueMetadata {
    pub fn boolean(label: &str, writeable: bool) -> Self {
        Self {
            value_type: "boolean".to_string(),
            readable: true,
            writeable,
            label: Some(label.to_string()),
            min: None,
            max: None,
            unit: None,
        }
    }

    pub fn number(label: &str, min: f64, max: f64, unit: Option<&str>) -> Self {
        Self {
            value_type: "number".to_string(),
            readable: true,
            writeable: false,
            label: Some(label.to_string()),
            min: Some(min),
            max: Some(max),
            unit: unit.map(str::to_string),
        }
    }
}
