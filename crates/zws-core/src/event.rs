//! Events emitted by the controller driver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{NodeId, NodeSnapshot};

/// The subsystem that raised an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Controller,
    Driver,
    Node,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventSource::Controller => "controller",
            EventSource::Driver => "driver",
            EventSource::Node => "node",
        };
        write!(f, "{s}")
    }
}

/// A driver event on its way to subscribed clients.
///
/// `data` holds the event's detail fields. Node state is kept apart in
/// `node` so it can be rendered per client schema before sending.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerEvent {
    pub source: EventSource,
    pub event: String,
    pub data: Map<String, Value>,
    pub node: Option<Box<NodeSnapshot>>,
}

impl ControllerEvent {
    pub fn new(source: EventSource, event: impl Into<String>) -> Self {
        Self {
            source,
            event: event.into(),
            data: Map::new(),
            node: None,
        }
    }

    /// Node-sourced event carrying the node's ID.
    pub fn for_node(node_id: NodeId, event: impl Into<String>) -> Self {
        Self::new(EventSource::Node, event).with("nodeId", node_id.get())
    }

    /// Adds a detail field. Values that fail to serialize become `null`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    /// Attaches a node state snapshot.
    pub fn with_node(mut self, node: NodeSnapshot) -> Self {
        self.node = Some(Box::new(node));
        self
    }
}
