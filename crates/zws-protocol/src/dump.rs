//! Schema-aware rendering of controller state, events and log entries.
//!
//! Snapshots from the driver always carry every field. What a client sees
//! depends on its schema version:
//!
//! | schema | node state adds        |
//! |--------|------------------------|
//! | 0      | base fields            |
//! | 1      | `endpoints`            |
//! | 2      | `highestSecurityClass` |
//! | 3      | `isControllerNode`     |

use serde::Serialize;
use serde_json::{json, Map, Value};
use zws_core::{ControllerEvent, LogConfig, LogEntry, NetworkSnapshot, NodeSnapshot};

use crate::version::SchemaVersion;

/// Driver-level facts included in the `start_listening` dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverState {
    pub log_config: LogConfig,
    pub statistics_enabled: bool,
}

/// Renders one node for the given schema.
pub fn dump_node(node: &NodeSnapshot, schema: SchemaVersion) -> Value {
    let Ok(Value::Object(mut fields)) = serde_json::to_value(node) else {
        return Value::Null;
    };
    if !schema.has_endpoints() {
        fields.remove("endpoints");
    }
    if schema.has_highest_security_class() {
        let highest = node
            .highest_security_class()
            .map_or(Value::Null, |class| json!(i8::from(class)));
        fields.insert("highestSecurityClass".to_string(), highest);
    }
    if !schema.has_controller_flag() {
        fields.remove("isControllerNode");
    }
    Value::Object(fields)
}

/// Renders the full `start_listening` state.
pub fn dump_state(network: &NetworkSnapshot, driver: &DriverState, schema: SchemaVersion) -> Value {
    let nodes: Vec<Value> = network
        .nodes
        .iter()
        .map(|node| dump_node(node, schema))
        .collect();
    json!({
        "driver": driver,
        "controller": network.controller,
        "nodes": nodes,
    })
}

/// Renders a driver event as the body of an event frame.
pub fn render_event(event: &ControllerEvent, schema: SchemaVersion) -> Value {
    let mut fields = Map::with_capacity(event.data.len() + 3);
    fields.insert("source".to_string(), json!(event.source));
    fields.insert("event".to_string(), Value::String(event.event.clone()));
    for (key, value) in &event.data {
        fields.insert(key.clone(), value.clone());
    }
    if let Some(node) = &event.node {
        fields.insert("node".to_string(), dump_node(node, schema));
    }
    Value::Object(fields)
}

/// Renders a driver log entry as a `logging` event body.
pub fn render_log_entry(entry: &LogEntry) -> Value {
    let mut fields = Map::new();
    fields.insert("source".to_string(), json!("driver"));
    fields.insert("event".to_string(), json!("logging"));
    if let Ok(Value::Object(entry_fields)) = serde_json::to_value(entry) {
        fields.extend(entry_fields);
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zws_core::{Driver, EventSource, LogLevel, NodeId, SimulatedDriver};

    fn node() -> NodeSnapshot {
        SimulatedDriver::with_nodes(1)
            .node_state(NodeId::new(2))
            .unwrap()
    }

    #[test]
    fn test_schema_zero_is_minimal() {
        let dumped = dump_node(&node(), SchemaVersion::MIN);
        assert!(dumped.get("endpoints").is_none());
        assert!(dumped.get("highestSecurityClass").is_none());
        assert!(dumped.get("isControllerNode").is_none());
        assert_eq!(dumped["nodeId"], 2);
    }

    #[test]
    fn test_each_schema_adds_fields() {
        let v1 = dump_node(&node(), SchemaVersion::new(1).unwrap());
        assert!(v1.get("endpoints").is_some());
        assert!(v1.get("highestSecurityClass").is_none());

        let v2 = dump_node(&node(), SchemaVersion::new(2).unwrap());
        assert_eq!(v2["highestSecurityClass"], 1);
        assert!(v2.get("isControllerNode").is_none());

        let v3 = dump_node(&node(), SchemaVersion::MAX);
        assert_eq!(v3["isControllerNode"], false);
    }

    #[test]
    fn test_dump_state_layout() {
        let driver = SimulatedDriver::with_nodes(2);
        let state = dump_state(
            &driver.network_state(),
            &DriverState {
                log_config: driver.log_config(),
                statistics_enabled: false,
            },
            SchemaVersion::MAX,
        );
        assert_eq!(state["nodes"].as_array().map(Vec::len), Some(3));
        assert_eq!(state["driver"]["statisticsEnabled"], false);
        assert_eq!(state["driver"]["logConfig"]["level"], "info");
        assert!(state["controller"].get("homeId").is_some());
    }

    #[test]
    fn test_render_event_embeds_node_per_schema() {
        let event = ControllerEvent::new(EventSource::Controller, "node added").with_node(node());
        let v0 = render_event(&event, SchemaVersion::MIN);
        let v3 = render_event(&event, SchemaVersion::MAX);
        assert_eq!(v0["source"], "controller");
        assert_eq!(v0["event"], "node added");
        assert!(v0["node"].get("endpoints").is_none());
        assert!(v3["node"].get("endpoints").is_some());
    }

    #[test]
    fn test_render_log_entry() {
        let entry = LogEntry::new(LogLevel::Warn, "DRIVER", "low battery");
        let rendered = render_log_entry(&entry);
        assert_eq!(rendered["source"], "driver");
        assert_eq!(rendered["event"], "logging");
        assert_eq!(rendered["message"], "low battery");
        assert_eq!(rendered["level"], "warn");
    }
}
