//! Driver log configuration and log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Log severity, ordered from least to most verbose.
///
/// A sink attached at level `L` receives every entry whose level is `<= L`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Http,
    Verbose,
    Debug,
    Silly,
}

impl LogLevel {
    /// Returns true if an entry at `entry` passes a sink at `self`.
    pub fn admits(self, entry: LogLevel) -> bool {
        entry <= self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Http => "http",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Silly => "silly",
        };
        write!(f, "{s}")
    }
}

/// The driver's logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    pub enabled: bool,
    pub level: LogLevel,
    pub log_to_file: bool,
    pub filename: String,
    pub force_console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            log_to_file: false,
            filename: "zwave.log".to_string(),
            force_console: false,
        }
    }
}

/// A partial update to [`LogConfig`]; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialLogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_to_file: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_console: Option<bool>,
}

impl PartialLogConfig {
    /// Merges this update into `config`.
    pub fn apply(self, config: &mut LogConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(level) = self.level {
            config.level = level;
        }
        if let Some(log_to_file) = self.log_to_file {
            config.log_to_file = log_to_file;
        }
        if let Some(filename) = self.filename {
            config.filename = filename;
        }
        if let Some(force_console) = self.force_console {
            config.force_console = force_console;
        }
    }
}

/// One log line produced by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Subsystem label, e.g. `DRIVER` or `CNTRLR`
    pub label: String,
    pub message: String,
    pub formatted_message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, label: &str, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let message = message.into();
        let formatted_message = format!(
            "{} {:<6} {}",
            timestamp.format("%H:%M:%S%.3f"),
            label,
            message
        );
        Self {
            timestamp,
            level,
            label: label.to_string(),
            message,
            formatted_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug.admits(LogLevel::Info));
        assert!(LogLevel::Info.admits(LogLevel::Info));
        assert!(!LogLevel::Warn.admits(LogLevel::Info));
        assert!(LogLevel::Error < LogLevel::Silly);
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let mut config = LogConfig::default();
        let update: PartialLogConfig =
            serde_json::from_value(serde_json::json!({ "level": "debug" })).unwrap();
        update.apply(&mut config);
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.enabled);
        assert_eq!(config.filename, "zwave.log");
    }

    #[test]
    fn test_partial_update_rejects_unknown_fields() {
        let result: Result<PartialLogConfig, _> =
            serde_json::from_value(serde_json::json!({ "colour": true }));
        assert!(result.is_err());
    }

    #[test]
    fn test_entry_formats_message() {
        let entry = LogEntry::new(LogLevel::Info, "DRIVER", "ready");
        assert!(entry.formatted_message.ends_with("DRIVER ready"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "info");
        assert!(json.get("formattedMessage").is_some());
    }
}
