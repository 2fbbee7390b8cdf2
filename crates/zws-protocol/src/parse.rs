//! Frame envelope parsing.
//!
//! Every client frame must be a JSON object carrying a string `command`
//! and a string `messageId`. Anything else is a protocol violation and
//! costs the client its connection.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors for frames that cannot be answered at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame has no string field `{0}`")]
    MissingField(&'static str),
}

/// A frame split into its routing fields and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_id: String,
    pub command: String,
    /// Every other top-level field of the frame.
    pub params: Map<String, Value>,
}

impl Envelope {
    /// Parses raw frame text.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        let Value::Object(mut params) = value else {
            return Err(ParseError::NotAnObject);
        };
        let message_id = take_string(&mut params, "messageId")?;
        let command = take_string(&mut params, "command")?;
        Ok(Self {
            message_id,
            command,
            params,
        })
    }

    /// Splits `namespace.action`; bare commands have no namespace.
    pub fn split_command(&self) -> (Option<&str>, &str) {
        match self.command.split_once('.') {
            Some((namespace, action)) => (Some(namespace), action),
            None => (None, self.command.as_str()),
        }
    }
}

fn take_string(params: &mut Map<String, Value>, key: &'static str) -> Result<String, ParseError> {
    match params.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(ParseError::MissingField(key)),
    }
}
