use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::MessageError;

/// Reserved top-level key naming the groups that use replace semantics.
pub const NO_HISTORY_KEY: &str = "noHistoryFields";

/// A parsed inbound stream message: group payloads plus the per-message
/// replace-mode declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    groups: Map<String, Value>,
    no_history: HashSet<String>,
}

impl TelemetryMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text.trim())?;
        Self::from_value(value)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(bytes).map_err(|_| MessageError::NotUtf8)?;
        Self::parse(text)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let mut groups = match value {
            Value::Object(map) => map,
            other => return Err(MessageError::NotAnObject(json_kind(&other))),
        };

        let no_history = match groups.remove(NO_HISTORY_KEY) {
            None => HashSet::new(),
            Some(Value::Array(names)) => names
                .into_iter()
                .filter_map(|name| match name {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Some(other) => {
                warn!(kind = json_kind(&other), "Ignoring non-array {}", NO_HISTORY_KEY);
                HashSet::new()
            }
        };

        Ok(Self { groups, no_history })
    }

    pub fn is_replace_mode(&self, group: &str) -> bool {
        self.no_history.contains(group)
    }

    /// Group payloads in message order, reserved key excluded.
    pub fn groups(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
