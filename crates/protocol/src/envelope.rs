//! The `{type, data, timestamp}` wire unit

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

const ENVELOPE_KEYS: [&str; 3] = ["type", "data", "timestamp"];

/// A single frame on the session socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload object; absent inbound data decodes as `null`
    #[serde(default)]
    pub data: Value,
    /// Outbound frames always carry one; the server puts its own inside `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    /// Build an outbound envelope stamped with the current UTC time
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode for the wire. Payload fields are also mirrored at the top level,
    /// where the game server's handlers read them; the envelope keys win.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut frame = serde_json::to_value(self)?;
        if let (Some(frame), Some(data)) = (frame.as_object_mut(), self.data.as_object()) {
            for (key, value) in data {
                if ENVELOPE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                frame.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        serde_json::to_string(&frame)
    }

    /// String field inside `data`, if present
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}
