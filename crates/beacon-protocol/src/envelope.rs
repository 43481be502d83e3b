//! Signaling envelope codec
//!
//! Every frame in both directions is one compact JSON object with two
//! top-level keys: `{"event": "<name>", "data": <value>}`. `data` is an
//! object for structured events, a plain string for `error`, and null when
//! absent. Payloads are never double-serialized: `data` always holds a
//! JSON value, not a JSON document inside a string.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::{self, SignalKind};

/// A parsed `{event, data}` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name
    pub event: String,
    /// Opaque payload; null when the frame carried none
    #[serde(default)]
    pub data: Value,
}

/// Envelope parse failures
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Frame was not a JSON object carrying an `event` string
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `event` was present but empty
    #[error("envelope has empty event name")]
    EmptyEvent,
}

impl Envelope {
    /// Build an envelope from an event name and payload value
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_owned(),
            data,
        }
    }

    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.event.is_empty() {
            return Err(EnvelopeError::EmptyEvent);
        }
        Ok(envelope)
    }

    /// Serialize to the compact wire form
    pub fn to_json(&self) -> String {
        // Value-to-string serialization cannot fail for the shapes built
        // here; an empty frame is still preferable to a panic on the
        // dispatcher thread.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Fields the server reads from a `join-room` payload
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinRoomData {
    /// Existing room to join
    pub room_id: Option<String>,
    /// Name for a room created on the client's behalf
    pub room_name: Option<String>,
}

impl JoinRoomData {
    /// Extract join parameters; anything unreadable degrades to defaults
    pub fn from_value(data: &Value) -> Self {
        serde_json::from_value(data.clone()).unwrap_or_default()
    }
}

/// Extract `targetClientId` from a relay payload
pub fn target_client_id(data: &Value) -> Option<&str> {
    data.get("targetClientId").and_then(Value::as_str)
}

/// Identity assignment sent once after accept
pub fn client_id(id: &str) -> Envelope {
    Envelope::new(events::CLIENT_ID, json!({ "clientId": id }))
}

/// Creation confirmation for the requesting client only
pub fn room_created(room_id: &str, room_name: &str) -> Envelope {
    Envelope::new(
        events::ROOM_CREATED,
        json!({ "roomId": room_id, "roomName": room_name }),
    )
}

/// Participant list broadcast, ids in slot order
pub fn participants(room_id: &str, ids: Vec<String>) -> Envelope {
    Envelope::new(
        events::PARTICIPANTS,
        json!({ "roomId": room_id, "participants": ids }),
    )
}

/// Relayed offer/answer/candidate with the sender's identity attached.
/// The payload passes through verbatim.
pub fn relay(kind: SignalKind, from_client_id: &str, payload: Value) -> Envelope {
    let mut data = serde_json::Map::new();
    data.insert(
        "fromClientId".to_owned(),
        Value::String(from_client_id.to_owned()),
    );
    data.insert(kind.payload_key().to_owned(), payload);
    Envelope::new(kind.event_name(), Value::Object(data))
}

/// Error report; the payload is the bare reason string
pub fn error(reason: &str) -> Envelope {
    Envelope::new(events::ERROR, Value::String(reason.to_owned()))
}
