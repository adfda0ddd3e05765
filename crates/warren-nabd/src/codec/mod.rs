//! Line codec for the nabd wire protocol.
//!
//! Every frame is one compact JSON object terminated by a line break. Outbound
//! [`Command`] values are opaque objects; inbound frames are decoded once into
//! an [`Event`] whose [`EventKind`] names the handful of kinds the crate
//! understands, while the complete field map travels along untouched for
//! subscribers.
//!
//! ```
//! use warren_nabd::codec::{self, Command, EventKind};
//!
//! let bytes = codec::encode(&Command::gestalt());
//! assert_eq!(bytes, b"{\"type\":\"gestalt\"}\r\n");
//!
//! let event = codec::decode(br#"{"type":"rfid_event","event":"detected","uid":"AA:BB"}"#)?;
//! assert_eq!(event.kind(), &EventKind::RfidDetected { uid: String::from("AA:BB") });
//! # Ok::<(), codec::MalformedFrame>(())
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use thiserror::Error;

/// Field reserved for the kind of every frame.
pub const TYPE_FIELD: &str = "type";

/// Line terminator appended to every encoded frame.
pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// Event classes the handshake asks the daemon to forward.
pub const SUBSCRIBED_EVENTS: [&str; 4] = ["asr/*", "button", "ears", "rfid/*"];

/// Reasons a frame could not be decoded.
#[derive(Debug, Error)]
pub enum MalformedFrame {
    /// Nothing but whitespace was received.
    #[error("malformed frame: empty line")]
    Empty,
    /// The bytes were not valid UTF-8 JSON.
    #[error("malformed frame: {source}")]
    InvalidJson {
        /// Underlying parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The JSON value was not an object.
    #[error("malformed frame: expected a JSON object, found {found}")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },
}

/// Outbound directive for the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(Map<String, Value>);

impl Command {
    /// Creates a command carrying only its `type` field.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_owned(), Value::from(kind));
        Self(fields)
    }

    /// Wraps an arbitrary JSON object.
    pub fn from_value(value: Value) -> Result<Self, MalformedFrame> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(MalformedFrame::NotAnObject {
                found: json_type_name(&other),
            }),
        }
    }

    /// Adds or replaces a field.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// Subscription sent right after a session opens: idle mode plus every
    /// event class the service reacts to.
    #[must_use]
    pub fn handshake() -> Self {
        let events: Vec<Value> = SUBSCRIBED_EVENTS.iter().copied().map(Value::from).collect();
        Self::new("mode")
            .with_field("mode", "idle")
            .with_field("events", events)
    }

    /// Lightweight status query used as a liveness probe.
    #[must_use]
    pub fn gestalt() -> Self {
        Self::new("gestalt")
    }

    /// Moves both ears to the given positions.
    #[must_use]
    pub fn ears(left: u8, right: u8) -> Self {
        Self::new("ears")
            .with_field("left", left)
            .with_field("right", right)
    }

    /// Value of the `type` field, when it is a string.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }

    /// Borrows the field map.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", Value::Object(self.0.clone()))
    }
}

/// Connectivity and sleep states reported by the daemon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceState {
    /// Awake and waiting for interactions.
    Idle,
    /// Sleeping.
    Asleep,
    /// Transitioning to sleep.
    FallingAsleep,
    /// Transitioning out of sleep.
    WakingUp,
    /// No session to the daemon.
    Offline,
}

/// Recognised kinds of inbound frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `{"type":"state","state":...}`.
    State(DeviceState),
    /// `{"type":"rfid_event","event":"detected","uid":...}`.
    RfidDetected {
        /// Tag identifier exactly as sent by the device.
        uid: String,
    },
    /// Anything else; inspect [`Event::fields`].
    Unknown,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    fields: Map<String, Value>,
}

impl Event {
    /// Classifies a field map.
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        let kind = classify(&fields);
        Self { kind, fields }
    }

    /// Synthesises a state report.
    #[must_use]
    pub fn state(state: DeviceState) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_owned(), Value::from("state"));
        fields.insert(String::from("state"), Value::from(state.to_string()));
        Self {
            kind: EventKind::State(state),
            fields,
        }
    }

    /// Event dispatched when a session to a device is lost.
    #[must_use]
    pub fn offline() -> Self {
        Self::state(DeviceState::Offline)
    }

    /// Recognised kind.
    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Value of the `type` field, when it is a string.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.field(TYPE_FIELD).and_then(Value::as_str)
    }

    /// Looks up one field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Borrows every field.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Releases the field map.
    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

fn classify(fields: &Map<String, Value>) -> EventKind {
    let text = |name: &str| fields.get(name).and_then(Value::as_str);
    match text(TYPE_FIELD) {
        Some("state") => text("state")
            .and_then(|state| state.parse::<DeviceState>().ok())
            .map_or(EventKind::Unknown, EventKind::State),
        Some("rfid_event") if text("event") == Some("detected") => text("uid")
            .map_or(EventKind::Unknown, |uid| EventKind::RfidDetected {
                uid: uid.to_owned(),
            }),
        _ => EventKind::Unknown,
    }
}

/// Serialises a command to one terminated line.
#[must_use]
pub fn encode(command: &Command) -> Vec<u8> {
    let mut frame = command.to_string().into_bytes();
    frame.extend_from_slice(FRAME_TERMINATOR);
    frame
}

/// Parses one line into an event.
pub fn decode(frame: &[u8]) -> Result<Event, MalformedFrame> {
    let trimmed = frame.trim_ascii();
    if trimmed.is_empty() {
        return Err(MalformedFrame::Empty);
    }
    match serde_json::from_slice(trimmed) {
        Ok(Value::Object(fields)) => Ok(Event::from_fields(fields)),
        Ok(other) => Err(MalformedFrame::NotAnObject {
            found: json_type_name(&other),
        }),
        Err(source) => Err(MalformedFrame::InvalidJson { source }),
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
