//! Protocol envelopes.
//!
//! Every frame on the channel carries exactly one [`Envelope`]. Commands and
//! responses are correlated by `id`; events are unsolicited and carry no id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The mapping carried by every envelope.
pub type Payload = Map<String, Value>;

/// Stable error codes used in `response.error`.
pub mod codes {
    pub const UNKNOWN_COMMAND: &str = "unknownCommand";
    pub const CONNECTION_CLOSED: &str = "connectionClosed";
    pub const RECEIVER_EXCEPTION: &str = "receiverException";
    pub const NOT_INITIALIZED: &str = "notInitialized";
    pub const DISALLOWED_PARAMETER: &str = "disallowedParameter";
    pub const BAD_PAYLOAD: &str = "badPayload";
    /// Prefix of errors reported by the engine itself; the message follows.
    pub const ENGINE_ERROR: &str = "engineError";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    Command {
        id: u64,
        command: String,
        #[serde(default)]
        payload: Payload,
    },
    Response {
        id: u64,
        #[serde(default)]
        payload: Payload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Payload,
    },
}

impl Envelope {
    pub fn command(id: u64, command: impl Into<String>, payload: Payload) -> Self {
        Self::Command {
            id,
            command: command.into(),
            payload,
        }
    }

    pub const fn ok(id: u64, payload: Payload) -> Self {
        Self::Response {
            id,
            payload,
            error: None,
        }
    }

    pub fn error(id: u64, error: impl Into<String>) -> Self {
        Self::Response {
            id,
            payload: Payload::new(),
            error: Some(error.into()),
        }
    }

    pub fn event(event: impl Into<String>, payload: Payload) -> Self {
        Self::Event {
            event: event.into(),
            payload,
        }
    }

    /// Short label for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Response { .. } => "response",
            Self::Event { .. } => "event",
        }
    }
}

/// Serialize a typed payload into an envelope mapping.
///
/// Anything that does not serialize to a JSON object is wrapped as
/// `{"value": ...}`.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Payload::new()),
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
    }
}

/// Deserialize a typed payload out of an envelope mapping.
pub fn from_payload<T: for<'de> Deserialize<'de>>(payload: Payload) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(payload))
}
