//! JSON message types for the builder-facing WebSocket protocol.
//!
//! Every frame the Flow Builder sends is a JSON object with a `"kind"` string.
//! The kind's prefix decides who consumes the frame:
//!
//! ```text
//! userflow-electron:*  → control message, consumed by the dev server
//! userflow:*           → SDK protocol message, relayed to the target environment
//! anything else        → ignored
//! ```
//!
//! Note that `userflow-electron:` does not start with `userflow:` (the hyphen
//! comes before the colon), so the two namespaces never overlap.
//!
//! # Why not `#[serde(tag = "kind")]`?
//!
//! SDK messages are an open set: the bridge never interprets anything beyond
//! `kind`, and must relay the remaining fields verbatim.  Only the control
//! namespace has a closed set of variants.  [`decode_frame`] therefore works on
//! a raw JSON object and classifies it by prefix.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Prefix of control messages consumed directly by the dev server.
pub const CONTROL_PREFIX: &str = "userflow-electron:";

/// Prefix of SDK protocol messages relayed to and from the target environment.
pub const SDK_PREFIX: &str = "userflow:";

/// Control kind asking the host to show and focus its window.
pub const SHOW_KIND: &str = "userflow-electron:show";

// ── Decode errors ─────────────────────────────────────────────────────────────

/// Reasons a WebSocket frame could not be turned into a [`BuilderMessage`].
///
/// These are protocol errors: the session logs them and moves on to the next
/// frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The frame was valid JSON but not an object (e.g. an array or a number).
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// The object has no `kind` field.
    #[error("message has no \"kind\" field")]
    MissingKind,

    /// The `kind` field is present but not a string.
    #[error("\"kind\" must be a string, got {0}")]
    KindNotString(&'static str),

    /// The object does not belong to the SDK namespace.
    #[error("\"{0}\" is not a userflow: message")]
    NotSdkKind(String),
}

// ── SDK messages ──────────────────────────────────────────────────────────────

/// An opaque SDK protocol message (`kind` starts with `userflow:`).
///
/// The bridge only guarantees the `kind` invariant; every other field is
/// carried as-is.  Serializes back to exactly the object it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SdkMessage(Map<String, Value>);

impl SdkMessage {
    /// Creates a message with only a `kind` field.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::NotSdkKind`] if `kind` is outside the `userflow:`
    /// namespace.
    ///
    /// # Example
    ///
    /// ```rust
    /// use userflow_dev_bridge::domain::SdkMessage;
    ///
    /// let ack = SdkMessage::new("userflow:ack").unwrap();
    /// assert_eq!(ack.to_json().unwrap(), r#"{"kind":"userflow:ack"}"#);
    /// ```
    pub fn new(kind: impl Into<String>) -> Result<Self, DecodeError> {
        let mut map = Map::new();
        map.insert("kind".to_string(), Value::String(kind.into()));
        Self::try_from(map)
    }

    /// Adds (or replaces) a payload field and returns the message.
    ///
    /// The `kind` field cannot be overwritten through this method.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key != "kind" {
            self.0.insert(key, value);
        }
        self
    }

    /// The message kind, e.g. `"userflow:hello"`.
    pub fn kind(&self) -> &str {
        // The constructor guarantees `kind` is a string.
        self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    /// Looks up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrows the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serializes the message to compact JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

impl TryFrom<Map<String, Value>> for SdkMessage {
    type Error = DecodeError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let kind = kind_of(&map)?;
        if !kind.starts_with(SDK_PREFIX) {
            return Err(DecodeError::NotSdkKind(kind.to_string()));
        }
        Ok(Self(map))
    }
}

impl TryFrom<Value> for SdkMessage {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::try_from(map),
            other => Err(DecodeError::NotAnObject(json_type_name(&other))),
        }
    }
}

impl<'de> Deserialize<'de> for SdkMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::deserialize(deserializer)?;
        Self::try_from(map).map_err(serde::de::Error::custom)
    }
}

// ── Inbound classification ────────────────────────────────────────────────────

/// A decoded inbound frame from the Flow Builder.
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderMessage {
    /// `userflow-electron:show`: bring the host window to the foreground.
    Show,

    /// Any other `userflow-electron:*` kind.  Consumed by the dev server and
    /// ignored, never relayed.
    UnknownControl {
        /// The full kind string.
        kind: String,
    },

    /// A `userflow:*` message for the SDK.
    Sdk(SdkMessage),

    /// A well-formed message outside both namespaces.  Ignored entirely.
    Foreign {
        /// The full kind string.
        kind: String,
    },
}

impl BuilderMessage {
    /// Short label for log lines.  Never includes payload fields.
    pub fn kind(&self) -> &str {
        match self {
            BuilderMessage::Show => SHOW_KIND,
            BuilderMessage::UnknownControl { kind } | BuilderMessage::Foreign { kind } => kind,
            BuilderMessage::Sdk(msg) => msg.kind(),
        }
    }
}

/// Decodes one WebSocket text frame.
///
/// This function is total: every input yields either a classified
/// [`BuilderMessage`] or a [`DecodeError`], never a panic.
///
/// # Example
///
/// ```rust
/// use userflow_dev_bridge::domain::{decode_frame, BuilderMessage};
///
/// let msg = decode_frame(r#"{"kind":"userflow-electron:show"}"#).unwrap();
/// assert_eq!(msg, BuilderMessage::Show);
/// assert!(decode_frame("{not json").is_err());
/// ```
pub fn decode_frame(text: &str) -> Result<BuilderMessage, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let map = match value {
        Value::Object(map) => map,
        other => return Err(DecodeError::NotAnObject(json_type_name(&other))),
    };

    let kind = kind_of(&map)?;
    if kind == SHOW_KIND {
        Ok(BuilderMessage::Show)
    } else if kind.starts_with(CONTROL_PREFIX) {
        Ok(BuilderMessage::UnknownControl {
            kind: kind.to_string(),
        })
    } else if kind.starts_with(SDK_PREFIX) {
        Ok(BuilderMessage::Sdk(SdkMessage(map)))
    } else {
        Ok(BuilderMessage::Foreign {
            kind: kind.to_string(),
        })
    }
}

fn kind_of(map: &Map<String, Value>) -> Result<&str, DecodeError> {
    match map.get("kind") {
        Some(Value::String(kind)) => Ok(kind),
        Some(other) => Err(DecodeError::KindNotString(json_type_name(other))),
        None => Err(DecodeError::MissingKind),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
